//! Integration tests using mock HTTP servers
//!
//! Tests the full end-to-end flow: settings YAML → registry → connector →
//! HTTP requests → canonical table → output

use pretty_assertions::assert_eq;
use remote_datareader::credentials::StaticCredentials;
use remote_datareader::output::{write_table, OutputFormat};
use remote_datareader::{
    CancelToken, Cell, ConnectorRegistry, DatasetRequest, Error, Granularity, Settings,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn date(y: i32, m: u32, d: u32) -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn credentials() -> Arc<StaticCredentials> {
    Arc::new(StaticCredentials::new().with("census.api_key", "secret"))
}

/// Settings with the built-in `census` source redirected to `base_url`
fn census_settings(base_url: &str, max_retries: u32) -> Settings {
    Settings::from_yaml(&format!(
        r"
http:
  max_retries: {max_retries}
  backoff: constant
  initial_backoff_ms: 5
  rate_limit: ~
sources:
  - type: rest_paginated
    name: census
    base_url: {base_url}
    datasets:
      - name: census.bds.firms
        endpoint: bds/firms
        period_param: year2
        first_period: '2010'
        last_period: '2012'
        params:
          get: sic1,firms
          for: 'us:*'
        key_param: key
        credential: census.api_key
        schema:
          drop: [us]
          numeric: [firms]
          rename:
            year2: YEAR
          uppercase: true
          index: [SIC1, YEAR]
"
    ))
    .unwrap()
}

fn bds_body(year: &str) -> serde_json::Value {
    json!([
        ["sic1", "firms", "year2", "us"],
        ["B", "20", year, "1"],
        ["A", "10", year, "1"],
    ])
}

async fn mount_year(server: &MockServer, year: &str) {
    Mock::given(method("GET"))
        .and(path("/bds/firms"))
        .and(query_param("year2", year))
        .and(query_param("key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bds_body(year)))
        .mount(server)
        .await;
}

/// 2011 fails twice with 500 before succeeding
async fn flaky_census() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bds/firms"))
        .and(query_param("year2", "2011"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    for year in ["2010", "2011", "2012"] {
        mount_year(&server, year).await;
    }
    server
}

fn years(table: &remote_datareader::CanonicalTable) -> Vec<i64> {
    let years: BTreeSet<i64> = table
        .column("YEAR")
        .unwrap()
        .into_iter()
        .filter_map(Cell::as_i64)
        .collect();
    years.into_iter().collect()
}

// ============================================================================
// Paginated REST
// ============================================================================

#[tokio::test]
async fn test_paginated_retries_recover_every_period() {
    let server = flaky_census().await;
    let registry =
        ConnectorRegistry::from_settings(&census_settings(&server.uri(), 3), credentials())
            .unwrap();

    let dataset = registry
        .fetch(DatasetRequest::new("census.bds.firms"))
        .await
        .unwrap();

    assert!(dataset.is_complete());
    assert_eq!(
        dataset.table.columns(),
        &["SIC1", "FIRMS", "YEAR"].map(String::from)[..]
    );
    assert_eq!(dataset.table.len(), 6);
    assert_eq!(years(&dataset.table), vec![2010, 2011, 2012]);

    // Sorted by (SIC1, YEAR)
    assert_eq!(dataset.table.get(0, "SIC1"), Some(&Cell::from("A")));
    assert_eq!(dataset.table.get(0, "YEAR"), Some(&Cell::Int(2010)));
    assert_eq!(dataset.table.get(0, "FIRMS"), Some(&Cell::Int(10)));
    assert_eq!(dataset.table.get(3, "SIC1"), Some(&Cell::from("B")));
}

#[tokio::test]
async fn test_paginated_without_retries_reports_missing_period() {
    let server = flaky_census().await;
    let registry =
        ConnectorRegistry::from_settings(&census_settings(&server.uri(), 0), credentials())
            .unwrap();

    let dataset = registry
        .fetch(DatasetRequest::new("census.bds.firms"))
        .await
        .unwrap();

    assert!(!dataset.is_complete());
    assert_eq!(years(&dataset.table), vec![2010, 2012]);
    assert_eq!(dataset.unavailable.len(), 1);
    assert_eq!(dataset.unavailable[0].period.to_string(), "2011");
}

#[tokio::test]
async fn test_paginated_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bds/firms"))
        .and(query_param("year2", "2011"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;
    mount_year(&server, "2010").await;
    mount_year(&server, "2012").await;

    let registry =
        ConnectorRegistry::from_settings(&census_settings(&server.uri(), 3), credentials())
            .unwrap();
    let dataset = registry
        .fetch(DatasetRequest::new("census.bds.firms"))
        .await
        .unwrap();

    assert_eq!(dataset.unavailable.len(), 1);
    // Dropping the server verifies the single 429 request
    drop(server);
}

#[tokio::test]
async fn test_paginated_missing_credential() {
    let server = MockServer::start().await;
    let registry = ConnectorRegistry::from_settings(
        &census_settings(&server.uri(), 0),
        Arc::new(StaticCredentials::new()),
    )
    .unwrap();

    let err = registry
        .fetch(DatasetRequest::new("census.bds.firms"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CredentialMissing { name } if name == "census.api_key"));
}

#[tokio::test]
async fn test_cancelled_before_fetch() {
    let server = MockServer::start().await;
    let registry =
        ConnectorRegistry::from_settings(&census_settings(&server.uri(), 0), credentials())
            .unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = registry
        .fetch(DatasetRequest::new("census.bds.firms").cancel_token(cancel))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
}

#[tokio::test]
async fn test_cancelled_mid_collection_keeps_partial() {
    let server = MockServer::start().await;
    mount_year(&server, "2010").await;
    for year in ["2011", "2012"] {
        Mock::given(method("GET"))
            .and(path("/bds/firms"))
            .and(query_param("year2", year))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(bds_body(year))
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;
    }

    let registry =
        ConnectorRegistry::from_settings(&census_settings(&server.uri(), 0), credentials())
            .unwrap();
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let err = registry
        .fetch(DatasetRequest::new("census.bds.firms").cancel_token(cancel))
        .await
        .unwrap_err();

    let partial = err.partial().expect("2010 finished before cancellation");
    assert_eq!(partial.len(), 2);
}

// ============================================================================
// Archive
// ============================================================================

fn zip_of(name: &str, content: &str) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buffer);
        writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    buffer.into_inner()
}

#[tokio::test]
async fn test_french_archive_end_to_end() {
    let server = MockServer::start().await;
    let member = "This file was created using the 202312 CRSP database.\r\n\
                  The Tbill return is the simple monthly rate.\r\n\
                  \r\n\
                  ,Mkt-RF,SMB,HML,RF\r\n\
                  202311,   8.83,   -0.08,    1.66,    0.44\r\n\
                  202312,   4.87,    6.34,    4.93,    0.43\r\n\
                  202310,  -3.18,   -3.87,    0.19,  -99.99\r\n\
                  \r\n\
                  \x20Annual Factors: January-December\r\n\
                  ,Mkt-RF,SMB,HML,RF\r\n\
                  2023,  21.69,   -3.39,   -4.17,    5.04\r\n";
    Mock::given(method("GET"))
        .and(path("/ftp/F-F_Research_Data_Factors_CSV.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(zip_of("F-F_Research_Data_Factors.CSV", member)),
        )
        .mount(&server)
        .await;

    // A configured source named like a built-in replaces it
    let settings = Settings::from_yaml(&format!(
        r"
http:
  rate_limit: ~
sources:
  - type: archive
    name: french
    base_url: {}/ftp
    datasets:
      - name: french.ff3
        library: F-F_Research_Data_Factors
        granularities: [daily, weekly, monthly]
        sentinel_column: Mkt-RF
        schema:
          rename:
            Mkt-RF: MKT_RF
          uppercase: true
          index: [DATE]
",
        server.uri()
    ))
    .unwrap();
    let registry = ConnectorRegistry::from_settings(&settings, credentials()).unwrap();
    assert!(registry.datasets().contains(&"census.bds.firms".to_string()));
    assert!(!registry.datasets().contains(&"french.ff5".to_string()));

    let dataset = registry
        .fetch(
            DatasetRequest::new("french.ff3")
                .granularity(Granularity::Monthly)
                .between(date(2023, 11, 1), date(2023, 12, 31)),
        )
        .await
        .unwrap();

    assert_eq!(
        dataset.table.columns(),
        &["DATE", "MKT_RF", "SMB", "HML", "RF"].map(String::from)[..]
    );
    assert_eq!(dataset.table.len(), 2);
    assert_eq!(
        dataset.table.get(0, "DATE"),
        Some(&Cell::Date(date(2023, 11, 30)))
    );
    assert_eq!(dataset.table.get(1, "MKT_RF"), Some(&Cell::Float(4.87)));

    let mut csv = Vec::new();
    write_table(&dataset.table, OutputFormat::Csv, &mut csv).unwrap();
    assert_eq!(
        String::from_utf8(csv).unwrap(),
        "DATE,MKT_RF,SMB,HML,RF\n2023-11-30,8.83,-0.08,1.66,0.44\n2023-12-31,4.87,6.34,4.93,0.43\n"
    );
}

#[tokio::test]
async fn test_archive_missing_member() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ftp/F-F_Momentum_Factor_CSV.zip"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(zip_of("README.txt", "nothing here")),
        )
        .mount(&server)
        .await;

    let settings = Settings::from_yaml(&format!(
        r"
builtin_sources: false
http:
  rate_limit: ~
sources:
  - type: archive
    name: french
    base_url: {}/ftp
    datasets:
      - name: french.momentum
        library: F-F_Momentum_Factor
        schema:
          index: [Date]
",
        server.uri()
    ))
    .unwrap();
    let registry = ConnectorRegistry::from_settings(&settings, credentials()).unwrap();

    let err = registry
        .fetch(DatasetRequest::new("french.momentum"))
        .await
        .unwrap_err();
    match err {
        Error::MemberNotFound { member, available } => {
            assert_eq!(member, "F-F_Momentum_Factor.CSV");
            assert_eq!(available, vec!["README.txt".to_string()]);
        }
        other => panic!("expected MemberNotFound, got {other:?}"),
    }
}

// ============================================================================
// Keyed series
// ============================================================================

#[tokio::test]
async fn test_series_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/query"))
        .and(query_param("function", "FX_DAILY"))
        .and(query_param("apikey", "demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Meta Data": {"1. Information": "Forex Daily Prices"},
            "Time Series FX (Daily)": {
                "2024-01-03": {"1. open": "1.0920", "4. close": "1.0921"},
                "2024-01-02": {"1. open": "1.1040", "4. close": "1.0940"}
            }
        })))
        .mount(&server)
        .await;

    let settings = Settings::from_yaml(&format!(
        r"
builtin_sources: false
http:
  rate_limit: ~
sources:
  - type: rest_series
    name: fx
    base_url: {}
    datasets:
      - name: fx.eurusd
        endpoint: query
        params:
          function: FX_DAILY
          from_symbol: EUR
          to_symbol: USD
        key_param: apikey
        credential: fx.key
        series_path: Time Series FX (Daily)
        schema:
          numeric: [1. open, 4. close]
          rename:
            1. open: Open
            4. close: Close
            date: Date
          index: [Date]
",
        server.uri()
    ))
    .unwrap();
    let registry = ConnectorRegistry::from_settings(
        &settings,
        Arc::new(StaticCredentials::new().with("fx.key", "demo")),
    )
    .unwrap();

    let dataset = registry
        .fetch(DatasetRequest::new("fx.eurusd"))
        .await
        .unwrap();

    assert_eq!(dataset.table.len(), 2);
    assert_eq!(
        dataset.table.get(0, "Date"),
        Some(&Cell::Date(date(2024, 1, 2)))
    );
    assert_eq!(dataset.table.get(0, "Open"), Some(&Cell::Float(1.104)));
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test]
async fn test_unknown_dataset() {
    let registry = ConnectorRegistry::from_settings(&Settings::default(), credentials()).unwrap();
    let err = registry
        .fetch(DatasetRequest::new("bloomberg.px_last"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownDataset { .. }));
    assert_eq!(
        err.category(),
        remote_datareader::error::ErrorCategory::Configuration
    );
}

#[test]
fn test_invalid_settings_rejected() {
    let settings = Settings::from_yaml(
        r"
collector:
  concurrency: 0
",
    )
    .unwrap();
    let err = ConnectorRegistry::from_settings(&settings, credentials()).unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}
