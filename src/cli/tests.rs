//! Tests for CLI parsing and the runner

use super::*;
use crate::types::Granularity;
use chrono::NaiveDate;
use clap::Parser;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn test_parse_fetch() {
    let cli = Cli::try_parse_from([
        "remote-datareader",
        "-v",
        "fetch",
        "french.ff5",
        "--start",
        "2010-01-01",
        "--end",
        "2012-12-31",
        "-g",
        "daily",
        "-f",
        "jsonl",
        "-o",
        "ff5.jsonl",
    ])
    .unwrap();

    assert!(cli.verbose);
    assert!(cli.settings.is_none());
    match cli.command {
        Commands::Fetch {
            dataset,
            start,
            end,
            granularity,
            credential,
            output,
            format,
        } => {
            assert_eq!(dataset, "french.ff5");
            assert_eq!(start, NaiveDate::from_ymd_opt(2010, 1, 1));
            assert_eq!(end, NaiveDate::from_ymd_opt(2012, 12, 31));
            assert_eq!(granularity, Some(Granularity::Daily));
            assert_eq!(credential, None);
            assert_eq!(output.unwrap().to_str(), Some("ff5.jsonl"));
            assert_eq!(format, OutputFormat::Jsonl);
        }
        other => panic!("expected fetch, got {other:?}"),
    }
}

#[test]
fn test_parse_fetch_defaults() {
    let cli = Cli::try_parse_from(["remote-datareader", "fetch", "census.bds.firms"]).unwrap();
    match cli.command {
        Commands::Fetch { format, output, .. } => {
            assert_eq!(format, OutputFormat::Csv);
            assert!(output.is_none());
        }
        other => panic!("expected fetch, got {other:?}"),
    }
}

#[test]
fn test_parse_rejects_bad_values() {
    assert!(Cli::try_parse_from(["remote-datareader", "fetch", "x", "--start", "2010-13-01"]).is_err());
    assert!(Cli::try_parse_from(["remote-datareader", "fetch", "x", "-g", "hourly"]).is_err());
    assert!(Cli::try_parse_from(["remote-datareader", "fetch", "x", "-f", "xlsx"]).is_err());
}

#[test]
fn test_parse_global_settings_after_subcommand() {
    let cli =
        Cli::try_parse_from(["remote-datareader", "validate", "--settings", "s.yaml"]).unwrap();
    assert_eq!(cli.settings.unwrap().to_str(), Some("s.yaml"));
    assert!(matches!(cli.command, Commands::Validate));
}

#[tokio::test]
async fn test_validate_builtin_settings() {
    let cli = Cli::try_parse_from(["remote-datareader", "validate"]).unwrap();
    Runner::new(cli).run().await.unwrap();
}

#[tokio::test]
async fn test_validate_reports_bad_settings() {
    let dir = tempdir().unwrap();
    let settings = dir.path().join("settings.yaml");
    std::fs::write(&settings, "collector:\n  concurrency: 0\n").unwrap();

    let cli = Cli::try_parse_from([
        "remote-datareader",
        "validate",
        "--settings",
        settings.to_str().unwrap(),
    ])
    .unwrap();
    let err = Runner::new(cli).run().await.unwrap_err();
    assert!(err.to_string().contains("concurrency"));
}

#[tokio::test]
async fn test_list_unknown_source() {
    let cli =
        Cli::try_parse_from(["remote-datareader", "list", "--source", "bloomberg"]).unwrap();
    let err = Runner::new(cli).run().await.unwrap_err();
    assert!(matches!(err, crate::Error::Config { .. }));
}

#[tokio::test]
async fn test_fetch_binary_format_needs_output() {
    let cli =
        Cli::try_parse_from(["remote-datareader", "fetch", "french.ff5", "-f", "parquet"]).unwrap();
    let err = Runner::new(cli).run().await.unwrap_err();
    assert!(err.to_string().contains("--output"));
}

#[tokio::test]
async fn test_fetch_writes_csv() {
    let server = MockServer::start().await;
    for year in ["2001", "2002"] {
        Mock::given(method("GET"))
            .and(path("/firms"))
            .and(query_param("time", year))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                ["sector", "firms", "time"],
                ["A", "10", year],
            ])))
            .mount(&server)
            .await;
    }

    let dir = tempdir().unwrap();
    let settings = dir.path().join("settings.yaml");
    let output = dir.path().join("firms.csv");
    std::fs::write(
        &settings,
        format!(
            r"
builtin_sources: false
http:
  max_retries: 0
  rate_limit: ~
sources:
  - type: rest_paginated
    name: mock
    base_url: {}
    datasets:
      - name: mock.firms
        endpoint: firms
        period_param: time
        first_period: '2001'
        last_period: '2002'
        schema:
          numeric: [firms]
          uppercase: true
          index: [SECTOR, TIME]
",
            server.uri()
        ),
    )
    .unwrap();

    let cli = Cli::try_parse_from([
        "remote-datareader",
        "--settings",
        settings.to_str().unwrap(),
        "fetch",
        "mock.firms",
        "-o",
        output.to_str().unwrap(),
    ])
    .unwrap();
    Runner::new(cli).run().await.unwrap();

    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "SECTOR,FIRMS,TIME\nA,10,2001\nA,10,2002\n"
    );
}
