//! Tests for the schema normalizer

use super::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

fn ohlc_table() -> Table {
    Table::from_rows(
        cols(&["date", "1. open", "2. high"]),
        vec![
            vec![Cell::text("2024-01-03"), Cell::Float(1.1), Cell::Float(1.2)],
            vec![Cell::text("2024-01-02"), Cell::Float(1.0), Cell::Float(1.3)],
        ],
    )
    .unwrap()
}

#[test]
fn test_rename_only_touches_mapped_column() {
    let rename = HashMap::from([("1. open".to_string(), "Open".to_string())]);

    let table = normalize(ohlc_table(), &rename, &["date"]).unwrap();

    assert_eq!(table.columns(), &cols(&["date", "Open", "2. high"])[..]);
}

#[test]
fn test_rows_sorted_by_index() {
    let table = normalize(ohlc_table(), &HashMap::new(), &["date"]).unwrap();

    assert_eq!(table.get(0, "date"), Some(&Cell::text("2024-01-02")));
    assert_eq!(table.get(1, "date"), Some(&Cell::text("2024-01-03")));
    assert_eq!(table.index_keys(), &cols(&["date"])[..]);
}

#[test]
fn test_missing_index_key_is_schema_mismatch() {
    let result = normalize(ohlc_table(), &HashMap::new(), &["Date"]);
    assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
}

#[test]
fn test_no_index_key_is_schema_mismatch() {
    let empty: [&str; 0] = [];
    let result = normalize(ohlc_table(), &HashMap::new(), &empty);
    assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
}

#[test]
fn test_rename_collision_is_schema_mismatch() {
    let rename = HashMap::from([("1. open".to_string(), "2. high".to_string())]);
    let result = normalize(ohlc_table(), &rename, &["date"]);
    assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
}

#[test]
fn test_duplicate_composite_key() {
    let table = Table::from_rows(
        cols(&["SIC1", "YEAR", "FIRMS"]),
        vec![
            vec![Cell::text("07"), Cell::Int(2001), Cell::Int(1)],
            vec![Cell::text("20"), Cell::Int(2001), Cell::Int(2)],
            vec![Cell::text("07"), Cell::Int(2001), Cell::Int(3)],
        ],
    )
    .unwrap();

    let err = normalize(table, &HashMap::new(), &["SIC1", "YEAR"]).unwrap_err();
    match err {
        Error::DuplicateIndexKey { key } => assert_eq!(key, "(07, 2001)"),
        other => panic!("expected DuplicateIndexKey, got {other:?}"),
    }
}

#[test]
fn test_composite_key_lookup() {
    let table = Table::from_rows(
        cols(&["SIC1", "YEAR", "FIRMS"]),
        vec![
            vec![Cell::text("20"), Cell::Int(2002), Cell::Int(4)],
            vec![Cell::text("07"), Cell::Int(2002), Cell::Int(2)],
            vec![Cell::text("07"), Cell::Int(2001), Cell::Int(1)],
        ],
    )
    .unwrap();

    let canonical = normalize(table, &HashMap::new(), &["SIC1", "YEAR"]).unwrap();

    assert_eq!(
        canonical.key(0),
        Some(vec![&Cell::text("07"), &Cell::Int(2001)])
    );
    let row = canonical
        .lookup(&[Cell::text("20"), Cell::Int(2002)])
        .unwrap();
    assert_eq!(row[2], Cell::Int(4));
    assert!(canonical.lookup(&[Cell::text("52"), Cell::Int(2002)]).is_none());
}

#[test]
fn test_schema_map_apply() {
    let table = Table::from_rows(
        cols(&["sic1", "firms", "year2", "us"]),
        vec![
            vec![Cell::text("20"), Cell::text("5"), Cell::Int(2001), Cell::text("1")],
            vec![Cell::text("07"), Cell::text("x"), Cell::Int(2001), Cell::text("1")],
        ],
    )
    .unwrap();

    let rules = SchemaMap::indexed_by(&["SIC1", "YEAR"])
        .rename("year2", "YEAR")
        .numeric(&["firms"])
        .drop_columns(&["us"])
        .uppercase();

    let canonical = rules.apply(table).unwrap();

    assert_eq!(canonical.columns(), &cols(&["SIC1", "FIRMS", "YEAR"])[..]);
    assert_eq!(canonical.get(0, "SIC1"), Some(&Cell::text("07")));
    assert!(canonical.get(0, "FIRMS").unwrap().is_missing());
    assert_eq!(canonical.get(1, "FIRMS"), Some(&Cell::Int(5)));
}

#[test]
fn test_retain_between() {
    let table = Table::from_rows(
        cols(&["YEAR"]),
        (2000..2010).map(|y| vec![Cell::Int(y)]).collect(),
    )
    .unwrap();
    let mut canonical = normalize(table, &HashMap::new(), &["YEAR"]).unwrap();

    canonical.retain_between("YEAR", Some(&Cell::Int(2003)), Some(&Cell::Int(2005)));

    assert_eq!(canonical.len(), 3);
    assert_eq!(canonical.get(0, "YEAR"), Some(&Cell::Int(2003)));
}

proptest! {
    #[test]
    fn prop_output_strictly_ascending(
        keys in proptest::collection::hash_set((0i64..20, 1990i32..2030), 0..60)
    ) {
        let rows = keys
            .iter()
            .map(|(cat, year)| vec![Cell::Int(*cat), Cell::from(*year)])
            .collect();
        let table = Table::from_rows(cols(&["CAT", "YEAR"]), rows).unwrap();

        let canonical = normalize(table, &HashMap::new(), &["CAT", "YEAR"]).unwrap();

        prop_assert_eq!(canonical.len(), keys.len());
        for i in 1..canonical.len() {
            prop_assert!(canonical.key(i - 1).unwrap() < canonical.key(i).unwrap());
        }
    }
}
