//! Integration tests for the full ingestion flow.
//!
//! These tests exercise the complete path from a source file on disk
//! through schema validation, record iteration, and entry encoding,
//! plus the writer behavior that can be observed without a live store.

use downlink::{
    Client, CsvSource, Destination, DownlinkError, EncodingError, FieldSpec, Layout, Point,
    Precision, SchemaError, SourceSchema, WriteError, WriteMode, WriteOptions,
};
use tempfile::tempdir;

const TELEMETRY_CSV: &str = "\
pos_eci_x,pos_eci_y,pos_eci_z,latitude,longitude,datetime
1.0,2.0,3.0,10.5,20.5,2021-05-26T12:45:00Z
4.0,5.0,6.0,-10.5,-20.5,2021-05-26T12:45:30Z
";

/// Helper to create the standard telemetry source schema for tests.
fn telemetry_schema() -> SourceSchema {
    SourceSchema::new("datetime")
        .require("pos_eci_x")
        .require("pos_eci_y")
        .require("pos_eci_z")
        .require("latitude")
        .require("longitude")
}

/// Helper to create the standard telemetry entry layout for tests.
fn telemetry_layout() -> Layout {
    Layout::new("coordinates")
        .tag("type", "TELEM")
        .field(FieldSpec::float("pos_eci_x"))
        .field(FieldSpec::float("pos_eci_y"))
        .field(FieldSpec::float("pos_eci_z"))
        .field(FieldSpec::float("latitude"))
        .field(FieldSpec::float("longitude"))
}

/// A client whose destination is never contacted; for pre-network checks.
fn offline_client() -> Client {
    let dest = Destination::new("http://localhost:9999", "test-token", "test-org", "Telemetry");
    Client::connect(dest).unwrap()
}

#[test]
fn test_csv_to_line_protocol() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("telemetry.csv");
    std::fs::write(&path, TELEMETRY_CSV).unwrap();

    let source = CsvSource::open(&path, telemetry_schema()).unwrap();
    let layout = telemetry_layout();

    let lines: Vec<String> = source
        .records()
        .unwrap()
        .map(|record| layout.encode(&record.unwrap()).unwrap().to_line().unwrap())
        .collect();

    assert_eq!(
        lines,
        vec![
            "coordinates,type=TELEM pos_eci_x=1.0,pos_eci_y=2.0,pos_eci_z=3.0,\
             latitude=10.5,longitude=20.5 2021-05-26T12:45:00Z",
            "coordinates,type=TELEM pos_eci_x=4.0,pos_eci_y=5.0,pos_eci_z=6.0,\
             latitude=-10.5,longitude=-20.5 2021-05-26T12:45:30Z",
        ]
    );
}

#[test]
fn test_precision_converts_timestamps() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("telemetry.csv");
    std::fs::write(&path, TELEMETRY_CSV).unwrap();

    let source = CsvSource::open(&path, telemetry_schema()).unwrap();
    let record = source.records().unwrap().next().unwrap().unwrap();
    let point = telemetry_layout().encode(&record).unwrap();

    // 2021-05-26T12:45:00Z is 1622033100 seconds after the epoch.
    let ns = point.to_line_with_precision(Precision::Nanoseconds).unwrap();
    assert!(ns.ends_with(" 1622033100000000000"), "got: {ns}");

    let s = point.to_line_with_precision(Precision::Seconds).unwrap();
    assert!(s.ends_with(" 1622033100"), "got: {s}");
}

#[test]
fn test_source_is_restartable() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("telemetry.csv");
    std::fs::write(&path, TELEMETRY_CSV).unwrap();

    let source = CsvSource::open(&path, telemetry_schema()).unwrap();

    let first: Vec<_> = source.records().unwrap().map(Result::unwrap).collect();
    let second: Vec<_> = source.records().unwrap().map(Result::unwrap).collect();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[test]
fn test_missing_columns_fail_before_any_row() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("partial.csv");
    std::fs::write(&path, "pos_eci_x,datetime\n1.0,2021-05-26T12:45:00Z\n").unwrap();

    let err = CsvSource::open(&path, telemetry_schema()).unwrap_err();
    match err {
        DownlinkError::Schema(SchemaError::MissingColumns { missing }) => {
            assert_eq!(
                missing,
                ["pos_eci_y", "pos_eci_z", "latitude", "longitude"]
            );
        }
        other => panic!("expected MissingColumns, got {other:?}"),
    }
}

#[test]
fn test_bad_row_does_not_stop_iteration() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("ragged.csv");
    std::fs::write(
        &path,
        "value,datetime\n\
         1.5,2021-05-26T12:45:00Z\n\
         2.5,2021-05-26T12:45:10Z,extra\n\
         3.5,2021-05-26T12:45:20Z\n",
    )
    .unwrap();

    let source = CsvSource::open(&path, SourceSchema::new("datetime").require("value")).unwrap();
    let results: Vec<_> = source.records().unwrap().collect();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(
        results[1].as_ref().unwrap_err(),
        DownlinkError::Schema(SchemaError::RowWidth { line: 2, .. })
    ));
    assert!(results[2].is_ok());
}

#[test]
fn test_quoted_text_survives_to_line_protocol() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("notes.csv");
    std::fs::write(
        &path,
        "note,datetime\n\"hello, world\",2021-05-26T12:45:00Z\n",
    )
    .unwrap();

    let source = CsvSource::open(&path, SourceSchema::new("datetime").require("note")).unwrap();
    let record = source.records().unwrap().next().unwrap().unwrap();

    // No field specs: every remaining column keeps its inferred type.
    let line = Layout::new("events").encode(&record).unwrap().to_line().unwrap();
    assert_eq!(line, "events note=\"hello, world\" 2021-05-26T12:45:00Z");
}

#[test]
fn test_layout_reports_missing_field_column() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("telemetry.csv");
    std::fs::write(&path, TELEMETRY_CSV).unwrap();

    let source = CsvSource::open(&path, telemetry_schema()).unwrap();
    let record = source.records().unwrap().next().unwrap().unwrap();

    let layout = Layout::new("coordinates").field(FieldSpec::float("altitude"));
    let err = layout.encode(&record).unwrap_err();
    match err {
        DownlinkError::Encoding(EncodingError::MissingField { field }) => {
            assert_eq!(field, "altitude");
        }
        other => panic!("expected MissingField, got {other:?}"),
    }
}

#[test]
fn test_empty_batch_rejected_before_any_request() {
    let client = offline_client();
    let err = client.write(Vec::<Point>::new()).unwrap_err();
    assert!(matches!(
        err,
        DownlinkError::Write(WriteError::EmptyBatch)
    ));
}

#[test]
fn test_buffered_writer_holds_rows_below_capacity() {
    let client = offline_client();
    let options = WriteOptions::new().with_mode(WriteMode::Buffered { capacity: 100 });
    let mut writer = client.writer(options);

    let accepted = writer
        .write(vec![
            Point::new("mem").field("used_percent", 23.4).timestamp(1_000_000_000.into()),
            Point::new("mem").field("used_percent", 23.5).timestamp(2_000_000_000.into()),
        ])
        .unwrap();

    // Below capacity nothing is sent, so no request ever reaches the
    // (nonexistent) destination.
    assert_eq!(accepted, 2);
    assert_eq!(writer.pending(), 2);
}

#[test]
fn test_raw_lines_match_encoded_points() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("telemetry.csv");
    std::fs::write(&path, TELEMETRY_CSV).unwrap();

    let source = CsvSource::open(&path, telemetry_schema()).unwrap();
    let layout = telemetry_layout();

    // Pre-rendered lines and encoded points are interchangeable payloads:
    // rendering the points yields exactly the raw lines.
    let raw = [
        "coordinates,type=TELEM pos_eci_x=1.0,pos_eci_y=2.0,pos_eci_z=3.0,\
         latitude=10.5,longitude=20.5 2021-05-26T12:45:00Z",
        "coordinates,type=TELEM pos_eci_x=4.0,pos_eci_y=5.0,pos_eci_z=6.0,\
         latitude=-10.5,longitude=-20.5 2021-05-26T12:45:30Z",
    ];

    for (record, expected) in source.records().unwrap().zip(raw) {
        let point = layout.encode(&record.unwrap()).unwrap();
        assert_eq!(point.to_line().unwrap(), expected);
    }
}
