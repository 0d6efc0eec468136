//! Integration tests for line protocol round trips.
//!
//! Every entry this crate renders must parse back to an equal entry, and
//! parsing a well-formed line then rendering it must reproduce the line
//! byte for byte. These tests pin that contract at the public API.

use chrono::{DateTime, Utc};
use downlink::{parse_line, DownlinkError, EncodingError, FieldValue, Point, Timestamp};

#[test]
fn test_parse_then_render_is_identity() {
    let lines = [
        "coordinates,type=TELEM pos_eci_x=1.0,pos_eci_y=2.0,pos_eci_z=3.0,\
         latitude=10.5,longitude=20.5 2021-05-26T12:45:00Z",
        "mem,host=host1 used_percent=23.43234543 1621946700000000000",
        "m f=1.5,i=-42i,u=42u,b=true,s=\"plain\" 1",
        "weather temperature=21.5",
        "disk\\ usage,mount\\ point=/var/log free\\ gb=12.0 5",
        "m s=\"say \\\"hi\\\" \\\\ bye\" 7",
        "m,path=C:\\data v=1.0 9",
    ];

    for line in lines {
        let point = parse_line(line).unwrap();
        assert_eq!(point.to_line().unwrap(), line, "round trip broke for: {line}");
    }
}

#[test]
fn test_render_then_parse_is_identity() {
    let dt = "2021-05-26T12:45:00Z".parse::<DateTime<Utc>>().unwrap();
    let point = Point::new("coordinates")
        .tag("type", "TELEM")
        .field("latitude", 10.5)
        .field("note", "clear, skies")
        .timestamp(dt.into());

    let reparsed = parse_line(&point.to_line().unwrap()).unwrap();
    assert_eq!(reparsed, point);
}

#[test]
fn test_backslash_before_delimiter_rejected_not_rendered() {
    // Rendering never escapes backslashes, so a component with a backslash
    // directly ahead of a delimiter would produce a line no parser can read
    // back. Such entries must fail up front instead of rendering.
    let point = Point::new("m").tag("path", r"a\,b").field("v", 1.0);
    let err = point.to_line().unwrap_err();
    assert!(matches!(
        err,
        DownlinkError::Encoding(EncodingError::InvalidTag { .. })
    ));

    let point = Point::new(r"disk\ stats").field("v", 1.0);
    assert!(point.to_line().is_err());

    // Backslashes ahead of ordinary text still round-trip.
    let point = Point::new("m").tag("path", r"C:\data\logs").field("v", 1.0);
    let line = point.to_line().unwrap();
    assert_eq!(parse_line(&line).unwrap(), point);
}

#[test]
fn test_parse_exposes_typed_parts() {
    let point = parse_line("mem,host=host1,region=eu used=23.5,total=100i,ok=true 42").unwrap();

    assert_eq!(point.measurement(), "mem");
    assert_eq!(
        point.tags(),
        [
            ("host".to_string(), "host1".to_string()),
            ("region".to_string(), "eu".to_string()),
        ]
    );
    assert_eq!(
        point.fields(),
        [
            ("used".to_string(), FieldValue::Float(23.5)),
            ("total".to_string(), FieldValue::Integer(100)),
            ("ok".to_string(), FieldValue::Boolean(true)),
        ]
    );
    assert_eq!(point.time(), Some(&Timestamp::Nanos(42)));
}

#[test]
fn test_parse_without_timestamp() {
    let point = parse_line("weather temperature=21.5").unwrap();
    assert_eq!(point.time(), None);
    assert_eq!(point.to_line().unwrap(), "weather temperature=21.5");
}

#[test]
fn test_parse_rejects_malformed_lines() {
    let bad = [
        "",                          // nothing at all
        "mem",                       // no fields
        "mem,host=host1",            // tags but no fields
        "mem used=",                 // empty field value
        "mem used=12 13 14",         // trailing text after the timestamp
        "mem used=\"unterminated",   // unclosed string
        "mem used=nan",              // non-finite float
    ];

    for line in bad {
        let err = parse_line(line).unwrap_err();
        assert!(
            matches!(err, DownlinkError::Encoding(EncodingError::Parse { .. })),
            "expected Parse error for {line:?}, got {err:?}"
        );
    }
}

#[test]
fn test_parse_rejects_bad_timestamp() {
    let err = parse_line("mem used=12 yesterday").unwrap_err();
    assert!(matches!(
        err,
        DownlinkError::Encoding(EncodingError::Parse { .. })
    ));
}
