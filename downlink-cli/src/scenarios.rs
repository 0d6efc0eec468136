//! Canned payload shapes shared by the convert and send commands.
//!
//! The default flags encode a coordinate CSV (ECI position plus
//! sub-satellite latitude and longitude, tagged `TELEM`, timestamped from a
//! `datetime` column). Without an input file, `sample-point` and
//! `sample-lines` write one memory reading through the two submission modes,
//! structured and raw.

use downlink::{FieldSpec, Layout, Point, SourceSchema};

/// Builds the source schema for the given time column and field columns.
pub fn schema(time_column: &str, fields: &[String]) -> SourceSchema {
    let mut schema = SourceSchema::new(time_column);
    for field in fields {
        schema = schema.require(field);
    }
    schema
}

/// Builds an entry layout from CLI arguments, parsing `KEY=VALUE` tags.
pub fn layout(measurement: &str, tags: &[String], fields: &[String]) -> Result<Layout, String> {
    let mut layout = Layout::new(measurement);
    for tag in tags {
        let (key, value) = parse_tag(tag)?;
        layout = layout.tag(key, value);
    }
    for field in fields {
        layout = layout.field(FieldSpec::float(field));
    }
    Ok(layout)
}

/// Splits a `KEY=VALUE` argument.
fn parse_tag(s: &str) -> Result<(&str, &str), String> {
    s.split_once('=')
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .ok_or_else(|| format!("bad tag '{s}': expected KEY=VALUE"))
}

/// One structured sample entry. No timestamp, so the store stamps it on
/// arrival and the rendered line matches [`sample_lines`] exactly.
pub fn sample_point() -> Point {
    Point::new("mem")
        .tag("host", "host1")
        .field("used_percent", 23.432_345_43)
}

/// The same sample as raw pre-formatted line protocol.
pub fn sample_lines() -> Vec<String> {
    vec!["mem,host=host1 used_percent=23.43234543".to_string()]
}
