//! Range queries and tabular response decoding.
//!
//! A [`RangeQuery`] builds the small Flux scripts this pipeline needs: a
//! bucket, a time range, and optional equality filters on measurement and
//! field. The store answers with annotated CSV; [`QueryRows`] walks that
//! stream lazily, using the `#datatype` annotation to give each cell its
//! native type, and yields one [`FluxRecord`] per row.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use downlink::RangeQuery;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let flux = RangeQuery::last(Duration::from_secs(60))
//!     .measurement("coordinates")
//!     .to_flux("Telemetry")?;
//!
//! assert_eq!(
//!     flux,
//!     "from(bucket: \"Telemetry\")\n    |> range(start: -60s)\n    |> filter(fn: (r) => r._measurement == \"coordinates\")"
//! );
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io::BufRead;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{QueryError, Result};
use crate::source::split_row;

/// One endpoint of a query's time range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FluxTime {
    /// A look-back offset from now, rendered as `-60s` or `-1500ms`.
    Ago(Duration),
    /// An absolute instant, rendered as an RFC 3339 literal.
    At(DateTime<Utc>),
}

impl FluxTime {
    fn render(&self) -> String {
        match self {
            Self::Ago(d) => {
                if d.subsec_nanos() == 0 {
                    format!("-{}s", d.as_secs())
                } else {
                    format!("-{}ms", d.as_millis().max(1))
                }
            }
            Self::At(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }
}

/// A range/filter query against one bucket.
///
/// Renders to a Flux script of the shape the original ingestion tooling
/// used: `from |> range |> filter`, filters included only when set.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    start: FluxTime,
    stop: Option<FluxTime>,
    measurement: Option<String>,
    field: Option<String>,
}

impl RangeQuery {
    /// Starts a query with an explicit range start.
    pub fn new(start: FluxTime) -> Self {
        Self {
            start,
            stop: None,
            measurement: None,
            field: None,
        }
    }

    /// Starts a query covering the last `window` of data.
    pub fn last(window: Duration) -> Self {
        Self::new(FluxTime::Ago(window))
    }

    /// Bounds the range on the right; unbounded means "up to now".
    #[must_use]
    pub fn stop(mut self, stop: FluxTime) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Keeps only rows from this measurement.
    #[must_use]
    pub fn measurement(mut self, measurement: impl Into<String>) -> Self {
        self.measurement = Some(measurement.into());
        self
    }

    /// Keeps only rows for this field.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Renders the query as a Flux script against the given bucket.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidRange`] for an empty or inverted range
    /// and [`QueryError::InvalidFilter`] for an empty bucket name.
    pub fn to_flux(&self, bucket: &str) -> Result<String> {
        self.validate(bucket)?;

        let mut flux = format!("from(bucket: \"{}\")", escape_flux(bucket));

        flux.push_str("\n    |> range(start: ");
        flux.push_str(&self.start.render());
        if let Some(stop) = &self.stop {
            flux.push_str(", stop: ");
            flux.push_str(&stop.render());
        }
        flux.push(')');

        if let Some(measurement) = &self.measurement {
            flux.push_str(&format!(
                "\n    |> filter(fn: (r) => r._measurement == \"{}\")",
                escape_flux(measurement)
            ));
        }
        if let Some(field) = &self.field {
            flux.push_str(&format!(
                "\n    |> filter(fn: (r) => r._field == \"{}\")",
                escape_flux(field)
            ));
        }

        Ok(flux)
    }

    fn validate(&self, bucket: &str) -> Result<()> {
        if bucket.trim().is_empty() {
            return Err(QueryError::InvalidFilter {
                reason: "bucket name is empty".to_string(),
            }
            .into());
        }

        if let FluxTime::Ago(window) = self.start
            && window.is_zero()
        {
            return Err(QueryError::InvalidRange {
                reason: "look-back window is zero".to_string(),
            }
            .into());
        }

        match (&self.start, &self.stop) {
            (FluxTime::At(start), Some(FluxTime::At(stop))) if stop <= start => {
                Err(QueryError::InvalidRange {
                    reason: format!("stop {stop} is not after start {start}"),
                }
                .into())
            }
            (FluxTime::Ago(start), Some(FluxTime::Ago(stop))) if stop >= start => {
                Err(QueryError::InvalidRange {
                    reason: "stop look-back reaches at or before start".to_string(),
                }
                .into())
            }
            _ => Ok(()),
        }
    }
}

/// Escapes a value for use inside a double-quoted Flux string literal.
fn escape_flux(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// A typed cell from a query response.
///
/// Variant names follow the response's `#datatype` annotation vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum FluxValue {
    /// `string` (also used for datatypes this crate does not interpret).
    String(String),
    /// `double`.
    Double(f64),
    /// `long`.
    Long(i64),
    /// `unsignedLong`.
    UnsignedLong(u64),
    /// `boolean`.
    Boolean(bool),
    /// `dateTime:RFC3339`.
    Time(DateTime<Utc>),
}

impl FluxValue {
    /// The value as a float, widening integer types.
    pub fn as_f64(&self) -> Option<f64> {
        #[allow(clippy::cast_precision_loss)] // row counts and ids, far below 2^52
        match self {
            Self::Double(v) => Some(*v),
            Self::Long(v) => Some(*v as f64),
            Self::UnsignedLong(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// The value as a string slice, for [`FluxValue::String`] only.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a boolean, for [`FluxValue::Boolean`] only.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The value as an instant, for [`FluxValue::Time`] only.
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for FluxValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Double(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::UnsignedLong(v) => write!(f, "{v}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Time(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

/// One decoded response row.
///
/// The store's reserved columns are reachable through the named accessors;
/// everything else (tags, `table`, `result`) through [`FluxRecord::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct FluxRecord {
    values: Vec<(String, FluxValue)>,
}

impl FluxRecord {
    /// Looks up a column by name.
    pub fn get(&self, column: &str) -> Option<&FluxValue> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// The row's `_value` column.
    pub fn value(&self) -> Option<&FluxValue> {
        self.get("_value")
    }

    /// The row's `_field` column.
    pub fn field(&self) -> Option<&str> {
        self.get("_field").and_then(FluxValue::as_str)
    }

    /// The row's `_measurement` column.
    pub fn measurement(&self) -> Option<&str> {
        self.get("_measurement").and_then(FluxValue::as_str)
    }

    /// The row's `_time` column.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.get("_time").and_then(FluxValue::as_time)
    }

    /// All columns, in response order.
    pub fn columns(&self) -> &[(String, FluxValue)] {
        &self.values
    }
}

/// Lazy decoder for an annotated CSV response stream.
///
/// Rows are decoded as they are pulled, so large results never sit in memory
/// whole. An empty response yields no rows; store-side failures embedded in
/// the stream surface as [`QueryError::Server`].
#[derive(Debug)]
pub struct QueryRows<R> {
    reader: R,
    line: u64,
    columns: Vec<String>,
    datatypes: Vec<String>,
    defaults: Vec<String>,
}

impl<R: BufRead> QueryRows<R> {
    /// Wraps a response body (or any reader carrying the same format).
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            columns: Vec::new(),
            datatypes: Vec::new(),
            defaults: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for QueryRows<R> {
    type Item = Result<FluxRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut buf = String::new();
            self.line += 1;
            match self.reader.read_line(&mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(source) => return Some(Err(QueryError::Body { source }.into())),
            }

            let row = buf.trim_end_matches(['\n', '\r']);
            if row.is_empty() {
                // Table boundary: the next table announces its own annotations.
                self.columns.clear();
                self.datatypes.clear();
                self.defaults.clear();
                continue;
            }

            let cells = split_row(row, ',');
            let (marker, payload): (&str, &[String]) = match cells.first() {
                Some(first) if first.starts_with('#') => (first.as_str(), &cells[1..]),
                Some(first) if first.is_empty() => ("", &cells[1..]),
                // Dialects without an annotation column put data in cell 0.
                _ => ("", &cells[..]),
            };

            match marker {
                "#datatype" => {
                    self.datatypes = payload.to_vec();
                    continue;
                }
                "#default" => {
                    self.defaults = payload.to_vec();
                    continue;
                }
                m if m.starts_with('#') => continue,
                _ => {}
            }

            if self.columns.is_empty() {
                self.columns = payload.to_vec();
                continue;
            }

            // The store reports mid-stream failures as an error,reference table.
            if self.columns.first().map(String::as_str) == Some("error") {
                let message = payload.first().cloned().unwrap_or_default();
                return Some(Err(QueryError::Server { message }.into()));
            }

            if payload.len() != self.columns.len() {
                return Some(Err(QueryError::Decode {
                    line: self.line,
                    reason: format!(
                        "expected {} cells, found {}",
                        self.columns.len(),
                        payload.len()
                    ),
                }
                .into()));
            }

            let mut values = Vec::with_capacity(payload.len());
            for (i, cell) in payload.iter().enumerate() {
                let cell = if cell.is_empty() {
                    self.defaults.get(i).map(String::as_str).unwrap_or("")
                } else {
                    cell.as_str()
                };
                let datatype = self.datatypes.get(i).map(String::as_str).unwrap_or("string");

                match decode_cell(cell, datatype) {
                    Ok(Some(value)) => values.push((self.columns[i].clone(), value)),
                    Ok(None) => {}
                    Err(reason) => {
                        return Some(Err(QueryError::Decode {
                            line: self.line,
                            reason: format!("column '{}': {reason}", self.columns[i]),
                        }
                        .into()));
                    }
                }
            }

            return Some(Ok(FluxRecord { values }));
        }
    }
}

/// Decodes one cell according to its `#datatype` annotation. An empty cell
/// (after default substitution) means the column is absent for this row.
fn decode_cell(cell: &str, datatype: &str) -> std::result::Result<Option<FluxValue>, String> {
    if cell.is_empty() {
        return Ok(None);
    }

    let value = match datatype {
        "double" => FluxValue::Double(
            cell.parse::<f64>()
                .map_err(|e| format!("bad double {cell:?}: {e}"))?,
        ),
        "long" => FluxValue::Long(
            cell.parse::<i64>()
                .map_err(|e| format!("bad long {cell:?}: {e}"))?,
        ),
        "unsignedLong" => FluxValue::UnsignedLong(
            cell.parse::<u64>()
                .map_err(|e| format!("bad unsignedLong {cell:?}: {e}"))?,
        ),
        "boolean" => match cell {
            "true" => FluxValue::Boolean(true),
            "false" => FluxValue::Boolean(false),
            _ => return Err(format!("bad boolean {cell:?}")),
        },
        dt if dt.starts_with("dateTime") => FluxValue::Time(
            DateTime::parse_from_rfc3339(cell)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| format!("bad timestamp {cell:?}: {e}"))?,
        ),
        // string, duration, base64Binary and anything newer stay text.
        _ => FluxValue::String(cell.to_string()),
    };

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::error::DownlinkError;

    const SINGLE_TABLE: &str = "\
#group,false,false,true,true,false,false,true,true,true
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string
#default,_result,,,,,,,,
,result,table,_start,_stop,_time,_value,_field,_measurement,host
,,0,2021-05-26T12:00:00Z,2021-05-26T13:00:00Z,2021-05-26T12:45:00Z,23.43234543,used_percent,mem,host1
";

    fn rows(body: &str) -> Vec<Result<FluxRecord>> {
        QueryRows::new(Cursor::new(body.to_string())).collect()
    }

    #[test]
    fn test_flux_time_render() {
        assert_eq!(FluxTime::Ago(Duration::from_secs(60)).render(), "-60s");
        assert_eq!(FluxTime::Ago(Duration::from_millis(1500)).render(), "-1500ms");

        let dt = "2021-05-26T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(FluxTime::At(dt).render(), "2021-05-26T12:00:00Z");
    }

    #[test]
    fn test_to_flux_range_only() {
        let flux = RangeQuery::last(Duration::from_secs(60)).to_flux("Telemetry").unwrap();
        assert_eq!(flux, "from(bucket: \"Telemetry\")\n    |> range(start: -60s)");
    }

    #[test]
    fn test_to_flux_full_filters() {
        let start = "2021-05-26T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let stop = "2021-05-26T13:00:00Z".parse::<DateTime<Utc>>().unwrap();

        let flux = RangeQuery::new(FluxTime::At(start))
            .stop(FluxTime::At(stop))
            .measurement("coordinates")
            .field("latitude")
            .to_flux("Telemetry")
            .unwrap();

        assert_eq!(
            flux,
            "from(bucket: \"Telemetry\")\n    \
             |> range(start: 2021-05-26T12:00:00Z, stop: 2021-05-26T13:00:00Z)\n    \
             |> filter(fn: (r) => r._measurement == \"coordinates\")\n    \
             |> filter(fn: (r) => r._field == \"latitude\")"
        );
    }

    #[test]
    fn test_to_flux_escapes_quotes() {
        let flux = RangeQuery::last(Duration::from_secs(1))
            .measurement("odd\"name")
            .to_flux("Telemetry")
            .unwrap();
        assert!(flux.contains("r._measurement == \"odd\\\"name\""));
    }

    #[test]
    fn test_validate_rejects_empty_bucket() {
        let err = RangeQuery::last(Duration::from_secs(1)).to_flux("  ").unwrap_err();
        assert!(matches!(
            err,
            DownlinkError::Query(QueryError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let err = RangeQuery::last(Duration::ZERO).to_flux("Telemetry").unwrap_err();
        assert!(matches!(
            err,
            DownlinkError::Query(QueryError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let start = "2021-05-26T13:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let stop = "2021-05-26T12:00:00Z".parse::<DateTime<Utc>>().unwrap();

        let err = RangeQuery::new(FluxTime::At(start))
            .stop(FluxTime::At(stop))
            .to_flux("Telemetry")
            .unwrap_err();
        assert!(matches!(
            err,
            DownlinkError::Query(QueryError::InvalidRange { .. })
        ));

        let err = RangeQuery::last(Duration::from_secs(30))
            .stop(FluxTime::Ago(Duration::from_secs(60)))
            .to_flux("Telemetry")
            .unwrap_err();
        assert!(matches!(
            err,
            DownlinkError::Query(QueryError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_decode_single_table() {
        let rows = rows(SINGLE_TABLE);
        assert_eq!(rows.len(), 1);

        let record = rows[0].as_ref().unwrap();
        assert_eq!(record.measurement(), Some("mem"));
        assert_eq!(record.field(), Some("used_percent"));
        assert_eq!(record.value(), Some(&FluxValue::Double(23.43234543)));
        assert_eq!(
            record.time().unwrap(),
            "2021-05-26T12:45:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(record.get("host"), Some(&FluxValue::String("host1".to_string())));
        assert_eq!(record.get("table"), Some(&FluxValue::Long(0)));
    }

    #[test]
    fn test_decode_applies_defaults() {
        let rows = rows(SINGLE_TABLE);
        let record = rows[0].as_ref().unwrap();
        // The result cell is empty; #default fills it in.
        assert_eq!(record.get("result"), Some(&FluxValue::String("_result".to_string())));
    }

    #[test]
    fn test_decode_multiple_tables() {
        let body = format!(
            "{SINGLE_TABLE}\n\
             #datatype,string,long,dateTime:RFC3339,double,string,string\n\
             #default,_result,,,,,\n\
             ,result,table,_time,_value,_field,_measurement\n\
             ,,1,2021-05-26T12:46:00Z,0.5,usage,cpu\n"
        );

        let rows = rows(&body);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].as_ref().unwrap().measurement(), Some("cpu"));
    }

    #[test]
    fn test_decode_empty_body_yields_nothing() {
        assert!(rows("").is_empty());
        assert!(rows("\n\n").is_empty());
    }

    #[test]
    fn test_decode_header_only_yields_nothing() {
        let body = "\
#datatype,string,long
#default,_result,
,result,table
";
        assert!(rows(body).is_empty());
    }

    #[test]
    fn test_decode_error_table() {
        let body = "\
#datatype,string,string
,error,reference
,compilation failed: loc 1:1: undefined identifier,
";
        let rows = rows(body);
        assert_eq!(rows.len(), 1);
        match rows[0].as_ref().unwrap_err() {
            DownlinkError::Query(QueryError::Server { message }) => {
                assert!(message.contains("compilation failed"));
            }
            other => panic!("expected Server error, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_bad_cell() {
        let body = "\
#datatype,string,long,double
#default,_result,,
,result,table,_value
,,0,not-a-number
";
        let rows = rows(body);
        assert!(matches!(
            rows[0].as_ref().unwrap_err(),
            DownlinkError::Query(QueryError::Decode { line: 4, .. })
        ));
    }

    #[test]
    fn test_decode_width_mismatch() {
        let body = "\
#datatype,string,long
#default,_result,
,result,table
,,0,extra
";
        let rows = rows(body);
        assert!(matches!(
            rows[0].as_ref().unwrap_err(),
            DownlinkError::Query(QueryError::Decode { .. })
        ));
    }

    #[test]
    fn test_quoted_cells() {
        let body = "\
#datatype,string,long,string
#default,_result,,
,result,table,note
,,0,\"a, quoted \"\"cell\"\"\"
";
        let rows = rows(body);
        let record = rows[0].as_ref().unwrap();
        assert_eq!(
            record.get("note"),
            Some(&FluxValue::String("a, quoted \"cell\"".to_string()))
        );
    }

    #[test]
    fn test_flux_value_accessors() {
        assert_eq!(FluxValue::Double(1.5).as_f64(), Some(1.5));
        assert_eq!(FluxValue::Long(-3).as_f64(), Some(-3.0));
        assert_eq!(FluxValue::UnsignedLong(7).as_f64(), Some(7.0));
        assert_eq!(FluxValue::String("x".to_string()).as_f64(), None);
        assert_eq!(FluxValue::Boolean(true).as_bool(), Some(true));
        assert_eq!(FluxValue::String("x".to_string()).as_str(), Some("x"));
    }

    #[test]
    fn test_flux_value_display() {
        assert_eq!(FluxValue::Double(23.5).to_string(), "23.5");
        assert_eq!(FluxValue::Long(-3).to_string(), "-3");
        assert_eq!(FluxValue::Boolean(false).to_string(), "false");
        assert_eq!(FluxValue::String("x".to_string()).to_string(), "x");
    }
}
