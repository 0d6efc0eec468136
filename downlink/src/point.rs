//! Measurement entries: the unit of data the store ingests.
//!
//! A [`Point`] names a measurement, carries optional tags (indexed metadata),
//! one or more typed fields (the payload), and an optional timestamp. Points
//! are built fluently and rendered to line-protocol text by
//! [`Point::to_line`], or handed in batches to a
//! [`BatchWriter`](crate::write::BatchWriter).
//!
//! # Example
//!
//! ```rust
//! use downlink::{Point, Timestamp};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let point = Point::new("mem")
//!     .tag("host", "host1")
//!     .field("used_percent", 23.43234543)
//!     .timestamp(Timestamp::Nanos(1_621_946_700_000_000_000));
//!
//! assert_eq!(
//!     point.to_line()?,
//!     "mem,host=host1 used_percent=23.43234543 1621946700000000000"
//! );
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{EncodingError, Result};
use crate::lineproto;

/// A typed field value.
///
/// The store keeps fields typed per column; mixing types for the same field
/// within a measurement is rejected server-side. The wire rendering differs
/// per variant: floats use their natural decimal form, integers get an `i`
/// suffix, unsigned integers a `u` suffix, and strings are double-quoted.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 64-bit float. Must be finite when encoded.
    Float(f64),
    /// Signed 64-bit integer, rendered with an `i` suffix.
    Integer(i64),
    /// Unsigned 64-bit integer, rendered with a `u` suffix.
    UInteger(u64),
    /// Boolean, rendered as `true` or `false`.
    Boolean(bool),
    /// UTF-8 string, rendered double-quoted with `"` and `\` escaped.
    String(String),
}

impl FieldValue {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Integer(_) => "integer",
            Self::UInteger(_) => "unsigned integer",
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::UInteger(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Timestamp precision used on the write path.
///
/// The store interprets integer timestamps according to the precision the
/// write request declares. Defaults to nanoseconds, the store's native unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// Nanoseconds since the Unix epoch (default).
    #[default]
    Nanoseconds,
    /// Microseconds since the Unix epoch.
    Microseconds,
    /// Milliseconds since the Unix epoch.
    Milliseconds,
    /// Seconds since the Unix epoch.
    Seconds,
}

impl Precision {
    /// The value sent as the `precision` query parameter.
    pub fn query_param(self) -> &'static str {
        match self {
            Self::Nanoseconds => "ns",
            Self::Microseconds => "us",
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
        }
    }

    /// Nanoseconds per unit of this precision.
    fn nanos_per_unit(self) -> i64 {
        match self {
            Self::Nanoseconds => 1,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1_000_000,
            Self::Seconds => 1_000_000_000,
        }
    }
}

/// When an entry was observed.
///
/// Both representations survive a render/parse round trip: [`Timestamp::Nanos`]
/// renders as a bare integer, [`Timestamp::Rfc3339`] as RFC 3339 text. The
/// write path converts either form to an integer at the request's
/// [`Precision`]; entries without a timestamp are stamped by the store on
/// arrival.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timestamp {
    /// Nanoseconds since the Unix epoch.
    Nanos(i64),
    /// Wall-clock instant, rendered as RFC 3339 text (e.g. `2021-05-26T12:45:00Z`).
    Rfc3339(DateTime<Utc>),
}

impl Timestamp {
    /// The current wall-clock time in nanoseconds.
    pub fn now() -> Self {
        // timestamp_nanos_opt is in range until the year 2262.
        Self::Nanos(Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    /// Converts to an integer count of units at the given precision.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::TimestampRange`] if an RFC 3339 instant falls
    /// outside the range representable in nanoseconds.
    pub fn as_unix(&self, precision: Precision) -> Result<i64> {
        let nanos = match self {
            Self::Nanos(n) => *n,
            Self::Rfc3339(dt) => {
                dt.timestamp_nanos_opt()
                    .ok_or_else(|| EncodingError::TimestampRange {
                        value: dt.to_rfc3339(),
                    })?
            }
        };
        Ok(nanos / precision.nanos_per_unit())
    }

    /// Renders the timestamp in its natural wire form.
    pub(crate) fn render(&self) -> String {
        match self {
            Self::Nanos(n) => n.to_string(),
            Self::Rfc3339(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::Rfc3339(dt)
    }
}

impl From<i64> for Timestamp {
    /// Nanoseconds since the Unix epoch.
    fn from(nanos: i64) -> Self {
        Self::Nanos(nanos)
    }
}

/// A single measurement entry.
///
/// Tags are kept sorted by key, matching how the store indexes them; setting
/// a tag or field key twice replaces the earlier value, so keys stay unique
/// within one entry. Fields keep their insertion order, which fixes the order
/// they appear on the wire. An entry is valid once it has a non-empty
/// measurement name and at least one field; [`Point::to_line`] enforces this.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp: Option<Timestamp>,
}

impl Point {
    /// Starts an entry for the given measurement.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp: None,
        }
    }

    /// Adds a tag, replacing any earlier value for the same key.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.tags.binary_search_by(|(k, _)| k.as_str().cmp(&key)) {
            Ok(i) => self.tags[i].1 = value,
            Err(i) => self.tags.insert(i, (key, value)),
        }
        self
    }

    /// Adds a field, replacing any earlier value for the same key.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key, value));
        }
        self
    }

    /// Sets the entry's timestamp.
    #[must_use]
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// The measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Tags, sorted by key.
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    /// Fields, in insertion order.
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// The timestamp, if one was set.
    pub fn time(&self) -> Option<&Timestamp> {
        self.timestamp.as_ref()
    }

    /// Checks that the entry can be rendered to the wire.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodingError`] if the measurement name is empty or
    /// unrepresentable, the entry has no fields, a tag or field key is
    /// invalid, or a float field is not finite.
    pub fn validate(&self) -> Result<()> {
        if let Some(reason) = component_problem(&self.measurement) {
            return Err(EncodingError::InvalidMeasurement {
                name: self.measurement.clone(),
                reason: reason.to_string(),
            }
            .into());
        }

        for (key, value) in &self.tags {
            if let Some(reason) = component_problem(key).or_else(|| component_problem(value)) {
                return Err(EncodingError::InvalidTag {
                    key: key.clone(),
                    value: value.clone(),
                    reason: reason.to_string(),
                }
                .into());
            }
        }

        if self.fields.is_empty() {
            return Err(EncodingError::NoFields {
                measurement: self.measurement.clone(),
            }
            .into());
        }

        for (key, value) in &self.fields {
            if let Some(reason) = component_problem(key) {
                return Err(EncodingError::InvalidFieldKey {
                    key: key.clone(),
                    reason: reason.to_string(),
                }
                .into());
            }
            match value {
                FieldValue::Float(v) if !v.is_finite() => {
                    return Err(EncodingError::NonFiniteFloat {
                        field: key.clone(),
                        value: *v,
                    }
                    .into());
                }
                FieldValue::String(s) if s.contains(['\n', '\r']) => {
                    return Err(EncodingError::InvalidFieldValue {
                        field: key.clone(),
                        reason: "contains a line break".to_string(),
                    }
                    .into());
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Renders the entry as one line of wire text, timestamps verbatim.
    ///
    /// A [`Timestamp::Rfc3339`] timestamp stays RFC 3339 text and a
    /// [`Timestamp::Nanos`] timestamp stays a bare integer. Use
    /// [`Point::to_line_with_precision`] for the form the write endpoint
    /// expects.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodingError`] if the entry fails [`Point::validate`].
    pub fn to_line(&self) -> Result<String> {
        lineproto::render(self, None)
    }

    /// Renders the entry with its timestamp converted to an integer count of
    /// units at the given precision.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodingError`] if the entry fails [`Point::validate`] or
    /// the timestamp is out of range for the precision.
    pub fn to_line_with_precision(&self, precision: Precision) -> Result<String> {
        lineproto::render(self, Some(precision))
    }
}

/// Checks a measurement name, tag key/value, or field key for problems that
/// would break the wire format.
///
/// Backslashes pass through rendering unescaped, so one sitting directly
/// before a delimiter is indistinguishable from an escape on the wire and
/// the text could not be parsed back.
fn component_problem(s: &str) -> Option<&'static str> {
    if s.is_empty() {
        return Some("must be non-empty");
    }
    if s.ends_with('\\') {
        return Some("ends with a backslash");
    }
    if s.contains(['\n', '\r']) {
        return Some("contains a line break");
    }
    for (c, next) in s.chars().zip(s.chars().skip(1)) {
        if c == '\\' && matches!(next, ',' | '=' | ' ') {
            return Some("backslash precedes a delimiter");
        }
    }
    None
}
