//! Record-to-entry encoding.
//!
//! A [`Layout`] fixes how source records become measurement entries: which
//! measurement they land in, which constant tags every entry carries, and
//! which record columns become fields of which kind. The same layout applied
//! to every record of a source yields a uniform series, which is what makes
//! the output queryable.
//!
//! # Example
//!
//! ```rust
//! use downlink::{FieldSpec, Layout, Record, Scalar, Timestamp};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let layout = Layout::new("coordinates")
//!     .tag("type", "TELEM")
//!     .field(FieldSpec::float("latitude"))
//!     .field(FieldSpec::float("longitude"));
//!
//! let record = Record::new(Timestamp::Nanos(1_621_946_700_000_000_000))
//!     .with("latitude", Scalar::Float(10.5))
//!     .with("longitude", Scalar::Float(20.5));
//!
//! let point = layout.encode(&record)?;
//! assert_eq!(
//!     point.to_line()?,
//!     "coordinates,type=TELEM latitude=10.5,longitude=20.5 1621946700000000000"
//! );
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EncodingError, Result};
use crate::point::{FieldValue, Point};
use crate::source::{Record, Scalar};

/// The wire type a layout assigns to a field column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// 64-bit float. Integer record values are widened.
    Float,
    /// Signed 64-bit integer.
    Integer,
    /// Boolean.
    Boolean,
    /// UTF-8 text.
    Text,
}

impl FieldKind {
    /// Short name of the kind, used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Text => "text",
        }
    }
}

/// One field column a layout extracts from records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// The record column to read.
    pub column: String,
    /// The wire type to encode it as.
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Creates a field spec.
    pub fn new(column: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            column: column.into(),
            kind,
        }
    }

    /// Shorthand for a float field.
    pub fn float(column: impl Into<String>) -> Self {
        Self::new(column, FieldKind::Float)
    }

    /// Shorthand for an integer field.
    pub fn integer(column: impl Into<String>) -> Self {
        Self::new(column, FieldKind::Integer)
    }

    /// Shorthand for a boolean field.
    pub fn boolean(column: impl Into<String>) -> Self {
        Self::new(column, FieldKind::Boolean)
    }

    /// Shorthand for a text field.
    pub fn text(column: impl Into<String>) -> Self {
        Self::new(column, FieldKind::Text)
    }
}

/// How records of one source map onto measurement entries.
///
/// With no field specs, every record value is encoded under its column name
/// at its inferred type. With field specs, exactly those columns are encoded,
/// in spec order, and each record must supply them all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    /// Measurement every entry lands in.
    pub measurement: String,

    /// Constant tags stamped onto every entry.
    #[serde(default)]
    pub tags: Vec<(String, String)>,

    /// Field columns to extract, in output order. Empty means take every
    /// record value as-is.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl Layout {
    /// Starts a layout for the given measurement.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Adds a constant tag.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Adds a field column.
    #[must_use]
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Encodes one record into a measurement entry.
    ///
    /// The entry carries the layout's measurement and tags, the record's
    /// values as fields, and the record's timestamp.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodingError`] if a required column is absent from the
    /// record, a value does not match its declared kind, or the finished
    /// entry fails validation (no fields, non-finite float, bad names).
    pub fn encode(&self, record: &Record) -> Result<Point> {
        let mut point = Point::new(&self.measurement);
        for (key, value) in &self.tags {
            point = point.tag(key, value);
        }

        if self.fields.is_empty() {
            for (column, scalar) in record.values() {
                point = point.field(column, natural(scalar));
            }
        } else {
            for spec in &self.fields {
                let scalar = record.get(&spec.column).ok_or_else(|| {
                    EncodingError::MissingField {
                        field: spec.column.clone(),
                    }
                })?;
                point = point.field(&spec.column, coerce(&spec.column, scalar, spec.kind)?);
            }
        }

        point = point.timestamp(*record.timestamp());
        point.validate()?;
        Ok(point)
    }
}

/// The field value a scalar becomes when no kind is declared.
fn natural(scalar: &Scalar) -> FieldValue {
    match scalar {
        Scalar::Float(v) => FieldValue::Float(*v),
        Scalar::Integer(v) => FieldValue::Integer(*v),
        Scalar::Boolean(b) => FieldValue::Boolean(*b),
        Scalar::Text(s) => FieldValue::String(s.clone()),
    }
}

/// Converts a scalar to the declared kind, widening integers to floats.
fn coerce(column: &str, scalar: &Scalar, kind: FieldKind) -> Result<FieldValue> {
    #[allow(clippy::cast_precision_loss)] // source integers are far below 2^52
    let value = match (kind, scalar) {
        (FieldKind::Float, Scalar::Float(v)) => FieldValue::Float(*v),
        (FieldKind::Float, Scalar::Integer(v)) => FieldValue::Float(*v as f64),
        (FieldKind::Integer, Scalar::Integer(v)) => FieldValue::Integer(*v),
        (FieldKind::Boolean, Scalar::Boolean(b)) => FieldValue::Boolean(*b),
        (FieldKind::Text, Scalar::Text(s)) => FieldValue::String(s.clone()),
        (expected, found) => {
            return Err(EncodingError::FieldType {
                field: column.to_string(),
                expected: expected.name(),
                found: found.kind(),
            }
            .into());
        }
    };
    Ok(value)
}
