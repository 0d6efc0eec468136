//! Tabular record sources.
//!
//! A [`CsvSource`] reads a delimiter-separated file whose first row names the
//! columns. Opening validates the header against a [`SourceSchema`]; the rows
//! themselves are only touched when [`CsvSource::records`] iterates them, and
//! each call to `records` starts a fresh pass over the file.
//!
//! Cell values are typed by inspection: integers before floats, then
//! booleans, then text. Empty cells mean the column is absent from that row's
//! [`Record`], which downstream encoding reports if a layout requires the
//! column.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::lineproto;
use crate::point::Timestamp;

/// A typed cell value taken from a source row.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// A value that parsed as a 64-bit float.
    Float(f64),
    /// A value that parsed as a signed 64-bit integer.
    Integer(i64),
    /// A literal `true` or `false`, any case.
    Boolean(bool),
    /// Anything else, kept verbatim.
    Text(String),
}

impl Scalar {
    /// Types a raw cell. Returns `None` for an empty cell.
    ///
    /// Integers win over floats, so `42` becomes [`Scalar::Integer`] while
    /// `42.0` becomes [`Scalar::Float`].
    pub fn infer(cell: &str) -> Option<Self> {
        if cell.is_empty() {
            return None;
        }
        if let Ok(v) = cell.parse::<i64>() {
            return Some(Self::Integer(v));
        }
        if let Ok(v) = cell.parse::<f64>() {
            return Some(Self::Float(v));
        }
        if cell.eq_ignore_ascii_case("true") {
            return Some(Self::Boolean(true));
        }
        if cell.eq_ignore_ascii_case("false") {
            return Some(Self::Boolean(false));
        }
        Some(Self::Text(cell.to_string()))
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Text(_) => "text",
        }
    }
}

/// One source row: named values plus the row's timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<(String, Scalar)>,
    timestamp: Timestamp,
}

impl Record {
    /// Creates an empty record at the given time.
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            values: Vec::new(),
            timestamp,
        }
    }

    /// Appends a named value.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: Scalar) -> Self {
        self.values.push((column.into(), value));
        self
    }

    /// Looks up a value by column name.
    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// All values, in source column order.
    pub fn values(&self) -> &[(String, Scalar)] {
        &self.values
    }

    /// When the row was observed.
    pub fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }
}

/// What a source file must look like to be usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSchema {
    /// Columns that must be present in the header.
    #[serde(default)]
    pub required: Vec<String>,

    /// Column holding each row's timestamp: a bare integer (nanoseconds) or
    /// RFC 3339 text.
    pub time_column: String,

    /// Cell delimiter, a comma unless the source says otherwise.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl SourceSchema {
    /// Creates a schema requiring only the time column.
    pub fn new(time_column: impl Into<String>) -> Self {
        Self {
            required: Vec::new(),
            time_column: time_column.into(),
            delimiter: ',',
        }
    }

    /// Adds a required column.
    #[must_use]
    pub fn require(mut self, column: impl Into<String>) -> Self {
        self.required.push(column.into());
        self
    }

    /// Changes the cell delimiter.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }
}

fn default_delimiter() -> char {
    ','
}

/// A validated handle on a delimiter-separated source file.
///
/// Opening reads and checks the header only. Rows are pulled lazily by the
/// iterator [`CsvSource::records`] returns, and every call starts over from
/// the first data row.
///
/// # Example
///
/// ```rust,no_run
/// use downlink::{CsvSource, SourceSchema};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let schema = SourceSchema::new("datetime").require("latitude").require("longitude");
/// let source = CsvSource::open("telemetry.csv", schema)?;
///
/// for record in source.records()? {
///     let record = record?;
///     println!("{:?} @ {:?}", record.get("latitude"), record.timestamp());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CsvSource {
    path: PathBuf,
    schema: SourceSchema,
    header: Vec<String>,
    time_index: usize,
}

impl CsvSource {
    /// Opens a source file and validates its header against the schema.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the file cannot be opened or read, has no
    /// header row, repeats a column name, or lacks the schema's required
    /// columns or time column.
    pub fn open<P: AsRef<Path>>(path: P, schema: SourceSchema) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let display = path.display().to_string();

        let file = File::open(&path).map_err(|source| SchemaError::Open {
            path: display.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        let mut first = String::new();
        let bytes = reader
            .read_line(&mut first)
            .map_err(|source| SchemaError::Read {
                path: display.clone(),
                source,
            })?;
        let first = first.trim_end_matches(['\n', '\r']);
        // Some exporters prefix the header with a byte order mark.
        let first = first.strip_prefix('\u{feff}').unwrap_or(first);
        if bytes == 0 || first.is_empty() {
            return Err(SchemaError::MissingHeader { path: display }.into());
        }

        let header: Vec<String> = split_row(first, schema.delimiter)
            .into_iter()
            .map(|name| name.trim().to_string())
            .collect();

        for (i, name) in header.iter().enumerate() {
            if !name.is_empty() && header[..i].contains(name) {
                return Err(SchemaError::DuplicateColumn {
                    column: name.clone(),
                }
                .into());
            }
        }

        let mut missing: Vec<String> = schema
            .required
            .iter()
            .filter(|name| !header.contains(name))
            .cloned()
            .collect();
        let time_index = match header.iter().position(|name| *name == schema.time_column) {
            Some(i) => i,
            None => {
                missing.push(schema.time_column.clone());
                0
            }
        };
        if !missing.is_empty() {
            return Err(SchemaError::MissingColumns { missing }.into());
        }

        Ok(Self {
            path,
            schema,
            header,
            time_index,
        })
    }

    /// The validated header, in file order.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// The schema this source was opened with.
    pub fn schema(&self) -> &SourceSchema {
        &self.schema
    }

    /// The underlying file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts a fresh pass over the data rows.
    ///
    /// Each call reopens the file, so a consumed iterator does not exhaust
    /// the source.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the file can no longer be opened or its
    /// header read.
    pub fn records(&self) -> Result<Records> {
        let display = self.path.display().to_string();
        let file = File::open(&self.path).map_err(|source| SchemaError::Open {
            path: display.clone(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        // Skip the header; open() already validated it.
        let mut skip = String::new();
        reader
            .read_line(&mut skip)
            .map_err(|source| SchemaError::Read {
                path: display.clone(),
                source,
            })?;

        Ok(Records {
            reader,
            path: display,
            columns: self.header.clone(),
            time_index: self.time_index,
            delimiter: self.schema.delimiter,
            line: 1,
        })
    }
}

/// Lazy iterator over a source's data rows.
///
/// Yields one [`Record`] per non-empty row. Malformed rows surface as errors
/// without stopping the iteration, so a caller may skip or abort as it
/// prefers.
#[derive(Debug)]
pub struct Records {
    reader: BufReader<File>,
    path: String,
    columns: Vec<String>,
    time_index: usize,
    delimiter: char,
    line: u64,
}

impl Iterator for Records {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut buf = String::new();
            self.line += 1;
            match self.reader.read_line(&mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(source) => {
                    return Some(Err(SchemaError::Read {
                        path: self.path.clone(),
                        source,
                    }
                    .into()));
                }
            }

            let row = buf.trim_end_matches(['\n', '\r']);
            if row.is_empty() {
                continue;
            }

            let cells = split_row(row, self.delimiter);
            if cells.len() != self.columns.len() {
                return Some(Err(SchemaError::RowWidth {
                    line: self.line,
                    expected: self.columns.len(),
                    found: cells.len(),
                }
                .into()));
            }

            let time_cell = cells[self.time_index].trim();
            if time_cell.is_empty() {
                return Some(Err(SchemaError::MissingTimestamp {
                    line: self.line,
                    column: self.columns[self.time_index].clone(),
                }
                .into()));
            }
            let timestamp = match lineproto::parse_timestamp_text(time_cell) {
                Ok(ts) => ts,
                Err(reason) => {
                    return Some(Err(SchemaError::InvalidTimestamp {
                        line: self.line,
                        value: time_cell.to_string(),
                        reason,
                    }
                    .into()));
                }
            };

            let mut values = Vec::with_capacity(cells.len().saturating_sub(1));
            for (i, cell) in cells.iter().enumerate() {
                if i == self.time_index {
                    continue;
                }
                if let Some(scalar) = Scalar::infer(cell) {
                    values.push((self.columns[i].clone(), scalar));
                }
            }

            return Some(Ok(Record { values, timestamp }));
        }
    }
}

/// Splits one row into cells, honoring RFC 4180 quoting: a cell that starts
/// with a double quote runs to the closing quote, `""` inside it is a literal
/// quote, and the delimiter loses its meaning while quoted.
pub(crate) fn split_row(row: &str, delimiter: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = row.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        if quoted {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    cell.push('"');
                    chars.next();
                } else {
                    quoted = false;
                }
            } else {
                cell.push(c);
            }
        } else if c == '"' && cell.is_empty() {
            quoted = true;
        } else if c == delimiter {
            cells.push(std::mem::take(&mut cell));
        } else {
            cell.push(c);
        }
    }
    cells.push(cell);
    cells
}
