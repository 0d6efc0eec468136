//! Error types for the downlink ingestion pipeline.

use thiserror::Error;

/// The main error type for all downlink operations.
///
/// This enum covers all possible error conditions that can occur while a
/// pipeline runs, from opening the source table through encoding, writing,
/// and querying the store. Each stage has its own error enum; this type
/// gathers them for callers that drive a whole run.
#[derive(Error, Debug)]
pub enum DownlinkError {
    /// Error resolving connection configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error opening or validating the source table (local read path).
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Error encoding a record into a measurement entry.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Error submitting a batch to the store (write path).
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// Error querying the store (remote read path).
    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

/// Errors that can occur while resolving connection configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is unset or empty.
    #[error("environment variable {name} is not set")]
    MissingVar {
        /// The variable that was expected.
        name: &'static str,
    },

    /// The HTTP client could not be constructed from the configuration.
    #[error("failed to create HTTP client: {source}")]
    HttpClient {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

/// Errors that can occur while opening or iterating a source table.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The source file could not be opened.
    #[error("failed to open source '{path}': {source}")]
    Open {
        /// The path that could not be opened.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The source file could not be read.
    #[error("failed to read source '{path}': {source}")]
    Read {
        /// The path being read.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The source has no header row.
    #[error("source '{path}' is empty (no header row)")]
    MissingHeader {
        /// The offending file path.
        path: String,
    },

    /// Columns the schema requires are absent from the header.
    #[error("source is missing required columns: {missing:?}")]
    MissingColumns {
        /// The required columns that were not found.
        missing: Vec<String>,
    },

    /// The same column name appears more than once in the header.
    #[error("duplicate column '{column}' in header")]
    DuplicateColumn {
        /// The repeated column name.
        column: String,
    },

    /// A data row has a different number of cells than the header.
    #[error("row at line {line} has {found} cells, expected {expected}")]
    RowWidth {
        /// The 1-based line number of the offending row.
        line: u64,
        /// The number of header columns.
        expected: usize,
        /// The number of cells found.
        found: usize,
    },

    /// The time column is empty for a data row.
    #[error("row at line {line}: time column '{column}' is empty")]
    MissingTimestamp {
        /// The 1-based line number of the offending row.
        line: u64,
        /// The name of the time column.
        column: String,
    },

    /// The time column could not be parsed as a timestamp.
    #[error("row at line {line}: cannot parse timestamp {value:?}: {reason}")]
    InvalidTimestamp {
        /// The 1-based line number of the offending row.
        line: u64,
        /// The cell text that failed to parse.
        value: String,
        /// Why the text is not a timestamp.
        reason: String,
    },
}

/// Errors that can occur while encoding records into measurement entries.
#[derive(Error, Debug)]
pub enum EncodingError {
    /// The measurement name is empty or otherwise unusable.
    #[error("invalid measurement name {name:?}: {reason}")]
    InvalidMeasurement {
        /// The rejected measurement name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// The entry has no fields; at least one is required.
    #[error("entry for measurement '{measurement}' has no fields")]
    NoFields {
        /// The measurement the entry was built for.
        measurement: String,
    },

    /// A field the layout requires is absent from the record.
    #[error("record is missing required field '{field}'")]
    MissingField {
        /// The missing column name.
        field: String,
    },

    /// A record value does not match the kind the layout declares.
    #[error("field '{field}' expects {expected}, got {found}")]
    FieldType {
        /// The field column name.
        field: String,
        /// The kind the layout declares.
        expected: &'static str,
        /// The kind actually found in the record.
        found: &'static str,
    },

    /// Float fields must be finite.
    #[error("field '{field}' has non-finite value {value}")]
    NonFiniteFloat {
        /// The field column name.
        field: String,
        /// The offending value.
        value: f64,
    },

    /// A field value cannot be represented on the wire.
    #[error("field '{field}' has unencodable value: {reason}")]
    InvalidFieldValue {
        /// The field column name.
        field: String,
        /// Why the value cannot be encoded.
        reason: String,
    },

    /// A tag key or value is invalid.
    #[error("invalid tag {key}={value}: {reason}")]
    InvalidTag {
        /// The tag key.
        key: String,
        /// The tag value.
        value: String,
        /// Why the tag is invalid.
        reason: String,
    },

    /// A field key is invalid.
    #[error("invalid field key {key:?}: {reason}")]
    InvalidFieldKey {
        /// The field key.
        key: String,
        /// Why the key is invalid.
        reason: String,
    },

    /// A timestamp cannot be represented at the requested precision.
    #[error("timestamp out of range: {value}")]
    TimestampRange {
        /// Text form of the offending timestamp.
        value: String,
    },

    /// Wire-format text could not be parsed back into an entry.
    #[error("cannot parse entry: {reason}")]
    Parse {
        /// Why the text is not a valid entry.
        reason: String,
    },
}

/// Errors that can occur while submitting batches to the store.
#[derive(Error, Debug)]
pub enum WriteError {
    /// A write was attempted with no entries.
    #[error("refusing to write an empty batch")]
    EmptyBatch,

    /// The store rejected the request's credentials.
    #[error("store rejected credentials (status {status}): {message}")]
    Unauthorized {
        /// The HTTP status code (401 or 403).
        status: u16,
        /// The store's error message.
        message: String,
    },

    /// The target bucket does not exist.
    #[error("bucket '{bucket}' not found: {message}")]
    BucketNotFound {
        /// The bucket that was addressed.
        bucket: String,
        /// The store's error message.
        message: String,
    },

    /// The store rejected the batch as malformed.
    #[error("store rejected batch as malformed: {message}")]
    Malformed {
        /// The store's error message.
        message: String,
    },

    /// Server returned a non-2xx status after retries.
    #[error("write failed with status {status} after {attempts} attempt(s): {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// How many attempts were made.
        attempts: u32,
        /// The response body text.
        body: String,
    },

    /// HTTP request failed after retries.
    #[error("write request failed after {attempts} attempt(s): {source}")]
    RequestFailed {
        /// How many attempts were made.
        attempts: u32,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

/// Errors that can occur while querying the store.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The time range is empty or inverted.
    #[error("invalid time range: {reason}")]
    InvalidRange {
        /// Why the range is invalid.
        reason: String,
    },

    /// The filter specification is malformed.
    #[error("invalid filter: {reason}")]
    InvalidFilter {
        /// Why the filter is invalid.
        reason: String,
    },

    /// The store rejected the request's credentials.
    #[error("store rejected credentials (status {status}): {message}")]
    Unauthorized {
        /// The HTTP status code (401 or 403).
        status: u16,
        /// The store's error message.
        message: String,
    },

    /// Server returned a non-2xx status.
    #[error("query failed with status {status}: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// The response body text.
        body: String,
    },

    /// HTTP request failed.
    #[error("query request failed: {source}")]
    RequestFailed {
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The response body could not be read.
    #[error("failed to read query response: {source}")]
    Body {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The store reported a failure inside an otherwise successful response.
    #[error("store-side query failure: {message}")]
    Server {
        /// The store's error message.
        message: String,
    },

    /// A response row could not be decoded.
    #[error("response line {line}: {reason}")]
    Decode {
        /// The 1-based line number within the response body.
        line: u64,
        /// Why the row could not be decoded.
        reason: String,
    },
}

/// Type alias for `Result<T, DownlinkError>`.
pub type Result<T> = std::result::Result<T, DownlinkError>;
