//! # downlink
//!
//! Telemetry-to-time-series ingestion pipeline.
//!
//! downlink is a Rust library for moving tabular telemetry (CSV exports,
//! ground-station downlinks, sensor dumps) into an InfluxDB 2.x compatible
//! time-series store. It reads schema-checked source tables, encodes rows
//! into line protocol, batches writes with retry, and pulls results back
//! out with small range queries.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Lazy, restartable source iteration — rows stream from disk and never
//!   sit in memory whole
//! - Schema validation up front: missing or duplicated columns fail before
//!   the first row is read
//! - Line protocol rendering and parsing that round-trip exactly
//! - Synchronous or buffered write modes over the same writer API
//! - Typed query results decoded lazily from annotated CSV
//! - Destination settings come from the environment or explicit values,
//!   never from the library
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use downlink::{
//!     Client, CsvSource, Destination, FieldSpec, Layout, SourceSchema, WriteMode, WriteOptions,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Describe the source table: a time column plus the columns rows must have
//! let schema = SourceSchema::new("datetime")
//!     .require("latitude")
//!     .require("longitude");
//! let source = CsvSource::open("telemetry.csv", schema)?;
//!
//! // Describe how rows become measurement entries
//! let layout = Layout::new("coordinates")
//!     .tag("type", "TELEM")
//!     .field(FieldSpec::float("latitude"))
//!     .field(FieldSpec::float("longitude"));
//!
//! // Destination comes from INFLUX_URL, INFLUX_TOKEN, INFLUX_ORG, INFLUX_BUCKET
//! let client = Client::connect(Destination::from_env()?)?;
//! let options = WriteOptions::new().with_mode(WriteMode::Buffered { capacity: 500 });
//! let mut writer = client.writer(options);
//!
//! for record in source.records()? {
//!     writer.write(layout.encode(&record?)?)?;
//! }
//! writer.flush()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`CsvSource`] — Schema-checked, restartable view over a CSV file
//! - [`Layout`] — Maps source records to tagged, typed measurement entries
//! - [`Client`] — Destination handle; hands out writers and runs queries
//! - [`BatchWriter`] — Synchronous or buffered delivery with retry
//! - [`RangeQuery`] / [`QueryRows`] — Flux range queries and lazy row decoding
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`source`] — Source schema, record iteration, value inference
//! - [`encode`] — Row-to-entry layouts and field coercion
//! - [`point`] — Measurement entries, field values, timestamps
//! - [`lineproto`] — Line protocol rendering and parsing
//! - [`write`] — Write payloads, modes, and the batch writer
//! - [`flux`] — Range queries and response decoding
//! - [`client`] — Destination client
//! - [`config`] — Destination settings
//! - [`error`] — Error types

pub mod client;
pub mod config;
pub mod encode;
pub mod error;
pub mod flux;
pub mod lineproto;
pub mod point;
pub mod source;
pub mod write;

// Re-export primary API types at crate root for convenience.
pub use client::Client;
pub use config::Destination;
pub use encode::{FieldKind, FieldSpec, Layout};
pub use error::{
    ConfigError, DownlinkError, EncodingError, QueryError, Result, SchemaError, WriteError,
};
pub use flux::{FluxRecord, FluxTime, FluxValue, QueryRows, RangeQuery};
pub use lineproto::parse_line;
pub use point::{FieldValue, Point, Precision, Timestamp};
pub use source::{CsvSource, Record, Records, Scalar, SourceSchema};
pub use write::{BatchWriter, WriteMode, WriteOptions, WritePayload};
