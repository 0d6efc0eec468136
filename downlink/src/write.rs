//! Batched submission to the store's write endpoint.
//!
//! A [`BatchWriter`] accepts two payload shapes through one interface:
//! structured [`Point`]s, rendered to wire text at the writer's precision,
//! and raw pre-rendered lines, passed through verbatim for the store to
//! parse. In [`WriteMode::Synchronous`] every write is one HTTP POST; in
//! [`WriteMode::Buffered`] entries accumulate and go out in capacity-sized
//! batches, with [`BatchWriter::flush`] draining the tail.
//!
//! Transient failures (timeouts, connection errors, 429 and 5xx responses)
//! are retried with doubling backoff. Rejections that a retry cannot fix,
//! like bad credentials or a missing bucket, fail immediately.
//!
//! # Example
//!
//! ```rust,no_run
//! use downlink::{Client, Destination, Point, Timestamp, WriteOptions, WritePayload};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(Destination::from_env()?)?;
//! let mut writer = client.writer(WriteOptions::new());
//!
//! let point = Point::new("mem")
//!     .tag("host", "host1")
//!     .field("used_percent", 23.43234543)
//!     .timestamp(Timestamp::now());
//!
//! writer.write(WritePayload::from(point))?;
//! writer.flush()?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::client::Client;
use crate::config::Destination;
use crate::error::{Result, WriteError};
use crate::point::{Point, Precision};

/// A batch of entries headed for the store.
///
/// Both variants end up as the same wire text; the store parses raw lines
/// itself, so the writer never converts between the two shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum WritePayload {
    /// Structured entries, rendered by the writer.
    Points(Vec<Point>),
    /// Pre-rendered protocol lines, passed through verbatim.
    Lines(Vec<String>),
}

impl WritePayload {
    /// Number of entries in the batch.
    pub fn len(&self) -> usize {
        match self {
            Self::Points(points) => points.len(),
            Self::Lines(lines) => lines.len(),
        }
    }

    /// True if the batch holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders the batch to individual wire lines.
    fn into_lines(self, precision: Precision) -> Result<Vec<String>> {
        match self {
            Self::Points(points) => points
                .iter()
                .map(|point| point.to_line_with_precision(precision))
                .collect(),
            Self::Lines(lines) => Ok(lines),
        }
    }

    /// Renders the batch to one newline-joined request body.
    pub(crate) fn into_body(self, precision: Precision) -> Result<String> {
        Ok(self.into_lines(precision)?.join("\n"))
    }
}

impl From<Point> for WritePayload {
    fn from(point: Point) -> Self {
        Self::Points(vec![point])
    }
}

impl From<Vec<Point>> for WritePayload {
    fn from(points: Vec<Point>) -> Self {
        Self::Points(points)
    }
}

impl From<Vec<String>> for WritePayload {
    fn from(lines: Vec<String>) -> Self {
        Self::Lines(lines)
    }
}

/// When entries actually leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Every [`BatchWriter::write`] call is one immediate POST (default).
    #[default]
    Synchronous,
    /// Entries accumulate and are POSTed in `capacity`-sized batches.
    /// The tail shorter than `capacity` waits for [`BatchWriter::flush`].
    Buffered {
        /// Entries per batch. Zero behaves as one.
        capacity: usize,
    },
}

/// Configuration for a [`BatchWriter`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// Delivery mode.
    pub mode: WriteMode,
    /// Timestamp precision declared to the store.
    pub precision: Precision,
    /// Maximum number of retry attempts on transient failure.
    pub max_retries: u32,
    /// Initial backoff duration between retries (doubles each attempt).
    pub retry_backoff: Duration,
}

impl WriteOptions {
    /// Creates options with sensible defaults.
    ///
    /// Defaults: synchronous mode, nanosecond precision, 3 retries, 100ms
    /// initial backoff.
    pub fn new() -> Self {
        Self {
            mode: WriteMode::Synchronous,
            precision: Precision::Nanoseconds,
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }

    /// Sets the delivery mode.
    #[must_use]
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the timestamp precision.
    #[must_use]
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the initial retry backoff.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes batches of entries to one destination.
///
/// Borrow one from [`Client::writer`]. In buffered mode the writer holds
/// rendered lines until a full batch is ready; dropping it discards whatever
/// has not been flushed, so end buffered sessions with [`BatchWriter::flush`].
#[derive(Debug)]
pub struct BatchWriter<'a> {
    client: &'a Client,
    options: WriteOptions,
    buffer: Vec<String>,
}

impl<'a> BatchWriter<'a> {
    pub(crate) fn new(client: &'a Client, options: WriteOptions) -> Self {
        Self {
            client,
            options,
            buffer: Vec::new(),
        }
    }

    /// Submits a batch.
    ///
    /// Returns the number of entries accepted. In synchronous mode they have
    /// reached the store when this returns; in buffered mode they may still
    /// be sitting in the buffer (see [`BatchWriter::pending`]).
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::EmptyBatch`] for an empty payload, an
    /// [`EncodingError`](crate::error::EncodingError) if a point cannot be
    /// rendered, and a [`WriteError`] if the store rejects the batch or stays
    /// unreachable through all retries.
    pub fn write(&mut self, payload: impl Into<WritePayload>) -> Result<usize> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(WriteError::EmptyBatch.into());
        }
        let count = payload.len();

        match self.options.mode {
            WriteMode::Synchronous => {
                let body = payload.into_body(self.options.precision)?;
                self.send(&body)?;
            }
            WriteMode::Buffered { capacity } => {
                let mut lines = payload.into_lines(self.options.precision)?;
                self.buffer.append(&mut lines);

                let capacity = capacity.max(1);
                while self.buffer.len() >= capacity {
                    let body = self.buffer[..capacity].join("\n");
                    self.send(&body)?;
                    self.buffer.drain(..capacity);
                }
            }
        }

        Ok(count)
    }

    /// Sends whatever the buffer still holds. A no-op when nothing is
    /// pending, so it is always safe to call last.
    ///
    /// # Errors
    ///
    /// Returns a [`WriteError`] if the store rejects the batch or stays
    /// unreachable through all retries; the buffer is kept on failure.
    pub fn flush(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let body = self.buffer.join("\n");
        self.send(&body)?;
        let flushed = self.buffer.len();
        self.buffer.clear();
        Ok(flushed)
    }

    /// Entries buffered but not yet sent.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn send(&self, body: &str) -> Result<()> {
        send_with_retry(
            self.client.http(),
            self.client.destination(),
            &self.options,
            body,
        )
    }
}

/// The write endpoint for a destination.
fn write_url(dest: &Destination) -> String {
    format!("{}/api/v2/write", dest.url.trim_end_matches('/'))
}

/// POSTs a request body with exponential backoff retry.
///
/// Classifies responses before retrying: credential rejections, a missing
/// bucket, and malformed-batch rejections fail immediately since no retry
/// can fix them. Only transport errors, 429, and 5xx are retried.
fn send_with_retry(
    http: &reqwest::blocking::Client,
    dest: &Destination,
    options: &WriteOptions,
    body: &str,
) -> Result<()> {
    let url = write_url(dest);

    let mut last_error = None;
    let mut backoff = options.retry_backoff;

    for attempt in 0..=options.max_retries {
        let result = http
            .post(&url)
            .query(&[
                ("org", dest.org.as_str()),
                ("bucket", dest.bucket.as_str()),
                ("precision", options.precision.query_param()),
            ])
            .header("Authorization", format!("Token {}", dest.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body.to_owned())
            .send();

        match result {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status().as_u16();
                let message = error_message(&resp.text().unwrap_or_default());
                match status {
                    401 | 403 => {
                        return Err(WriteError::Unauthorized { status, message }.into());
                    }
                    404 => {
                        return Err(WriteError::BucketNotFound {
                            bucket: dest.bucket.clone(),
                            message,
                        }
                        .into());
                    }
                    400 | 413 => {
                        return Err(WriteError::Malformed { message }.into());
                    }
                    // Rate limiting and server-side failures may clear up.
                    429 | 500..=599 => {
                        last_error = Some(WriteError::HttpStatus {
                            status,
                            attempts: attempt + 1,
                            body: message,
                        });
                    }
                    _ => {
                        return Err(WriteError::HttpStatus {
                            status,
                            attempts: attempt + 1,
                            body: message,
                        }
                        .into());
                    }
                }
            }
            Err(e) => {
                last_error = Some(WriteError::RequestFailed {
                    attempts: attempt + 1,
                    source: e,
                });
            }
        }

        if attempt < options.max_retries {
            std::thread::sleep(backoff);
            backoff *= 2;
        }
    }

    Err(last_error.expect("at least one attempt was made").into())
}

/// Pulls the human-readable message out of a store error body.
///
/// The store answers errors with a JSON object carrying a `message` field;
/// anything that does not parse is returned trimmed, as-is.
pub(crate) fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string())
}
