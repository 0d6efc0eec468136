//! Connection handle bundling a destination with its HTTP stack.

use std::io::BufReader;

use serde_json::json;

use crate::config::Destination;
use crate::error::{ConfigError, QueryError, Result};
use crate::flux::{QueryRows, RangeQuery};
use crate::write::{self, BatchWriter, WriteOptions, WritePayload};

/// A client for one store destination.
///
/// Holds the destination settings and a pooled HTTP client; writes and
/// queries borrow both. HTTP is request/response, so nothing is opened
/// until the first write or query, and dropping the client releases any
/// pooled connections.
///
/// # Example
///
/// ```rust,no_run
/// use downlink::{Client, Destination, Point};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::connect(Destination::from_env()?)?;
///
/// let point = Point::new("mem")
///     .tag("host", "host1")
///     .field("used_percent", 23.43234543);
/// client.write(point)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::blocking::Client,
    dest: Destination,
}

impl Client {
    /// Builds a client for the given destination.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClient`] if the HTTP stack cannot be
    /// initialized (for example when no TLS backend is available).
    pub fn connect(dest: Destination) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(dest.timeout)
            .build()
            .map_err(|source| ConfigError::HttpClient { source })?;

        Ok(Self { http, dest })
    }

    /// The destination this client talks to.
    pub fn destination(&self) -> &Destination {
        &self.dest
    }

    pub(crate) fn http(&self) -> &reqwest::blocking::Client {
        &self.http
    }

    /// Creates a batch writer bound to this client.
    pub fn writer(&self, options: WriteOptions) -> BatchWriter<'_> {
        BatchWriter::new(self, options)
    }

    /// Writes one payload synchronously with default options.
    ///
    /// Shorthand for a single-use [`BatchWriter`] in synchronous mode.
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError`](crate::error::WriteError) if the payload is
    /// empty or the store rejects it, and
    /// [`EncodingError`](crate::error::EncodingError) if a point cannot be
    /// rendered.
    pub fn write(&self, payload: impl Into<WritePayload>) -> Result<usize> {
        self.writer(WriteOptions::new()).write(payload)
    }

    /// Runs a range query against the destination bucket.
    ///
    /// Rows stream back lazily; an empty result yields an iterator that
    /// returns no rows.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if the query is invalid, the request fails,
    /// or the store rejects it.
    pub fn query(
        &self,
        query: &RangeQuery,
    ) -> Result<QueryRows<BufReader<reqwest::blocking::Response>>> {
        let flux = query.to_flux(&self.dest.bucket)?;
        self.query_raw(&flux)
    }

    /// Runs a raw Flux script.
    ///
    /// The request asks for annotated CSV so every cell comes back typed.
    /// Queries are not retried; a failed query is cheap to rerun at the
    /// caller's discretion.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if the request fails or the store answers
    /// with a non-2xx status.
    pub fn query_raw(
        &self,
        flux: &str,
    ) -> Result<QueryRows<BufReader<reqwest::blocking::Response>>> {
        let body = json!({
            "query": flux,
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": ["group", "datatype", "default"],
            },
        });

        let resp = self
            .http
            .post(query_url(&self.dest))
            .query(&[("org", self.dest.org.as_str())])
            .header("Authorization", format!("Token {}", self.dest.token))
            .header("Content-Type", "application/json")
            .header("Accept", "application/csv")
            .body(body.to_string())
            .send()
            .map_err(|source| QueryError::RequestFailed { source })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(QueryRows::new(BufReader::new(resp)));
        }

        let code = status.as_u16();
        let message = write::error_message(&resp.text().unwrap_or_default());
        let err = match code {
            401 | 403 => QueryError::Unauthorized {
                status: code,
                message,
            },
            _ => QueryError::HttpStatus {
                status: code,
                body: message,
            },
        };
        Err(err.into())
    }
}

fn query_url(dest: &Destination) -> String {
    format!("{}/api/v2/query", dest.url.trim_end_matches('/'))
}
