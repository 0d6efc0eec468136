//! Connection configuration for the time-series store.
//!
//! A [`Destination`] names where writes and queries go: the store's base URL,
//! the API token presented on every request, and the organization and bucket
//! that scope the data. Credentials are never baked into the library; build a
//! `Destination` from the environment with [`Destination::from_env`] or from
//! values your own configuration layer supplies.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Environment variable holding the store's base URL.
pub const ENV_URL: &str = "INFLUX_URL";
/// Environment variable holding the API token.
pub const ENV_TOKEN: &str = "INFLUX_TOKEN";
/// Environment variable holding the organization name.
pub const ENV_ORG: &str = "INFLUX_ORG";
/// Environment variable holding the bucket name.
pub const ENV_BUCKET: &str = "INFLUX_BUCKET";

/// Default HTTP request timeout for writes and queries.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where pipeline output goes: store address, credentials, and namespace.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use downlink::Destination;
///
/// let dest = Destination::new("http://localhost:8086", "my-token", "Projects", "Telemetry")
///     .with_timeout(Duration::from_secs(10));
/// assert_eq!(dest.bucket, "Telemetry");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    /// Base URL of the store, e.g. `http://localhost:8086`.
    pub url: String,

    /// API token, sent as `Authorization: Token <token>` on every request.
    pub token: String,

    /// Organization that owns the bucket.
    pub org: String,

    /// Bucket written to and queried.
    pub bucket: String,

    /// HTTP request timeout applied to writes and queries.
    #[serde(with = "duration_serde", default = "default_timeout")]
    pub timeout: Duration,
}

impl Destination {
    /// Creates a destination with the default timeout.
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Reads the destination from `INFLUX_URL`, `INFLUX_TOKEN`, `INFLUX_ORG`
    /// and `INFLUX_BUCKET`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingVar`] if any of the four variables is
    /// unset or blank.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retargets the destination at a different bucket, keeping credentials.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Builds a destination from an arbitrary variable lookup.
    ///
    /// Split out from [`Destination::from_env`] so tests can supply variables
    /// without touching process state.
    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| -> Result<String> {
            match lookup(name) {
                Some(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(ConfigError::MissingVar { name }.into()),
            }
        };

        Ok(Self::new(
            require(ENV_URL)?,
            require(ENV_TOKEN)?,
            require(ENV_ORG)?,
            require(ENV_BUCKET)?,
        ))
    }
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Negative, non-finite, and oversized values are config errors,
        // not panics.
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}
