use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure below the HTTP layer: DNS, connect, TLS, read timeouts.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> TransportError {
        TransportError { message: message.into() }
    }
}

/// Everything that can go wrong while talking to the dissemination API.
#[derive(Debug, Error)]
pub enum EurostatError {
    #[error("transport error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("server temporarily unavailable (maintenance redirect) while fetching {url}")]
    ServiceUnavailable { url: String },

    #[error("server fault (HTTP {status}) for {url}: {}", .details.join("; "))]
    Fault {
        url: String,
        status: u16,
        details: Vec<String>,
    },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("async job {key} ended with status {status}")]
    AsyncJob { key: String, status: String },

    #[error("async job {key} not available after {waited:?}")]
    AsyncTimeout { key: String, waited: Duration },

    #[error("unexpected response from {url}: {reason}")]
    Protocol { url: String, reason: String },

    #[error("malformed XML from {url}: {reason}")]
    Xml { url: String, reason: String },

    #[error("malformed JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decompress payload from {url}: {source}")]
    Decompress {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset not found: {code}")]
    DatasetNotFound { code: String },

    #[error("dimension {dimension} not in {code}")]
    DimensionNotFound { code: String, dimension: String },

    #[error("cannot parse observation {cell:?}: {reason}")]
    ObservationParse { cell: String, reason: String },
}

pub type Result<T> = std::result::Result<T, EurostatError>;

/// Problems building a [`crate::config::RequestConfig`] or the HTTP agent from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration {path} is not valid TOML: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid proxy {proxy:?}: {reason}")]
    InvalidProxy { proxy: String, reason: String },

    #[error("failed to build TLS connector: {0}")]
    Tls(#[from] native_tls::Error),
}

/// Reshaping a fetched table into a date-indexed series.
#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("table has no geography column (expected geo\\TIME_PERIOD or geo)")]
    MissingGeoColumn,

    #[error("period {0:?} is not a valid date")]
    InvalidPeriod(String),
}
