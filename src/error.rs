//! Module that defines a single application-level [`Error`] type and a _retry_ helper function
//! which is usable in `async` contexts.
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use prometheus::Error as PrometheusError;
use tokio_graceful_shutdown::errors::GracefulShutdownError;

/// Generic dynamic error with type erased
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Enum encapsulating all the error variants of this crate's components
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Application configuration errors
    #[error("Invalid or missing configuration")]
    Config(#[from] config::ConfigError),

    /// Configuration value that deserialized fine but is semantically invalid
    #[error("Invalid configuration value for '{0}'")]
    ConfigValue(&'static str),

    /// Log file enumeration or download errors of a [`LogSource`](crate::source::LogSource)
    #[error("Failed to read logs from '{location}': {cause}")]
    Source { location: String, cause: BoxedError },

    /// Log file content that could not be decompressed
    #[error("Failed to decompress '{file}'")]
    Decompress {
        file: String,
        #[source]
        source: std::io::Error,
    },

    /// Trace line with a timestamp that does not follow the broker log format
    #[error("Invalid trace timestamp '{value}'")]
    Timestamp {
        value: String,
        #[source]
        source: time::error::Parse,
    },

    /// Inventory timestamps that cannot be rendered
    #[error("Invalid output timestamp {0:?}")]
    TimestampFormat(#[from] time::error::Format),

    /// CSV output errors of the inventory sink
    #[error("CsvError {0:?}")]
    Sink(#[from] csv::Error),

    /// JSON output errors of the inventory sink
    #[error("JsonError {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("IoError {0:?}")]
    Io(#[from] std::io::Error),

    /// Errors related to registering, access and manipulation with Prometheus metrics
    #[error("MetricsError {0:?}")]
    Metrics(#[from] PrometheusError),

    /// Setup errors of the Grafana Loki log publisher
    #[error("LokiError {0:?}")]
    Loki(#[from] tracing_loki::Error),

    /// Application shutdown errors
    #[error("Graceful shutdown failed with {0:?}")]
    ShutdownError(#[from] GracefulShutdownError<BoxedError>),
}

impl Error {
    /// Wraps an arbitrary error of a log source backend.
    pub fn backend(location: impl Into<String>, cause: impl Into<BoxedError>) -> Self {
        Self::Source {
            location: location.into(),
            cause: cause.into(),
        }
    }
}

/// Asynchronously runs given future-producing closure `f` `tries`-times with a fixed `delay`.
pub async fn async_retry<T, F, Fut>(mut tries: u64, delay: Duration, f: F) -> Result<T>
where
    F: Fn() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
{
    loop {
        match f().await {
            e @ Err(_) if tries == 0 => return e,
            Err(_) => tokio::time::sleep(delay).await,
            r => return r,
        }
        tries -= 1;
    }
}
