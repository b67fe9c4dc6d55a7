//! Error types. Counter failures never escape a tick; they are folded into the
//! snapshot's `unavailable` list.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::Metric;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("{metric} unavailable: {reason}")]
    Unavailable { metric: Metric, reason: String },

    #[error("{metric} read timed out after {after:?}")]
    TimedOut { metric: Metric, after: Duration },

    #[error("{metric} is not supported on this platform")]
    Unsupported { metric: Metric },
}

impl CounterError {
    pub fn unavailable(metric: Metric, reason: impl Into<String>) -> Self {
        CounterError::Unavailable {
            metric,
            reason: reason.into(),
        }
    }

    pub fn metric(&self) -> Metric {
        match self {
            CounterError::Unavailable { metric, .. }
            | CounterError::TimedOut { metric, .. }
            | CounterError::Unsupported { metric } => *metric,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a monitoring session is already running")]
    AlreadySampling,

    #[error("no tokio runtime available to drive the sampler")]
    NoRuntime,

    #[error("failed to load config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: ConfigSourceError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigSourceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
