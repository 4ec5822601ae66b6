//! Error taxonomy for the engine.
//!
//! None of these are fatal to the process. Callers recover locally and report
//! them upward as structured results.

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::types::PoolType;

/// Reasons an open request can be turned away without anything going wrong.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenRejection {
    CircuitBreakerActive { until: DateTime<Utc> },
    PoolFull { pool: PoolType, max: usize },
    PortfolioFull { max: usize },
    InsufficientCapital { available: f64, minimum: f64 },
    InvalidPrice,
    InvalidSize,
    AlreadyHolding,
}

impl fmt::Display for OpenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenRejection::CircuitBreakerActive { until } => {
                write!(f, "circuit breaker active until {}", until.format("%Y-%m-%d %H:%M UTC"))
            }
            OpenRejection::PoolFull { pool, max } => {
                write!(f, "{} pool already holds {} positions", pool, max)
            }
            OpenRejection::PortfolioFull { max } => {
                write!(f, "portfolio already holds {} positions", max)
            }
            OpenRejection::InsufficientCapital { available, minimum } => {
                write!(f, "size ${:.2} below minimum ${:.2}", available, minimum)
            }
            OpenRejection::InvalidPrice => f.write_str("entry price unavailable"),
            OpenRejection::InvalidSize => f.write_str("requested size is not a finite amount"),
            OpenRejection::AlreadyHolding => f.write_str("token already held"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("data unavailable from {provider}: {reason}")]
    DataUnavailable { provider: &'static str, reason: String },

    #[error("execution failed: {reason}")]
    ExecutionFailure { reason: String },

    #[error("open rejected: {0}")]
    CapacityExceeded(OpenRejection),

    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn unavailable(provider: &'static str, reason: impl Into<String>) -> Self {
        EngineError::DataUnavailable { provider, reason: reason.into() }
    }

    pub fn execution(reason: impl Into<String>) -> Self {
        EngineError::ExecutionFailure { reason: reason.into() }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        EngineError::InvalidState { reason: reason.into() }
    }

    /// Rejections and failures that the next tick may resolve on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::DataUnavailable { .. }
                | EngineError::ExecutionFailure { .. }
                | EngineError::CapacityExceeded(_)
                | EngineError::Http(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
