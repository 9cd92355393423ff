//! Error types for candle synchronization and backtesting.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Unknown cadence: {0}")]
    UnknownCadence(String),

    #[error("Base cadence {0} is not configured")]
    MissingBaseCadence(String),

    #[error("Insufficient candles for {symbol} {cadence}: required {required}, available {available}")]
    InsufficientData {
        symbol: String,
        cadence: String,
        required: usize,
        available: usize,
    },

    #[error("Fetch failure: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("API error: {message}")]
    Api { message: String, status: Option<u16> },

    #[error("Malformed feed payload: {message}")]
    Decode { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl Error {
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Errors surfaced by the candle feed. These are never retried.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Error::Fetch(_) | Error::Api { .. } | Error::Decode { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
