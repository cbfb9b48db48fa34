//! Error types for the pump scanner

use thiserror::Error;

use crate::market::ProviderError;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pump scanner
#[derive(Error, Debug)]
pub enum Error {
    // Market data provider errors
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Price unavailable for {0}")]
    PriceUnavailable(String),

    // Storage errors
    #[error("Trade not found: {0}")]
    TradeNotFound(String),

    #[error("Trade persistence failed: {0}")]
    TradePersistence(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Provider(ProviderError::Exchange { .. })
                | Error::Provider(ProviderError::Timeout { .. })
                | Error::PriceUnavailable(_)
        )
    }
}
