use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketError {
    // Wallet session errors
    ProviderUnavailable,
    WrongNetwork(String),
    UserRejected(String),
    NotConnected,
    TransactionError(String),

    // Settlement and repository errors
    ListingNotFound(String),
    RecordPersistenceFailure(String),
    RepositoryError(String),

    // Validation errors
    ValidationError(String),
    InvalidAddress(String),
    InvalidAmount(String),

    // Local storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),
}

impl fmt::Display for MarketError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MarketError::ProviderUnavailable => write!(f, "No wallet provider available"),
            MarketError::WrongNetwork(msg) => write!(f, "Wrong network: {}", msg),
            MarketError::UserRejected(msg) => write!(f, "Rejected by user: {}", msg),
            MarketError::NotConnected => write!(f, "Wallet not connected"),
            MarketError::TransactionError(msg) => write!(f, "Transaction error: {}", msg),

            MarketError::ListingNotFound(id) => write!(f, "Listing not found: {}", id),
            MarketError::RecordPersistenceFailure(msg) => {
                write!(f, "Transaction record not saved: {}", msg)
            }
            MarketError::RepositoryError(msg) => write!(f, "Repository error: {}", msg),

            MarketError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            MarketError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            MarketError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),

            MarketError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            MarketError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            MarketError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
        }
    }
}

impl std::error::Error for MarketError {}

pub type MarketResult<T> = Result<T, MarketError>;

// Conversion helpers
impl From<std::io::Error> for MarketError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => MarketError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                MarketError::PermissionDenied(error.to_string())
            }
            _ => MarketError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(error: serde_json::Error) -> Self {
        MarketError::ValidationError(format!("JSON error: {}", error))
    }
}
