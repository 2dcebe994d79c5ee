//! Engine error taxonomy.

use rusqlite::ErrorCode;

/// Errors surfaced by the compensation engine.
#[derive(Debug)]
pub enum EngineError {
    /// Missing user / node / reward / investment / progress record.
    NotFound(String),
    /// Balance (or income) below the amount a debit requires.
    InsufficientFunds { needed: f64, available: f64 },
    /// Operation not allowed in the record's current state.
    InvalidState(String),
    /// Store/lock failure. Retryable.
    TransientStore(rusqlite::Error),
    /// Missing or malformed configuration. Not retried.
    Configuration(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_state(why: impl Into<String>) -> Self {
        Self::InvalidState(why.into())
    }

    /// Whether the caller may retry the same unit of work.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientStore(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(what) => write!(f, "Not found: {}", what),
            Self::InsufficientFunds { needed, available } => write!(
                f,
                "Insufficient funds: need {:.2}, available {:.2}",
                needed, available
            ),
            Self::InvalidState(why) => write!(f, "Invalid state: {}", why),
            Self::TransientStore(e) => write!(f, "Store error: {}", e),
            Self::Configuration(why) => write!(f, "Configuration error: {}", why),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TransientStore(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::TransientStore(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_store_errors_are_retryable() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(EngineError::from(busy).is_retryable());
        assert!(!EngineError::not_found("user 7").is_retryable());
        assert!(!EngineError::Configuration("bad".into()).is_retryable());
    }

    #[test]
    fn test_display_names_the_cause() {
        let err = EngineError::InsufficientFunds {
            needed: 100.0,
            available: 40.5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: need 100.00, available 40.50"
        );
    }
}
