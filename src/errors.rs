//! Error types for the lobby/match settlement core
//!
//! Every failure a caller can observe is a distinct `PayoutError` variant.
//! Store-level faults are kept in their own enum so backends can report
//! optimistic-lock conflicts without knowing about the domain.

use rust_decimal::Decimal;

/// Root error type for all core operations
#[derive(Debug, thiserror::Error)]
pub enum PayoutError {
    /// Lobby, match, wallet or transaction absent
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Non-positive wager, empty results, malformed ids
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No submitted result maps to a player of the match
    #[error("Invalid result: {0}")]
    InvalidResult(String),

    /// Optimistic retries exhausted on a concurrent mutation
    #[error("Contention on {operation}: gave up after {attempts} attempts")]
    Contention { operation: &'static str, attempts: u32 },

    /// Persistence dependency failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },

    #[error("Pricing oracle unavailable: {0}")]
    PricingUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Store faults that are neither outages nor missing records
    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl PayoutError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PayoutError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Only outages and lost races are worth retrying by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PayoutError::StoreUnavailable(_) | PayoutError::Contention { .. }
        )
    }
}

/// Errors reported by document store backends
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("duplicate {collection} id: {id}")]
    Duplicate { collection: &'static str, id: String },

    #[error("{collection} record not found: {id}")]
    NotFound { collection: &'static str, id: String },

    #[error("codec failure: {0}")]
    Codec(String),
}

impl From<StoreError> for PayoutError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => PayoutError::StoreUnavailable(msg),
            StoreError::NotFound { collection, id } => PayoutError::NotFound {
                entity: collection,
                id,
            },
            other => PayoutError::Storage(other),
        }
    }
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

// Convenience type alias for Results
pub type PayoutResult<T> = Result<T, PayoutError>;
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let err = PayoutError::not_found("lobby", "abc");
        assert_eq!(err.to_string(), "lobby not found: abc");

        let err = PayoutError::Contention {
            operation: "join_lobby",
            attempts: 8,
        };
        assert!(err.to_string().contains("8 attempts"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PayoutError::StoreUnavailable("down".into()).is_retryable());
        assert!(PayoutError::Contention {
            operation: "join_lobby",
            attempts: 3
        }
        .is_retryable());
        assert!(!PayoutError::InvalidInput("wager".into()).is_retryable());
        assert!(!PayoutError::InvalidResult("nobody".into()).is_retryable());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: PayoutError = StoreError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, PayoutError::StoreUnavailable(_)));

        let err: PayoutError = StoreError::NotFound {
            collection: "match",
            id: "m1".into(),
        }
        .into();
        assert!(matches!(err, PayoutError::NotFound { entity: "match", .. }));

        let err: PayoutError = StoreError::VersionConflict {
            expected: 1,
            found: 2,
        }
        .into();
        assert!(matches!(err, PayoutError::Storage(_)));
    }

    #[test]
    fn test_configuration_error_source() {
        let err: PayoutError = ConfigurationError::ValidationFailed("test".into()).into();
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.source().is_some());
    }
}
