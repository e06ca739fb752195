//! Store Errors

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing persisted state
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backing store cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted record could not be mapped to its domain type
    #[error("Corrupt {entity} record {id}: {reason}")]
    Decode {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// Write rejected by a uniqueness or ordering constraint
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn decode(entity: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            entity,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Connectivity failures abort a whole run instead of one unit of work
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(StoreError::Unavailable("down".to_string()).is_fatal());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_fatal());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_fatal());
        assert!(!StoreError::decode("transaction", "tx-1", "bad direction").is_fatal());
        assert!(!StoreError::Conflict("seq".to_string()).is_fatal());
    }

    #[test]
    fn test_decode_message() {
        let err = StoreError::decode("transaction", "tx-9", "unknown direction 'X'");
        assert_eq!(
            err.to_string(),
            "Corrupt transaction record tx-9: unknown direction 'X'"
        );
    }
}
