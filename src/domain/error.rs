//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

/// Domain-specific errors
///
/// These are input and configuration errors. They are raised before any I/O
/// happens and never describe a financial inconsistency (those are anomalies).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Month outside 1..=12
    #[error("Invalid month: {0} (expected 1-12)")]
    InvalidMonth(u32),

    /// Year outside the supported range
    #[error("Invalid year: {0} (expected 2000-2100)")]
    InvalidYear(i32),

    /// Year given without month or the other way round
    #[error("Incomplete period: year and month must be given together")]
    IncompletePeriod,

    /// Split ratio outside [0, 1] or too precise
    #[error("Invalid split ratio for {category}: {reason}")]
    InvalidSplitRatio { category: String, reason: String },

    /// Split table is missing a category
    #[error("Split table {version} has no ratio for {category}")]
    MissingSplitRatio { version: String, category: String },

    /// Negative token amount supplied to the split calculator
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),
}

impl DomainError {
    /// Create an invalid split ratio error
    pub fn invalid_ratio(category: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSplitRatio {
            category: category.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error came from caller input (as opposed to configuration)
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMonth(_)
                | Self::InvalidYear(_)
                | Self::IncompletePeriod
                | Self::InvalidAmount(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_errors_are_input_errors() {
        assert!(DomainError::InvalidMonth(13).is_input_error());
        assert!(DomainError::InvalidYear(1999).is_input_error());
        assert!(DomainError::IncompletePeriod.is_input_error());
    }

    #[test]
    fn test_split_errors_are_configuration_errors() {
        let err = DomainError::invalid_ratio("chat", "greater than 1");
        assert!(!err.is_input_error());
        assert!(err.to_string().contains("chat"));

        let err = DomainError::MissingSplitRatio {
            version: "v2".to_string(),
            category: "call".to_string(),
        };
        assert!(err.to_string().contains("v2"));
    }

    #[test]
    fn test_invalid_year_message_names_range() {
        let msg = DomainError::InvalidYear(1800).to_string();
        assert!(msg.contains("2000"));
        assert!(msg.contains("2100"));
    }
}
