//! Aggregation module
//!
//! Derives the monthly snapshots from the transaction log. Every run
//! recomputes its snapshot from scratch and merge-upserts it, so re-runs
//! overwrite instead of double counting.

mod batch;
mod earnings;
mod platform;

use std::sync::Arc;

use crate::domain::{DomainError, FiatConversion, SplitTable};
use crate::store::StoreError;

pub use batch::{BatchReport, EarningsBatchRunner, UserFailure};
pub use earnings::{EarningsTotals, MonthlyEarningsAggregator};
pub use platform::{PlatformRollupAggregator, PlatformTotals};

/// Default transaction page size for log scans
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Shared knobs for both aggregators
#[derive(Debug, Clone)]
pub struct AggregationSettings {
    pub split_table: Arc<SplitTable>,
    pub fiat: FiatConversion,
    pub page_size: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            split_table: Arc::new(SplitTable::v1()),
            fiat: FiatConversion::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("User id must not be empty")]
    EmptyUserId,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Aggregation task failed: {0}")]
    Task(String),
}

impl AggregationError {
    /// Store connectivity failures abort a batch
    pub fn is_fatal(&self) -> bool {
        matches!(self, AggregationError::Store(e) if e.is_fatal())
    }

    /// Rejected before any I/O
    pub fn is_input_error(&self) -> bool {
        match self {
            AggregationError::EmptyUserId => true,
            AggregationError::Domain(e) => e.is_input_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(AggregationError::EmptyUserId.is_input_error());
        assert!(AggregationError::Domain(DomainError::InvalidMonth(13)).is_input_error());
        assert!(AggregationError::Store(StoreError::Unavailable("down".into())).is_fatal());
        assert!(!AggregationError::Task("panicked".into()).is_fatal());
    }
}
