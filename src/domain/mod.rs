//! Domain module
//!
//! Core domain types and the pure classification and split logic.

pub mod anomaly;
pub mod classifier;
pub mod clock;
pub mod context;
pub mod error;
pub mod period;
pub mod snapshot;
pub mod split;
pub mod transaction;

pub use anomaly::{AnomalyKey, AnomalyStatus, AnomalyType, FinanceAnomaly, Severity};
pub use classifier::{classify, Classification, SourceCategory};
pub use clock::{Clock, FixedClock, SystemClock};
pub use context::{OperationContext, Trigger};
pub use error::DomainError;
pub use period::Period;
pub use snapshot::{CreatorEarningsMonthly, FiatConversion, PlatformFinanceMonthly, SourceAmounts};
pub use split::{split_amount, CreatorRatio, Split, SplitTable, SplitTableConfig};
pub use transaction::{
    Direction, PayoutRecord, PayoutStatus, TransactionMeta, TransactionType, UserWallet,
    WalletTransaction,
};
