//! Store module
//!
//! Repository interfaces the engine reads and writes through, with a
//! Postgres implementation and an in-memory implementation for tests.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::AggregationRun;
use crate::domain::{
    AnomalyStatus, AnomalyType, CreatorEarningsMonthly, FinanceAnomaly, PayoutRecord,
    PayoutStatus, Period, PlatformFinanceMonthly, UserWallet, WalletTransaction,
};

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use postgres::PgFinanceStore;

// =========================================================================
// Query types
// =========================================================================

/// Half-open time window; `None` bounds are open-ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Entire history
    pub fn all() -> Self {
        Self::default()
    }

    /// `[period.start, period.end)`
    pub fn month(period: Period) -> Self {
        Self {
            start: Some(period.start()),
            end: Some(period.end()),
        }
    }

    /// Everything strictly before `end`
    pub fn before(end: DateTime<Utc>) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }
}

/// Filter for transaction log reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionQuery {
    pub user_id: Option<String>,
    pub range: TimeRange,
}

impl TransactionQuery {
    pub fn for_user(user_id: impl Into<String>, range: TimeRange) -> Self {
        Self {
            user_id: Some(user_id.into()),
            range,
        }
    }

    pub fn all_users(range: TimeRange) -> Self {
        Self {
            user_id: None,
            range,
        }
    }
}

/// Keyset cursor: position after the last returned `(created_at, id)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl PageCursor {
    pub fn after(tx: &WalletTransaction) -> Self {
        Self {
            created_at: tx.created_at,
            id: tx.id.clone(),
        }
    }
}

/// One page of transactions ordered by `(created_at, id)`
#[derive(Debug, Clone, Default)]
pub struct TransactionPage {
    pub transactions: Vec<WalletTransaction>,
    pub next: Option<PageCursor>,
}

/// Which payout timestamp a time range applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutTimeBasis {
    RequestedAt,
    PaidAt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutQuery {
    pub user_id: Option<String>,
    pub range: TimeRange,
    pub statuses: Vec<PayoutStatus>,
    pub basis: PayoutTimeBasis,
}

impl PayoutQuery {
    /// Payouts paid inside the range
    pub fn paid(user_id: Option<String>, range: TimeRange) -> Self {
        Self {
            user_id,
            range,
            statuses: vec![PayoutStatus::Paid],
            basis: PayoutTimeBasis::PaidAt,
        }
    }

    /// Live payout requests created inside the range
    pub fn requested(user_id: Option<String>, range: TimeRange) -> Self {
        Self {
            user_id,
            range,
            statuses: PayoutStatus::OPEN_OR_PAID.to_vec(),
            basis: PayoutTimeBasis::RequestedAt,
        }
    }

    /// Stored status spellings accepted by this query; `None` means any
    pub fn status_spellings(&self) -> Option<Vec<String>> {
        if self.statuses.is_empty() {
            return None;
        }
        Some(
            self.statuses
                .iter()
                .flat_map(|s| s.aliases().iter().map(|a| a.to_string()))
                .collect(),
        )
    }

    pub fn matches(&self, payout: &PayoutRecord) -> bool {
        if let Some(user_id) = &self.user_id {
            if &payout.user_id != user_id {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&payout.status) {
            return false;
        }
        match self.basis {
            PayoutTimeBasis::RequestedAt => self.range.contains(payout.requested_at),
            PayoutTimeBasis::PaidAt => payout.paid_at.map_or(false, |at| self.range.contains(at)),
        }
    }
}

/// Result of an anomaly insert under the `(type, user, period)` constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate { existing_id: Uuid },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnomalyFilter {
    pub user_id: Option<String>,
    pub period: Option<Period>,
    pub anomaly_type: Option<AnomalyType>,
    /// Empty means any status
    pub statuses: Vec<AnomalyStatus>,
}

impl AnomalyFilter {
    pub fn unresolved_for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            statuses: vec![AnomalyStatus::Open, AnomalyStatus::Reviewed],
            ..Default::default()
        }
    }

    pub fn matches(&self, anomaly: &FinanceAnomaly) -> bool {
        self.user_id
            .as_ref()
            .map_or(true, |u| anomaly.user_id.as_ref() == Some(u))
            && self.period.map_or(true, |p| anomaly.period == Some(p))
            && self.anomaly_type.map_or(true, |t| anomaly.anomaly_type == t)
            && (self.statuses.is_empty() || self.statuses.contains(&anomaly.status))
    }
}

// =========================================================================
// Repository traits
// =========================================================================

/// Append-only wallet transaction log (owned by the producers)
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Read one page ordered by `(created_at, id)`, starting after `after`
    async fn transactions_page(
        &self,
        query: &TransactionQuery,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> StoreResult<TransactionPage>;

    async fn transaction(&self, id: &str) -> StoreResult<Option<WalletTransaction>>;

    /// Distinct users with at least one transaction in the range
    async fn active_users(&self, range: TimeRange) -> StoreResult<Vec<String>>;
}

/// Payout records (owned by the payout subsystem)
#[async_trait]
pub trait PayoutLedger: Send + Sync {
    async fn payouts(&self, query: &PayoutQuery) -> StoreResult<Vec<PayoutRecord>>;

    /// Tokens of all payouts paid inside the range
    async fn paid_payout_total(&self, range: TimeRange) -> StoreResult<i64> {
        Ok(self
            .payouts(&PayoutQuery::paid(None, range))
            .await?
            .iter()
            .map(|p| p.tokens)
            .sum())
    }
}

/// Cached wallet state (owned by the producers)
#[async_trait]
pub trait WalletCache: Send + Sync {
    async fn wallet(&self, user_id: &str) -> StoreResult<Option<UserWallet>>;

    async fn wallet_user_ids(&self) -> StoreResult<Vec<String>>;

    async fn balance(&self, user_id: &str) -> StoreResult<Option<i64>> {
        Ok(self.wallet(user_id).await?.map(|w| w.tokens_balance))
    }
}

/// Earnings and platform snapshots written by the aggregators
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn earnings_snapshot(
        &self,
        user_id: &str,
        period: Period,
    ) -> StoreResult<Option<CreatorEarningsMonthly>>;

    /// Merge-upsert: overwrites every computed field, keeps the first
    /// `generated_at`. Returns the stored document.
    async fn upsert_earnings_snapshot(
        &self,
        snapshot: &CreatorEarningsMonthly,
    ) -> StoreResult<CreatorEarningsMonthly>;

    async fn delete_earnings_snapshot(&self, user_id: &str, period: Period) -> StoreResult<bool>;

    async fn earnings_snapshots_for_user(
        &self,
        user_id: &str,
    ) -> StoreResult<Vec<CreatorEarningsMonthly>>;

    /// Sum of `creator_share` over every user's snapshots with period <= `through`
    async fn lifetime_creator_share(&self, through: Period) -> StoreResult<i64>;

    async fn platform_snapshot(&self, period: Period) -> StoreResult<Option<PlatformFinanceMonthly>>;

    async fn upsert_platform_snapshot(
        &self,
        snapshot: &PlatformFinanceMonthly,
    ) -> StoreResult<PlatformFinanceMonthly>;
}

/// Anomaly records; enforces one unresolved record per `(type, user, period)`
#[async_trait]
pub trait AnomalyStore: Send + Sync {
    async fn insert_anomaly(&self, anomaly: &FinanceAnomaly) -> StoreResult<InsertOutcome>;

    async fn anomalies(&self, filter: &AnomalyFilter) -> StoreResult<Vec<FinanceAnomaly>>;
}

/// Hash-chained log of aggregation runs
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a fully chained entry; fails on a sequence number collision
    async fn append_run(&self, run: &AggregationRun) -> StoreResult<()>;

    async fn last_run(&self) -> StoreResult<Option<AggregationRun>>;

    /// Oldest first
    async fn runs(&self, limit: usize) -> StoreResult<Vec<AggregationRun>>;

    /// Newest first
    async fn recent_runs(&self, limit: usize) -> StoreResult<Vec<AggregationRun>>;
}

/// Everything the engine needs from persistence
pub trait FinanceStore:
    TransactionLog + PayoutLedger + WalletCache + SnapshotStore + AnomalyStore + AuditStore
{
}

impl<T> FinanceStore for T where
    T: TransactionLog + PayoutLedger + WalletCache + SnapshotStore + AnomalyStore + AuditStore
{
}

/// Drain every page of a transaction query
pub async fn read_all_transactions<L>(
    log: &L,
    query: &TransactionQuery,
    page_size: usize,
) -> StoreResult<Vec<WalletTransaction>>
where
    L: TransactionLog + ?Sized,
{
    let page_size = page_size.max(1);
    let mut all = Vec::new();
    let mut cursor: Option<PageCursor> = None;

    loop {
        let page = log
            .transactions_page(query, cursor.as_ref(), page_size)
            .await?;
        all.extend(page.transactions);

        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn payout(status: PayoutStatus, paid_day: Option<u32>) -> PayoutRecord {
        PayoutRecord {
            id: "p-1".to_string(),
            user_id: "u-1".to_string(),
            tokens: 100,
            fiat_amount: Decimal::new(2000, 2),
            currency: "PLN".to_string(),
            status,
            requested_at: Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap(),
            paid_at: paid_day.map(|d| Utc.with_ymd_and_hms(2026, 4, d, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_time_range_contains() {
        let period = Period::new(2026, 3).unwrap();
        let range = TimeRange::month(period);
        assert!(range.contains(period.start()));
        assert!(!range.contains(period.end()));
        assert!(TimeRange::all().contains(period.end()));
        assert!(!TimeRange::before(period.start()).contains(period.start()));
    }

    #[test]
    fn test_payout_query_basis() {
        let march = TimeRange::month(Period::new(2026, 3).unwrap());
        let april = TimeRange::month(Period::new(2026, 4).unwrap());

        let paid = payout(PayoutStatus::Paid, Some(2));
        assert!(PayoutQuery::requested(None, march).matches(&paid));
        assert!(!PayoutQuery::paid(None, march).matches(&paid));
        assert!(PayoutQuery::paid(None, april).matches(&paid));

        let rejected = payout(PayoutStatus::Rejected, None);
        assert!(!PayoutQuery::requested(None, march).matches(&rejected));

        let other_user = PayoutQuery::requested(Some("u-2".to_string()), march);
        assert!(!other_user.matches(&paid));
    }

    #[test]
    fn test_status_spellings_cover_aliases() {
        let range = TimeRange::all();
        let paid = PayoutQuery::paid(None, range).status_spellings().unwrap();
        assert_eq!(paid, vec!["paid".to_string(), "completed".to_string()]);

        let requested = PayoutQuery::requested(None, range).status_spellings().unwrap();
        assert!(requested.contains(&"pending".to_string()));
        assert!(!requested.contains(&"rejected".to_string()));

        let any = PayoutQuery {
            statuses: Vec::new(),
            ..PayoutQuery::paid(None, range)
        };
        assert_eq!(any.status_spellings(), None);
    }
}
