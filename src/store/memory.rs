//! In-memory store
//!
//! A complete `FinanceStore` kept in process memory. Used by the test suite
//! and for dry runs; supports injecting read failures per user and whole-store
//! unavailability.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tokio::sync::RwLock;

use crate::audit::AggregationRun;
use crate::domain::{
    CreatorEarningsMonthly, FinanceAnomaly, PayoutRecord, Period, PlatformFinanceMonthly,
    UserWallet, WalletTransaction,
};

use super::{
    AnomalyFilter, AnomalyStore, AuditStore, InsertOutcome, PageCursor, PayoutLedger,
    PayoutQuery, SnapshotStore, StoreError, StoreResult, TimeRange, TransactionLog,
    TransactionPage, TransactionQuery, WalletCache,
};

#[derive(Debug, Default)]
struct State {
    /// Keyed by `(created_at, id)` so iteration is the log order
    transactions: BTreeMap<(chrono::DateTime<chrono::Utc>, String), WalletTransaction>,
    wallets: BTreeMap<String, UserWallet>,
    payouts: Vec<PayoutRecord>,
    earnings: BTreeMap<(String, Period), CreatorEarningsMonthly>,
    platform: BTreeMap<Period, PlatformFinanceMonthly>,
    anomalies: Vec<FinanceAnomaly>,
    runs: Vec<AggregationRun>,
    failing_users: HashSet<String>,
    unavailable: bool,
}

impl State {
    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }

    fn check_user(&self, user_id: &str) -> StoreResult<()> {
        self.check_available()?;
        if self.failing_users.contains(user_id) {
            return Err(StoreError::decode("transaction", user_id, "injected read failure"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_transaction(&self, tx: WalletTransaction) {
        let mut state = self.state.write().await;
        state.transactions.insert((tx.created_at, tx.id.clone()), tx);
    }

    pub async fn insert_transactions(&self, txs: impl IntoIterator<Item = WalletTransaction>) {
        let mut state = self.state.write().await;
        for tx in txs {
            state.transactions.insert((tx.created_at, tx.id.clone()), tx);
        }
    }

    pub async fn put_wallet(&self, wallet: UserWallet) {
        let mut state = self.state.write().await;
        state.wallets.insert(wallet.user_id.clone(), wallet);
    }

    pub async fn insert_payout(&self, payout: PayoutRecord) {
        self.state.write().await.payouts.push(payout);
    }

    /// Make every read scoped to this user fail
    pub async fn fail_reads_for(&self, user_id: impl Into<String>) {
        self.state.write().await.failing_users.insert(user_id.into());
    }

    /// Make every operation fail as if the backing store were unreachable
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Review workflow stand-in: move an anomaly to a new status
    pub async fn set_anomaly_status(
        &self,
        id: uuid::Uuid,
        status: crate::domain::AnomalyStatus,
        by: &str,
    ) -> bool {
        let mut state = self.state.write().await;
        let now = chrono::Utc::now();
        match state.anomalies.iter_mut().find(|a| a.id == id) {
            Some(anomaly) => {
                anomaly.status = status;
                if status == crate::domain::AnomalyStatus::Resolved {
                    anomaly.resolved_at = Some(now);
                    anomaly.resolved_by = Some(by.to_string());
                }
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TransactionLog for InMemoryStore {
    async fn transactions_page(
        &self,
        query: &TransactionQuery,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> StoreResult<TransactionPage> {
        let state = self.state.read().await;
        match &query.user_id {
            Some(user_id) => state.check_user(user_id)?,
            None => state.check_available()?,
        }

        let transactions: Vec<WalletTransaction> = state
            .transactions
            .iter()
            .filter(|((created_at, id), _)| {
                after.map_or(true, |c| (*created_at, id.as_str()) > (c.created_at, c.id.as_str()))
            })
            .map(|(_, tx)| tx)
            .filter(|tx| query.user_id.as_ref().map_or(true, |u| &tx.user_id == u))
            .filter(|tx| query.range.contains(tx.created_at))
            .take(limit)
            .cloned()
            .collect();

        let next = if transactions.len() == limit {
            transactions.last().map(PageCursor::after)
        } else {
            None
        };

        Ok(TransactionPage { transactions, next })
    }

    async fn transaction(&self, id: &str) -> StoreResult<Option<WalletTransaction>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.transactions.values().find(|tx| tx.id == id).cloned())
    }

    async fn active_users(&self, range: TimeRange) -> StoreResult<Vec<String>> {
        let state = self.state.read().await;
        state.check_available()?;
        let users: BTreeSet<String> = state
            .transactions
            .values()
            .filter(|tx| range.contains(tx.created_at))
            .map(|tx| tx.user_id.clone())
            .collect();
        Ok(users.into_iter().collect())
    }
}

#[async_trait]
impl PayoutLedger for InMemoryStore {
    async fn payouts(&self, query: &PayoutQuery) -> StoreResult<Vec<PayoutRecord>> {
        let state = self.state.read().await;
        match &query.user_id {
            Some(user_id) => state.check_user(user_id)?,
            None => state.check_available()?,
        }
        Ok(state.payouts.iter().filter(|p| query.matches(p)).cloned().collect())
    }
}

#[async_trait]
impl WalletCache for InMemoryStore {
    async fn wallet(&self, user_id: &str) -> StoreResult<Option<UserWallet>> {
        let state = self.state.read().await;
        state.check_user(user_id)?;
        Ok(state.wallets.get(user_id).cloned())
    }

    async fn wallet_user_ids(&self) -> StoreResult<Vec<String>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.wallets.keys().cloned().collect())
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn earnings_snapshot(
        &self,
        user_id: &str,
        period: Period,
    ) -> StoreResult<Option<CreatorEarningsMonthly>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.earnings.get(&(user_id.to_string(), period)).cloned())
    }

    async fn upsert_earnings_snapshot(
        &self,
        snapshot: &CreatorEarningsMonthly,
    ) -> StoreResult<CreatorEarningsMonthly> {
        let period = Period::new(snapshot.year, snapshot.month)
            .map_err(|e| StoreError::decode("earnings snapshot", &snapshot.user_id, e.to_string()))?;

        let mut state = self.state.write().await;
        state.check_available()?;

        let mut stored = snapshot.clone();
        let key = (snapshot.user_id.clone(), period);
        if let Some(existing) = state.earnings.get(&key) {
            stored.generated_at = existing.generated_at;
        }
        state.earnings.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_earnings_snapshot(&self, user_id: &str, period: Period) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        state.check_available()?;
        Ok(state.earnings.remove(&(user_id.to_string(), period)).is_some())
    }

    async fn earnings_snapshots_for_user(
        &self,
        user_id: &str,
    ) -> StoreResult<Vec<CreatorEarningsMonthly>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .earnings
            .iter()
            .filter(|((u, _), _)| u == user_id)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn lifetime_creator_share(&self, through: Period) -> StoreResult<i64> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state
            .earnings
            .iter()
            .filter(|((_, period), _)| *period <= through)
            .map(|(_, s)| s.creator_share)
            .sum())
    }

    async fn platform_snapshot(&self, period: Period) -> StoreResult<Option<PlatformFinanceMonthly>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.platform.get(&period).cloned())
    }

    async fn upsert_platform_snapshot(
        &self,
        snapshot: &PlatformFinanceMonthly,
    ) -> StoreResult<PlatformFinanceMonthly> {
        let period = Period::new(snapshot.year, snapshot.month).map_err(|e| {
            StoreError::decode("platform snapshot", format!("{}-{}", snapshot.year, snapshot.month), e.to_string())
        })?;

        let mut state = self.state.write().await;
        state.check_available()?;

        let mut stored = snapshot.clone();
        if let Some(existing) = state.platform.get(&period) {
            stored.generated_at = existing.generated_at;
        }
        state.platform.insert(period, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl AnomalyStore for InMemoryStore {
    async fn insert_anomaly(&self, anomaly: &FinanceAnomaly) -> StoreResult<InsertOutcome> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let key = anomaly.key();
        if let Some(existing) = state
            .anomalies
            .iter()
            .find(|a| !a.is_resolved() && a.key() == key)
        {
            return Ok(InsertOutcome::Duplicate {
                existing_id: existing.id,
            });
        }

        state.anomalies.push(anomaly.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn anomalies(&self, filter: &AnomalyFilter) -> StoreResult<Vec<FinanceAnomaly>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.anomalies.iter().filter(|a| filter.matches(a)).cloned().collect())
    }
}

#[async_trait]
impl AuditStore for InMemoryStore {
    async fn append_run(&self, run: &AggregationRun) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let expected = state.runs.last().map_or(1, |r| r.sequence_number + 1);
        if run.sequence_number != expected {
            return Err(StoreError::Conflict(format!(
                "audit sequence {} (expected {})",
                run.sequence_number, expected
            )));
        }
        state.runs.push(run.clone());
        Ok(())
    }

    async fn last_run(&self) -> StoreResult<Option<AggregationRun>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.runs.last().cloned())
    }

    async fn runs(&self, limit: usize) -> StoreResult<Vec<AggregationRun>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.runs.iter().take(limit).cloned().collect())
    }

    async fn recent_runs(&self, limit: usize) -> StoreResult<Vec<AggregationRun>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.runs.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, PayoutStatus, TransactionType};
    use crate::store::read_all_transactions;
    use chrono::{TimeZone, Utc};

    fn tx(id: &str, user: &str, minute: u32) -> WalletTransaction {
        WalletTransaction::new(
            id,
            user,
            TransactionType::Purchase,
            Direction::In,
            10,
            Utc.with_ymd_and_hms(2026, 3, 1, 0, minute, 0).unwrap(),
        )
    }

    #[test]
    fn test_pagination_visits_every_transaction_once() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            store
                .insert_transactions((0..7).map(|i| tx(&format!("tx-{}", i), "u-1", i)))
                .await;
            // Same timestamp, tie broken by id
            store.insert_transaction(tx("tx-3b", "u-1", 3)).await;

            let all = read_all_transactions(&store, &TransactionQuery::all_users(TimeRange::all()), 3)
                .await
                .unwrap();
            let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
            assert_eq!(ids, vec!["tx-0", "tx-1", "tx-2", "tx-3", "tx-3b", "tx-4", "tx-5", "tx-6"]);
        });
    }

    #[test]
    fn test_injected_failures() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            store.insert_transaction(tx("tx-1", "u-bad", 1)).await;
            store.fail_reads_for("u-bad").await;

            let query = TransactionQuery::for_user("u-bad", TimeRange::all());
            let err = store.transactions_page(&query, None, 10).await.unwrap_err();
            assert!(!err.is_fatal());

            store.set_unavailable(true).await;
            let err = store.active_users(TimeRange::all()).await.unwrap_err();
            assert!(err.is_fatal());
        });
    }

    #[test]
    fn test_paid_payout_total_counts_paid_only() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let payout = |id: &str, tokens: i64, status: PayoutStatus, day: Option<u32>| PayoutRecord {
                id: id.to_string(),
                user_id: "u-1".to_string(),
                tokens,
                fiat_amount: rust_decimal::Decimal::ZERO,
                currency: "PLN".to_string(),
                status,
                requested_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
                paid_at: day.map(|d| Utc.with_ymd_and_hms(2026, 3, d, 0, 0, 0).unwrap()),
            };
            store.insert_payout(payout("p-1", 40, PayoutStatus::Paid, Some(2))).await;
            store.insert_payout(payout("p-2", 25, PayoutStatus::Paid, Some(20))).await;
            store.insert_payout(payout("p-3", 99, PayoutStatus::Requested, None)).await;
            store.insert_payout(payout("p-4", 77, PayoutStatus::Rejected, None)).await;

            assert_eq!(store.paid_payout_total(TimeRange::all()).await.unwrap(), 65);
            let before_mid_march = TimeRange::before(Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap());
            assert_eq!(store.paid_payout_total(before_mid_march).await.unwrap(), 40);
        });
    }
}
