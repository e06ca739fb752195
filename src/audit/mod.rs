//! Aggregation Run Audit Trail
//!
//! Every aggregation and reconciliation run is recorded with its outcome and
//! tally. Entries form a SHA-256 hash chain so that edits or deletions in the
//! persisted log are detectable.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{OperationContext, Period, Trigger};
use crate::store::{FinanceStore, StoreError};

/// Hash preceding the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What kind of run an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    UserEarnings,
    EarningsBatch,
    PlatformRollup,
    Reconciliation,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::UserEarnings => "user_earnings",
            RunKind::EarningsBatch => "earnings_batch",
            RunKind::PlatformRollup => "platform_rollup",
            RunKind::Reconciliation => "reconciliation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_earnings" => Some(RunKind::UserEarnings),
            "earnings_batch" => Some(RunKind::EarningsBatch),
            "platform_rollup" => Some(RunKind::PlatformRollup),
            "reconciliation" => Some(RunKind::Reconciliation),
            _ => None,
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    /// Some units failed, the rest were written
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(RunStatus::Succeeded),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// Status from a processed/failed tally
    pub fn from_tally(processed: u64, failed: u64) -> Self {
        match (processed, failed) {
            (_, 0) => RunStatus::Succeeded,
            (0, _) => RunStatus::Failed,
            _ => RunStatus::Partial,
        }
    }
}

/// Persisted, chained audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRun {
    pub id: Uuid,
    pub sequence_number: i64,
    pub kind: RunKind,
    pub trigger: Trigger,
    pub correlation_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub period: Option<Period>,
    pub status: RunStatus,
    pub processed: i64,
    pub failed: i64,
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub previous_hash: String,
    pub current_hash: String,
}

impl AggregationRun {
    /// Hash over every field except `current_hash`
    pub fn compute_hash(&self) -> String {
        let hash_input = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.sequence_number,
            self.kind,
            self.trigger,
            self.correlation_id.map(|c| c.to_string()).unwrap_or_default(),
            self.user_id.as_deref().unwrap_or_default(),
            self.period.map(|p| p.to_string()).unwrap_or_default(),
            self.status.as_str(),
            self.processed,
            self.failed,
            self.detail.as_deref().unwrap_or_default(),
            self.started_at.timestamp_micros(),
            self.finished_at.timestamp_micros(),
            self.previous_hash,
        );
        sha256_hex(&hash_input)
    }
}

/// Builder for a run entry, chained on write
#[derive(Debug, Clone)]
pub struct RunRecord {
    kind: RunKind,
    user_id: Option<String>,
    period: Option<Period>,
    status: RunStatus,
    processed: u64,
    failed: u64,
    detail: Option<String>,
    started_at: DateTime<Utc>,
}

impl RunRecord {
    /// Start a record; `started_at` is truncated to microseconds so the
    /// hash survives a round trip through Postgres
    pub fn start(kind: RunKind, started_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            user_id: None,
            period: None,
            status: RunStatus::Succeeded,
            processed: 0,
            failed: 0,
            detail: None,
            started_at: started_at.trunc_subsecs(6),
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }

    pub fn tally(mut self, processed: u64, failed: u64) -> Self {
        self.processed = processed;
        self.failed = failed;
        self.status = RunStatus::from_tally(processed, failed);
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }
}

/// Audit Log Service
#[derive(Clone)]
pub struct AuditLogService {
    store: Arc<dyn FinanceStore>,
    /// Serializes read-last-then-append so the chain never forks
    append_lock: Arc<Mutex<()>>,
}

impl AuditLogService {
    pub fn new(store: Arc<dyn FinanceStore>) -> Self {
        Self {
            store,
            append_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Chain and persist a run entry
    pub async fn record(
        &self,
        record: RunRecord,
        context: &OperationContext,
        finished_at: DateTime<Utc>,
    ) -> Result<AggregationRun, AuditLogError> {
        let _guard = self.append_lock.lock().await;

        let (sequence_number, previous_hash) = match self.store.last_run().await? {
            Some(last) => (last.sequence_number + 1, last.current_hash),
            None => (1, GENESIS_HASH.to_string()),
        };

        let mut run = AggregationRun {
            id: Uuid::new_v4(),
            sequence_number,
            kind: record.kind,
            trigger: context.trigger,
            correlation_id: context.correlation_id,
            user_id: record.user_id,
            period: record.period,
            status: record.status,
            processed: record.processed as i64,
            failed: record.failed as i64,
            detail: record.detail,
            started_at: record.started_at,
            finished_at: finished_at.trunc_subsecs(6),
            previous_hash,
            current_hash: String::new(),
        };
        run.current_hash = run.compute_hash();

        self.store.append_run(&run).await?;

        tracing::debug!(
            run_id = %run.id,
            kind = %run.kind,
            status = run.status.as_str(),
            sequence = run.sequence_number,
            "Aggregation run recorded"
        );

        Ok(run)
    }

    /// Record and swallow audit failures; the run itself already happened
    pub async fn record_best_effort(
        &self,
        record: RunRecord,
        context: &OperationContext,
        finished_at: DateTime<Utc>,
    ) {
        let kind = record.kind();
        if let Err(e) = self.record(record, context, finished_at).await {
            tracing::error!(error = %e, kind = %kind, "Failed to write audit entry");
        }
    }

    /// Verify the integrity of the run log hash chain
    pub async fn verify_chain(&self, limit: usize) -> Result<ChainVerificationResult, AuditLogError> {
        let runs = self.store.runs(limit).await?;
        Ok(verify_runs(&runs))
    }

    /// The latest `limit` entries, newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<AggregationRun>, AuditLogError> {
        Ok(self.store.recent_runs(limit).await?)
    }
}

/// Result of hash chain verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerificationResult {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_entry: Option<Uuid>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
}

/// Check linkage and recompute every hash, oldest first
pub fn verify_runs(runs: &[AggregationRun]) -> ChainVerificationResult {
    let mut previous_hash = GENESIS_HASH.to_string();

    for (checked, run) in runs.iter().enumerate() {
        if run.previous_hash != previous_hash {
            return ChainVerificationResult {
                is_valid: false,
                entries_checked: checked as u64 + 1,
                first_invalid_entry: Some(run.id),
                expected_hash: Some(previous_hash),
                actual_hash: Some(run.previous_hash.clone()),
            };
        }

        let calculated = run.compute_hash();
        if calculated != run.current_hash {
            return ChainVerificationResult {
                is_valid: false,
                entries_checked: checked as u64 + 1,
                first_invalid_entry: Some(run.id),
                expected_hash: Some(calculated),
                actual_hash: Some(run.current_hash.clone()),
            };
        }

        previous_hash = run.current_hash.clone();
    }

    ChainVerificationResult {
        is_valid: true,
        entries_checked: runs.len() as u64,
        first_invalid_entry: None,
        expected_hash: None,
        actual_hash: None,
    }
}

/// Calculate SHA-256 hash and return as hex string
fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AuditStore, InMemoryStore};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_run_status_from_tally() {
        assert_eq!(RunStatus::from_tally(10, 0), RunStatus::Succeeded);
        assert_eq!(RunStatus::from_tally(0, 0), RunStatus::Succeeded);
        assert_eq!(RunStatus::from_tally(9, 1), RunStatus::Partial);
        assert_eq!(RunStatus::from_tally(0, 3), RunStatus::Failed);
    }

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex("test input");
        assert_eq!(hash.len(), 64); // SHA-256 produces 64 hex characters
    }

    #[tokio::test]
    async fn test_chain_links_entries() {
        let store = Arc::new(InMemoryStore::new());
        let audit = AuditLogService::new(store);
        let context = OperationContext::scheduler();
        let period = Period::new(2026, 2).unwrap();

        let first = audit
            .record(RunRecord::start(RunKind::EarningsBatch, at(1)).period(period).tally(10, 0), &context, at(2))
            .await
            .unwrap();
        let second = audit
            .record(RunRecord::start(RunKind::PlatformRollup, at(2)).period(period), &context, at(3))
            .await
            .unwrap();

        assert_eq!(first.sequence_number, 1);
        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.previous_hash, first.current_hash);

        let result = audit.verify_chain(100).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.entries_checked, 2);
    }

    #[tokio::test]
    async fn test_tampering_is_detected() {
        let store = Arc::new(InMemoryStore::new());
        let audit = AuditLogService::new(store.clone());
        let context = OperationContext::manual();

        audit
            .record(RunRecord::start(RunKind::Reconciliation, at(1)).tally(5, 0), &context, at(1))
            .await
            .unwrap();
        audit
            .record(RunRecord::start(RunKind::Reconciliation, at(2)).tally(5, 0), &context, at(2))
            .await
            .unwrap();

        let mut runs = store.runs(10).await.unwrap();
        runs[0].processed = 500;

        let result = verify_runs(&runs);
        assert!(!result.is_valid);
        assert_eq!(result.first_invalid_entry, Some(runs[0].id));
        assert_eq!(result.entries_checked, 1);
    }

    #[tokio::test]
    async fn test_recent_returns_newest_first() {
        let store = Arc::new(InMemoryStore::new());
        let audit = AuditLogService::new(store);
        let context = OperationContext::manual();

        for hour in 1..=3 {
            audit
                .record(RunRecord::start(RunKind::Reconciliation, at(hour)), &context, at(hour))
                .await
                .unwrap();
        }

        let recent = audit.recent(2).await.unwrap();
        let sequence: Vec<i64> = recent.iter().map(|r| r.sequence_number).collect();
        assert_eq!(sequence, vec![3, 2]);
    }
}
