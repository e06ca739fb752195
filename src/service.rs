//! Finance Service
//!
//! The entry points shared by the HTTP surface, the scheduler and manual
//! invocations. Each operation validates its input before any I/O, delegates
//! to the aggregators or the reconciler, and appends an audit entry.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::aggregation::{
    AggregationError, AggregationSettings, BatchReport, EarningsBatchRunner,
    MonthlyEarningsAggregator, PlatformRollupAggregator,
};
use crate::audit::{AuditLogService, RunKind, RunRecord, RunStatus};
use crate::domain::{
    Clock, CreatorEarningsMonthly, FinanceAnomaly, OperationContext, Period,
    PlatformFinanceMonthly,
};
use crate::reconcile::{BalanceReconciler, DetectionReport, ReconcileError, ReconcileSettings};
use crate::store::{AnomalyFilter, FinanceStore};

/// Default number of users aggregated concurrently in a batch
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub aggregation: AggregationSettings,
    pub reconcile: ReconcileSettings,
    pub concurrency: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            aggregation: AggregationSettings::default(),
            reconcile: ReconcileSettings::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Everything an administrator sees for one user
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFinancialSummary {
    pub user_id: String,
    pub period: Period,
    pub current_month: CreatorEarningsMonthly,
    pub tokens_balance: Option<i64>,
    pub lifetime_net_earned: i64,
    pub lifetime_creator_share: i64,
    pub lifetime_payout_paid_tokens: i64,
    pub open_anomalies: Vec<FinanceAnomaly>,
}

pub struct FinanceService {
    store: Arc<dyn FinanceStore>,
    clock: Arc<dyn Clock>,
    earnings: Arc<MonthlyEarningsAggregator>,
    platform: PlatformRollupAggregator,
    batch: EarningsBatchRunner,
    reconciler: BalanceReconciler,
    audit: AuditLogService,
}

impl FinanceService {
    pub fn new(store: Arc<dyn FinanceStore>, clock: Arc<dyn Clock>, settings: ServiceSettings) -> Self {
        let earnings = Arc::new(MonthlyEarningsAggregator::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            settings.aggregation.clone(),
        ));
        let platform = PlatformRollupAggregator::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            settings.aggregation,
        );
        let batch = EarningsBatchRunner::new(Arc::clone(&earnings), settings.concurrency);
        let reconciler =
            BalanceReconciler::new(Arc::clone(&store), Arc::clone(&clock), settings.reconcile);
        let audit = AuditLogService::new(Arc::clone(&store));

        Self {
            store,
            clock,
            earnings,
            platform,
            batch,
            reconciler,
            audit,
        }
    }

    pub fn audit(&self) -> &AuditLogService {
        &self.audit
    }

    pub fn reconciler(&self) -> &BalanceReconciler {
        &self.reconciler
    }

    /// Month containing the current instant of the injected clock
    pub fn current_period(&self) -> Period {
        Period::containing(self.clock.now())
    }

    // =========================================================================
    // AggregateMonth
    // =========================================================================

    pub async fn aggregate_month(
        &self,
        user_id: &str,
        year: i32,
        month: u32,
        force: bool,
        context: &OperationContext,
    ) -> Result<CreatorEarningsMonthly, AggregationError> {
        let period = Period::new(year, month)?;
        if user_id.trim().is_empty() {
            return Err(AggregationError::EmptyUserId);
        }

        let record = RunRecord::start(RunKind::UserEarnings, self.clock.now())
            .user(user_id)
            .period(period);
        let result = self.earnings.aggregate(user_id, period, force).await;

        let record = match &result {
            Ok(_) => record.tally(1, 0),
            Err(e) => record.tally(0, 1).detail(e.to_string()),
        };
        self.audit
            .record_best_effort(record, context, self.clock.now())
            .await;

        result
    }

    // =========================================================================
    // AggregatePlatformMonth
    // =========================================================================

    pub async fn aggregate_platform_month(
        &self,
        year: i32,
        month: u32,
        force: bool,
        context: &OperationContext,
    ) -> Result<PlatformFinanceMonthly, AggregationError> {
        let period = Period::new(year, month)?;

        let record = RunRecord::start(RunKind::PlatformRollup, self.clock.now()).period(period);
        let result = self.platform.aggregate(period, force).await;

        let record = match &result {
            Ok(_) => record.tally(1, 0),
            Err(e) => record.tally(0, 1).detail(e.to_string()),
        };
        self.audit
            .record_best_effort(record, context, self.clock.now())
            .await;

        result
    }

    // =========================================================================
    // Earnings batch
    // =========================================================================

    /// Aggregate every user active in the month; see `EarningsBatchRunner`
    pub async fn run_earnings_batch(
        &self,
        period: Period,
        force: bool,
        cancel: watch::Receiver<bool>,
        context: &OperationContext,
    ) -> Result<BatchReport, AggregationError> {
        let record = RunRecord::start(RunKind::EarningsBatch, self.clock.now()).period(period);
        let result = self.batch.run_month(period, force, cancel).await;

        let record = match &result {
            Ok(report) => {
                let record = record.tally(report.processed, report.failed);
                if report.cancelled {
                    record.status(RunStatus::Cancelled).detail("cancelled between users")
                } else {
                    record
                }
            }
            Err(e) => record.status(RunStatus::Failed).detail(e.to_string()),
        };
        self.audit
            .record_best_effort(record, context, self.clock.now())
            .await;

        result
    }

    // =========================================================================
    // DetectAnomalies
    // =========================================================================

    pub async fn detect_anomalies(
        &self,
        user_id: Option<&str>,
        year: Option<i32>,
        month: Option<u32>,
        context: &OperationContext,
    ) -> Result<DetectionReport, ReconcileError> {
        let period = Period::from_parts(year, month)?;
        let user_id = match user_id.map(str::trim) {
            Some("") => return Err(ReconcileError::EmptyUserId),
            other => other,
        };

        let mut record = RunRecord::start(RunKind::Reconciliation, self.clock.now());
        if let Some(user_id) = user_id {
            record = record.user(user_id);
        }
        if let Some(period) = period {
            record = record.period(period);
        }

        let result = self.reconciler.detect(user_id, period).await;

        let record = match &result {
            Ok(report) => record
                .tally(report.users_checked, report.users_failed)
                .detail(format!(
                    "recorded {}, duplicates {}",
                    report.anomalies.len(),
                    report.duplicates.len()
                )),
            Err(e) => record.status(RunStatus::Failed).detail(e.to_string()),
        };
        self.audit
            .record_best_effort(record, context, self.clock.now())
            .await;

        result
    }

    // =========================================================================
    // GetSummary
    // =========================================================================

    /// Read-through summary: the current month's snapshot is aggregated on
    /// demand when it does not exist yet
    pub async fn get_summary(&self, user_id: &str) -> Result<UserFinancialSummary, AggregationError> {
        if user_id.trim().is_empty() {
            return Err(AggregationError::EmptyUserId);
        }
        let period = self.current_period();
        let current_month = self.earnings.aggregate(user_id, period, false).await?;

        let tokens_balance = self.store.balance(user_id).await?;
        let snapshots = self.store.earnings_snapshots_for_user(user_id).await?;
        let open_anomalies = self
            .store
            .anomalies(&AnomalyFilter::unresolved_for_user(user_id))
            .await?;

        Ok(UserFinancialSummary {
            user_id: user_id.to_string(),
            period,
            tokens_balance,
            lifetime_net_earned: snapshots.iter().map(|s| s.net_earned).sum(),
            lifetime_creator_share: snapshots.iter().map(|s| s.creator_share).sum(),
            lifetime_payout_paid_tokens: snapshots.iter().map(|s| s.payout_paid_tokens).sum(),
            current_month,
            open_anomalies,
        })
    }
}
