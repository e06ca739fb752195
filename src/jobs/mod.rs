//! Scheduled Jobs
//!
//! Periodic triggers for the aggregation and reconciliation runs. The
//! scheduler only decides *when*; every cycle calls the same `FinanceService`
//! entry points as the HTTP surface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;

use crate::aggregation::{AggregationError, BatchReport};
use crate::domain::{OperationContext, Period};
use crate::reconcile::ReconcileError;
use crate::service::FinanceService;

// =========================================================================
// Earnings cycle
// =========================================================================

/// Outcome of one earnings cycle for one month
#[derive(Debug, Clone, Serialize)]
pub struct PeriodRun {
    pub period: Period,
    pub batch: BatchReport,
    pub platform_written: bool,
}

/// Earnings batch then forced platform rollup, for the previous and the
/// current month. Late transactions for last month are picked up this way.
///
/// The rollup for a month is skipped when its batch was cancelled, since its
/// liability figure reads the per-user snapshots.
pub async fn run_earnings_cycle(
    service: &FinanceService,
    cancel: watch::Receiver<bool>,
) -> Result<Vec<PeriodRun>, JobError> {
    let context = OperationContext::scheduler();
    let current = service.current_period();
    let mut runs = Vec::new();

    for period in [current.previous(), current] {
        let batch = service
            .run_earnings_batch(period, true, cancel.clone(), &context)
            .await?;

        if batch.cancelled {
            runs.push(PeriodRun {
                period,
                batch,
                platform_written: false,
            });
            break;
        }

        service
            .aggregate_platform_month(period.year(), period.month(), true, &context)
            .await?;
        runs.push(PeriodRun {
            period,
            batch,
            platform_written: true,
        });
    }

    Ok(runs)
}

// =========================================================================
// Reconciliation cycle
// =========================================================================

/// Counts from one reconciliation cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileRun {
    pub users_checked: u64,
    pub users_failed: u64,
    pub anomalies_recorded: usize,
    pub duplicates: usize,
}

/// Balance check for every wallet, then split and refund checks for the
/// current month
pub async fn run_reconciliation_cycle(service: &FinanceService) -> Result<ReconcileRun, JobError> {
    let context = OperationContext::scheduler();
    let current = service.current_period();

    let wallets = service.detect_anomalies(None, None, None, &context).await?;
    let period_checks = service
        .detect_anomalies(None, Some(current.year()), Some(current.month()), &context)
        .await?;

    let run = ReconcileRun {
        users_checked: wallets.users_checked,
        users_failed: wallets.users_failed,
        anomalies_recorded: wallets.anomalies.len() + period_checks.anomalies.len(),
        duplicates: wallets.duplicates.len() + period_checks.duplicates.len(),
    };

    if run.anomalies_recorded > 0 {
        tracing::warn!(
            anomalies_recorded = run.anomalies_recorded,
            "Reconciliation cycle recorded new anomalies"
        );
    }

    Ok(run)
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval for the earnings cycle (default: 24 hours)
    pub earnings_interval: Duration,
    /// Interval for the reconciliation cycle (default: 24 hours)
    pub reconcile_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            earnings_interval: Duration::from_secs(86_400),
            reconcile_interval: Duration::from_secs(86_400),
        }
    }
}

/// Job Scheduler - runs the periodic cycles until cancelled
pub struct JobScheduler {
    service: Arc<FinanceService>,
    config: JobSchedulerConfig,
    cancel: watch::Receiver<bool>,
}

impl JobScheduler {
    pub fn new(service: Arc<FinanceService>, cancel: watch::Receiver<bool>) -> Self {
        Self {
            service,
            config: JobSchedulerConfig::default(),
            cancel,
        }
    }

    pub fn with_config(
        service: Arc<FinanceService>,
        config: JobSchedulerConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            config,
            cancel,
        }
    }

    /// Start the job scheduler in the background
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop
    async fn run(mut self) {
        tracing::info!("Job scheduler started");

        let mut earnings_interval = interval(self.config.earnings_interval);
        let mut reconcile_interval = interval(self.config.reconcile_interval);

        loop {
            if *self.cancel.borrow() {
                break;
            }

            tokio::select! {
                changed = self.cancel.changed() => {
                    // Sender dropped counts as shutdown too
                    if changed.is_err() || *self.cancel.borrow() {
                        break;
                    }
                }
                _ = earnings_interval.tick() => {
                    match run_earnings_cycle(&self.service, self.cancel.clone()).await {
                        Ok(runs) => {
                            for run in &runs {
                                tracing::info!(
                                    period = %run.period,
                                    processed = run.batch.processed,
                                    failed = run.batch.failed,
                                    "Earnings cycle period done"
                                );
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "Earnings cycle failed"),
                    }
                }
                _ = reconcile_interval.tick() => {
                    if let Err(e) = run_reconciliation_cycle(&self.service).await {
                        tracing::error!(error = %e, "Reconciliation cycle failed");
                    }
                }
            }
        }

        tracing::info!("Job scheduler stopped");
    }

    /// Run both cycles once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match run_earnings_cycle(&self.service, self.cancel.clone()).await {
            Ok(runs) => report.earnings = runs,
            Err(e) => report.errors.push(format!("Earnings cycle: {}", e)),
        }

        match run_reconciliation_cycle(&self.service).await {
            Ok(run) => report.reconciliation = Some(run),
            Err(e) => report.errors.push(format!("Reconciliation cycle: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running the cycles once
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub earnings: Vec<PeriodRun>,
    pub reconciliation: Option<ReconcileRun>,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl MaintenanceReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.earnings.iter().all(|r| r.batch.is_clean())
    }
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

// =========================================================================
// Tests
// =========================================================================
