//! Earnings batch runner
//!
//! Fans `MonthlyEarningsAggregator::aggregate` out over every user active in
//! a month, at most `concurrency` at a time. A failing user is tallied and
//! skipped; a fatal store error aborts the run. Cancellation is checked
//! between users, so snapshots already written stay intact.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::domain::{CreatorEarningsMonthly, Period};
use crate::store::TimeRange;

use super::{AggregationError, MonthlyEarningsAggregator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserFailure {
    pub user_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: u64,
    pub failed: u64,
    pub failures: Vec<UserFailure>,
    /// Stopped early on the cancellation signal
    pub cancelled: bool,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }
}

type UserOutcome = (String, Result<CreatorEarningsMonthly, AggregationError>);

pub struct EarningsBatchRunner {
    aggregator: Arc<MonthlyEarningsAggregator>,
    semaphore: Arc<Semaphore>,
}

impl EarningsBatchRunner {
    pub fn new(aggregator: Arc<MonthlyEarningsAggregator>, concurrency: usize) -> Self {
        Self {
            aggregator,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub async fn run(
        &self,
        user_ids: Vec<String>,
        period: Period,
        force: bool,
        cancel: watch::Receiver<bool>,
    ) -> Result<BatchReport, AggregationError> {
        let mut report = BatchReport::default();
        let mut tasks: JoinSet<UserOutcome> = JoinSet::new();

        tracing::info!(period = %period, users = user_ids.len(), force, "Earnings batch started");

        for user_id in user_ids {
            if *cancel.borrow() {
                report.cancelled = true;
                break;
            }

            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|e| AggregationError::Task(format!("semaphore closed: {}", e)))?;

            // Permit wait may have spanned a cancellation
            if *cancel.borrow() {
                report.cancelled = true;
                break;
            }

            let aggregator = Arc::clone(&self.aggregator);
            tasks.spawn(async move {
                let result = aggregator.aggregate(&user_id, period, force).await;
                drop(permit);
                (user_id, result)
            });

            while let Some(joined) = tasks.try_join_next() {
                if let Err(fatal) = Self::tally(&mut report, period, joined) {
                    tasks.abort_all();
                    return Err(fatal);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(fatal) = Self::tally(&mut report, period, joined) {
                tasks.abort_all();
                return Err(fatal);
            }
        }

        if report.cancelled {
            tracing::warn!(
                period = %period,
                processed = report.processed,
                failed = report.failed,
                "Earnings batch cancelled"
            );
        } else {
            tracing::info!(
                period = %period,
                processed = report.processed,
                failed = report.failed,
                "Earnings batch finished"
            );
        }

        Ok(report)
    }

    /// Every user with a transaction in the month
    pub async fn run_month(
        &self,
        period: Period,
        force: bool,
        cancel: watch::Receiver<bool>,
    ) -> Result<BatchReport, AggregationError> {
        let users = self
            .aggregator
            .store()
            .active_users(TimeRange::month(period))
            .await?;
        self.run(users, period, force, cancel).await
    }

    /// Fold one finished task into the report; fatal errors are handed back
    fn tally(
        report: &mut BatchReport,
        period: Period,
        joined: Result<UserOutcome, tokio::task::JoinError>,
    ) -> Result<(), AggregationError> {
        match joined {
            Ok((_, Ok(_))) => report.processed += 1,
            Ok((user_id, Err(e))) if e.is_fatal() => {
                tracing::error!(user_id = %user_id, period = %period, error = %e, "Store unavailable; aborting batch");
                return Err(e);
            }
            Ok((user_id, Err(e))) => {
                tracing::warn!(user_id = %user_id, period = %period, error = %e, "User aggregation failed");
                report.failed += 1;
                report.failures.push(UserFailure {
                    user_id,
                    error: e.to_string(),
                });
            }
            Err(e) => {
                tracing::error!(period = %period, error = %e, "Aggregation task aborted");
                report.failed += 1;
                report.failures.push(UserFailure {
                    user_id: String::from("<unknown>"),
                    error: e.to_string(),
                });
            }
        }
        Ok(())
    }
}
