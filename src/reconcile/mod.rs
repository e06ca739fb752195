//! Balance Reconciler
//!
//! Independently re-derives what the wallet cache and the producers' splits
//! should say and reports every disagreement as a `FinanceAnomaly`. Nothing
//! here ever changes source data; findings are the output, not errors.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    classify, AnomalyType, Classification, Clock, Direction, DomainError, FinanceAnomaly, Period,
    Severity, WalletTransaction,
};
use crate::store::{
    read_all_transactions, FinanceStore, InsertOutcome, StoreError, TimeRange, TransactionQuery,
};

/// Discrepancies at or below this many tokens are treated as in-flight noise
pub const DEFAULT_MISMATCH_THRESHOLD: i64 = 10;

/// Mismatches above this many tokens are high severity
const HIGH_SEVERITY_DISCREPANCY: i64 = 100;

/// Allowed gap between a precomputed split and its amount
const SPLIT_TOLERANCE: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("User id must not be empty")]
    EmptyUserId,

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_fatal())
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub mismatch_threshold: i64,
    pub page_size: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            mismatch_threshold: DEFAULT_MISMATCH_THRESHOLD,
            page_size: crate::aggregation::DEFAULT_PAGE_SIZE,
        }
    }
}

/// Balance re-derived from a user's full history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    pub user_id: String,
    pub purchased: i64,
    pub earned: i64,
    pub spent: i64,
    /// Refunds received (IN)
    pub refunded: i64,
    /// Refunds paid back out (OUT)
    pub refunds_issued: i64,
    pub withdrawn: i64,
    /// Withdrawals credited back (payout IN)
    pub payouts_returned: i64,
    /// Purchases taken back out (purchase OUT)
    pub purchases_reversed: i64,
    pub expected_balance: i64,
    pub cached_balance: Option<i64>,
    /// `cached_balance - expected_balance`, 0 without a cached wallet
    pub discrepancy: i64,
    pub transaction_count: i64,
    pub unclassified_count: i64,
}

impl BalanceSummary {
    pub fn from_history<'a>(
        user_id: impl Into<String>,
        transactions: impl IntoIterator<Item = &'a WalletTransaction>,
    ) -> Self {
        let mut summary = BalanceSummary {
            user_id: user_id.into(),
            ..Default::default()
        };

        for tx in transactions {
            summary.transaction_count += 1;
            match classify(tx) {
                Classification::Purchase => summary.purchased += tx.amount,
                Classification::Earning(_) => summary.earned += tx.amount,
                Classification::Spend(_) => summary.spent += tx.amount,
                Classification::Refund(_) => match tx.direction {
                    Direction::In => summary.refunded += tx.amount,
                    Direction::Out => summary.refunds_issued += tx.amount,
                },
                Classification::Payout => summary.withdrawn += tx.amount,
                Classification::PayoutReversal => summary.payouts_returned += tx.amount,
                Classification::PurchaseReversal => summary.purchases_reversed += tx.amount,
                Classification::Unclassified => summary.unclassified_count += 1,
            }
        }

        summary.expected_balance = summary.purchased - summary.purchases_reversed
            + summary.earned
            - summary.spent
            + summary.refunded
            - summary.refunds_issued
            - summary.net_withdrawn();
        summary
    }

    pub fn with_cached_balance(mut self, cached: Option<i64>) -> Self {
        self.cached_balance = cached;
        self.discrepancy = cached.map_or(0, |c| c - self.expected_balance);
        self
    }

    /// Earnings net of refunds paid back
    pub fn net_earned(&self) -> i64 {
        self.earned - self.refunds_issued
    }

    /// Withdrawals net of returned payouts
    pub fn net_withdrawn(&self) -> i64 {
        self.withdrawn - self.payouts_returned
    }
}

/// Result of a single user's balance check
#[derive(Debug, Clone, Serialize)]
pub struct UserCheck {
    pub consistent: bool,
    pub summary: BalanceSummary,
    pub anomalies: Vec<FinanceAnomaly>,
}

/// What a detection pass found and persisted
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    /// Newly recorded anomalies
    pub anomalies: Vec<FinanceAnomaly>,
    /// Existing unresolved records that matched a fresh finding
    pub duplicates: Vec<Uuid>,
    pub users_checked: u64,
    pub users_failed: u64,
}

impl DetectionReport {
    pub fn finding_count(&self) -> usize {
        self.anomalies.len() + self.duplicates.len()
    }
}

pub struct BalanceReconciler {
    store: Arc<dyn FinanceStore>,
    clock: Arc<dyn Clock>,
    settings: ReconcileSettings,
}

impl BalanceReconciler {
    pub fn new(store: Arc<dyn FinanceStore>, clock: Arc<dyn Clock>, settings: ReconcileSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    // =========================================================================
    // Checks (pure with respect to the anomaly store)
    // =========================================================================

    /// Compare the cached wallet balance against full history
    pub async fn check_user(&self, user_id: &str) -> Result<UserCheck, ReconcileError> {
        let history = read_all_transactions(
            self.store.as_ref(),
            &TransactionQuery::for_user(user_id, TimeRange::all()),
            self.settings.page_size,
        )
        .await?;
        let cached = self.store.balance(user_id).await?;
        let summary = BalanceSummary::from_history(user_id, &history).with_cached_balance(cached);

        if cached.is_none() {
            tracing::debug!(user_id = %user_id, "No cached wallet; balance comparison skipped");
        }

        let anomalies = self.user_anomalies(&summary);
        Ok(UserCheck {
            consistent: anomalies.is_empty(),
            summary,
            anomalies,
        })
    }

    fn user_anomalies(&self, summary: &BalanceSummary) -> Vec<FinanceAnomaly> {
        let now = self.now();
        let evidence = serde_json::to_value(summary).unwrap_or_default();
        let mut anomalies = Vec::new();

        if let Some(cached) = summary.cached_balance {
            if cached < 0 {
                anomalies.push(
                    FinanceAnomaly::open(
                        AnomalyType::NegativeBalance,
                        Severity::Critical,
                        format!("Cached wallet balance is negative: {}", cached),
                        now,
                    )
                    .for_user(&summary.user_id)
                    .with_metadata(evidence.clone()),
                );
            }

            if summary.discrepancy.abs() > self.settings.mismatch_threshold {
                let severity = if summary.discrepancy.abs() > HIGH_SEVERITY_DISCREPANCY {
                    Severity::High
                } else {
                    Severity::Medium
                };
                anomalies.push(
                    FinanceAnomaly::open(
                        AnomalyType::BalanceMismatch,
                        severity,
                        format!(
                            "Cached balance {} differs from expected {} by {}",
                            cached, summary.expected_balance, summary.discrepancy
                        ),
                        now,
                    )
                    .for_user(&summary.user_id)
                    .with_metadata(evidence.clone()),
                );
            }
        }

        if summary.net_withdrawn() > summary.net_earned() {
            anomalies.push(
                FinanceAnomaly::open(
                    AnomalyType::PayoutExceedsEarnings,
                    Severity::High,
                    format!(
                        "Lifetime withdrawn {} exceeds lifetime earned {}",
                        summary.net_withdrawn(),
                        summary.net_earned()
                    ),
                    now,
                )
                .for_user(&summary.user_id)
                .with_metadata(evidence),
            );
        }

        anomalies
    }

    /// Precomputed splits on earning transactions must sum to the amount
    pub async fn check_splits(
        &self,
        period: Period,
        user_id: Option<&str>,
    ) -> Result<Vec<FinanceAnomaly>, ReconcileError> {
        let transactions = self.month_transactions(period, user_id).await?;
        let now = self.now();

        let mut offenders: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
        for tx in &transactions {
            if !matches!(classify(tx), Classification::Earning(_)) {
                continue;
            }
            let Some((creator, platform)) = tx.meta.precomputed_split() else {
                continue;
            };
            let gap = creator + platform - tx.amount;
            if gap.abs() > SPLIT_TOLERANCE || creator < 0 || platform < 0 {
                offenders.entry(tx.user_id.clone()).or_default().push(json!({
                    "transactionId": tx.id,
                    "amount": tx.amount,
                    "creatorShare": creator,
                    "platformShare": platform,
                    "difference": gap,
                }));
            }
        }

        Ok(offenders
            .into_iter()
            .map(|(user, evidence)| {
                FinanceAnomaly::open(
                    AnomalyType::InvalidSplit,
                    Severity::Medium,
                    format!("{} earning transaction(s) with a split that does not sum to the amount", evidence.len()),
                    now,
                )
                .for_user(user)
                .for_period(period)
                .with_metadata(json!({ "transactions": evidence }))
            })
            .collect())
    }

    /// Refunds must reference an existing original and stay within its amount
    pub async fn check_refunds(
        &self,
        period: Period,
        user_id: Option<&str>,
    ) -> Result<Vec<FinanceAnomaly>, ReconcileError> {
        let transactions = self.month_transactions(period, user_id).await?;
        let now = self.now();

        let mut originals: HashMap<String, Option<WalletTransaction>> = HashMap::new();
        // (original id, direction) -> refunded so far in the window
        let mut cumulative: HashMap<(String, Direction), i64> = HashMap::new();
        let mut missing: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
        let mut exceeding: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();

        for tx in &transactions {
            if !matches!(classify(tx), Classification::Refund(_)) {
                continue;
            }

            let original_id = tx.meta.original_transaction_id.clone().unwrap_or_default();
            let original = if original_id.is_empty() {
                None
            } else {
                if !originals.contains_key(&original_id) {
                    let found = self.store.transaction(&original_id).await?;
                    originals.insert(original_id.clone(), found);
                }
                originals.get(&original_id).cloned().flatten()
            };

            let Some(original) = original else {
                missing.entry(tx.user_id.clone()).or_default().push(json!({
                    "transactionId": tx.id,
                    "originalTransactionId": tx.meta.original_transaction_id,
                    "amount": tx.amount,
                }));
                continue;
            };

            let refunded = cumulative
                .entry((original.id.clone(), tx.direction))
                .or_insert(0);
            *refunded += tx.amount;

            if *refunded > original.amount {
                exceeding.entry(tx.user_id.clone()).or_default().push(json!({
                    "transactionId": tx.id,
                    "originalTransactionId": original.id,
                    "refundAmount": tx.amount,
                    "cumulativeRefunded": *refunded,
                    "originalAmount": original.amount,
                }));
            }
        }

        let mut anomalies = Vec::new();
        for (user, evidence) in exceeding {
            anomalies.push(
                FinanceAnomaly::open(
                    AnomalyType::RefundExceedsOriginal,
                    Severity::High,
                    format!("{} refund(s) exceed the original transaction amount", evidence.len()),
                    now,
                )
                .for_user(user)
                .for_period(period)
                .with_metadata(json!({ "transactions": evidence })),
            );
        }
        for (user, evidence) in missing {
            anomalies.push(
                FinanceAnomaly::open(
                    AnomalyType::RefundMissingOriginal,
                    Severity::Low,
                    format!("{} refund(s) without a resolvable original transaction", evidence.len()),
                    now,
                )
                .for_user(user)
                .for_period(period)
                .with_metadata(json!({ "transactions": evidence })),
            );
        }

        Ok(anomalies)
    }

    async fn month_transactions(
        &self,
        period: Period,
        user_id: Option<&str>,
    ) -> Result<Vec<WalletTransaction>, ReconcileError> {
        let range = TimeRange::month(period);
        let query = match user_id {
            Some(user_id) => TransactionQuery::for_user(user_id, range),
            None => TransactionQuery::all_users(range),
        };
        Ok(read_all_transactions(self.store.as_ref(), &query, self.settings.page_size).await?)
    }

    // =========================================================================
    // Detection pass (checks + persistence)
    // =========================================================================

    /// Run the checks selected by the arguments and record the findings.
    ///
    /// - user only: balance check for that user
    /// - period: split and refund checks for the month (scoped to the user if given)
    /// - neither: balance check for every cached wallet
    pub async fn detect(
        &self,
        user_id: Option<&str>,
        period: Option<Period>,
    ) -> Result<DetectionReport, ReconcileError> {
        let mut report = DetectionReport::default();
        let mut findings = Vec::new();

        match (user_id, period) {
            (Some(user_id), _) => {
                let check = self.check_user(user_id).await?;
                report.users_checked += 1;
                findings.extend(check.anomalies);
            }
            (None, None) => {
                for user_id in self.store.wallet_user_ids().await? {
                    match self.check_user(&user_id).await {
                        Ok(check) => {
                            report.users_checked += 1;
                            findings.extend(check.anomalies);
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            tracing::warn!(user_id = %user_id, error = %e, "Balance check failed");
                            report.users_failed += 1;
                        }
                    }
                }
            }
            (None, Some(_)) => {}
        }

        if let Some(period) = period {
            findings.extend(self.check_splits(period, user_id).await?);
            findings.extend(self.check_refunds(period, user_id).await?);
        }

        for anomaly in findings {
            match self.store.insert_anomaly(&anomaly).await? {
                InsertOutcome::Inserted => {
                    tracing::warn!(
                        anomaly_id = %anomaly.id,
                        anomaly_type = anomaly.anomaly_type.as_str(),
                        severity = anomaly.severity.as_str(),
                        user_id = anomaly.user_id.as_deref().unwrap_or("-"),
                        "Finance anomaly recorded"
                    );
                    report.anomalies.push(anomaly);
                }
                InsertOutcome::Duplicate { existing_id } => {
                    tracing::debug!(
                        existing_id = %existing_id,
                        anomaly_type = anomaly.anomaly_type.as_str(),
                        "Finance anomaly already open"
                    );
                    report.duplicates.push(existing_id);
                }
            }
        }

        tracing::info!(
            users_checked = report.users_checked,
            users_failed = report.users_failed,
            recorded = report.anomalies.len(),
            duplicates = report.duplicates.len(),
            "Anomaly detection finished"
        );

        Ok(report)
    }
}
