//! Finance anomalies
//!
//! A detected violation of a financial invariant, recorded for human review.
//! The engine creates anomalies; only an external review workflow moves them
//! through `open -> reviewed -> resolved`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::period::Period;

/// Kind of invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyType {
    NegativeBalance,
    BalanceMismatch,
    InvalidSplit,
    RefundExceedsOriginal,
    RefundMissingOriginal,
    PayoutExceedsEarnings,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::NegativeBalance => "negative-balance",
            AnomalyType::BalanceMismatch => "balance-mismatch",
            AnomalyType::InvalidSplit => "invalid-split",
            AnomalyType::RefundExceedsOriginal => "refund-exceeds-original",
            AnomalyType::RefundMissingOriginal => "refund-missing-original",
            AnomalyType::PayoutExceedsEarnings => "payout-exceeds-earnings",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "negative-balance" => Some(AnomalyType::NegativeBalance),
            "balance-mismatch" => Some(AnomalyType::BalanceMismatch),
            "invalid-split" => Some(AnomalyType::InvalidSplit),
            "refund-exceeds-original" => Some(AnomalyType::RefundExceedsOriginal),
            "refund-missing-original" => Some(AnomalyType::RefundMissingOriginal),
            "payout-exceeds-earnings" => Some(AnomalyType::PayoutExceedsEarnings),
            _ => None,
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    Open,
    Reviewed,
    Resolved,
}

impl AnomalyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyStatus::Open => "open",
            AnomalyStatus::Reviewed => "reviewed",
            AnomalyStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(AnomalyStatus::Open),
            "reviewed" => Some(AnomalyStatus::Reviewed),
            "resolved" => Some(AnomalyStatus::Resolved),
            _ => None,
        }
    }
}

/// Deduplication key: at most one unresolved anomaly per key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnomalyKey {
    pub anomaly_type: AnomalyType,
    pub user_id: Option<String>,
    pub period: Option<Period>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinanceAnomaly {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub anomaly_type: AnomalyType,
    pub user_id: Option<String>,
    pub period: Option<Period>,
    pub details: String,
    pub severity: Severity,
    pub status: AnomalyStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

impl FinanceAnomaly {
    /// Create a new open anomaly
    pub fn open(
        anomaly_type: AnomalyType,
        severity: Severity,
        details: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            anomaly_type,
            user_id: None,
            period: None,
            details: details.into(),
            severity,
            status: AnomalyStatus::Open,
            metadata: serde_json::Value::Null,
            created_at,
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn for_period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn key(&self) -> AnomalyKey {
        AnomalyKey {
            anomaly_type: self.anomaly_type,
            user_id: self.user_id.clone(),
            period: self.period,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == AnomalyStatus::Resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anomaly_builder() {
        let period = Period::new(2026, 3).unwrap();
        let anomaly = FinanceAnomaly::open(
            AnomalyType::InvalidSplit,
            Severity::Medium,
            "split off by 3",
            Utc::now(),
        )
        .for_user("u-1")
        .for_period(period)
        .with_metadata(serde_json::json!({ "transactionIds": ["tx-1"] }));

        assert_eq!(anomaly.status, AnomalyStatus::Open);
        assert_eq!(
            anomaly.key(),
            AnomalyKey {
                anomaly_type: AnomalyType::InvalidSplit,
                user_id: Some("u-1".to_string()),
                period: Some(period),
            }
        );
    }

    #[test]
    fn test_type_strings_round_trip() {
        for t in [
            AnomalyType::NegativeBalance,
            AnomalyType::BalanceMismatch,
            AnomalyType::InvalidSplit,
            AnomalyType::RefundExceedsOriginal,
            AnomalyType::RefundMissingOriginal,
            AnomalyType::PayoutExceedsEarnings,
        ] {
            assert_eq!(AnomalyType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_serialized_type_is_kebab_case() {
        let anomaly = FinanceAnomaly::open(
            AnomalyType::PayoutExceedsEarnings,
            Severity::High,
            "x",
            Utc::now(),
        );
        let json = serde_json::to_value(&anomaly).unwrap();
        assert_eq!(json["type"], "payout-exceeds-earnings");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["status"], "open");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }
}
