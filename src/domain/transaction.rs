//! Source records
//!
//! Wallet transactions, cached wallets and payout records as produced by the
//! transaction-producing subsystems. This engine only ever reads them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared transaction type.
///
/// Producers are heterogeneous, so parsing never fails: anything unknown is
/// kept verbatim as `Unrecognized` and left for the classifier's fallback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransactionType {
    Purchase,
    ChatSpend,
    CallSpend,
    CalendarBooking,
    EventTicket,
    CalendarRefund,
    EventRefund,
    Payout,
    Other,
    Unrecognized(String),
}

impl TransactionType {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::ChatSpend => "chat-spend",
            TransactionType::CallSpend => "call-spend",
            TransactionType::CalendarBooking => "calendar-booking",
            TransactionType::EventTicket => "event-ticket",
            TransactionType::CalendarRefund => "calendar-refund",
            TransactionType::EventRefund => "event-refund",
            TransactionType::Payout => "payout",
            TransactionType::Other => "other",
            TransactionType::Unrecognized(raw) => raw,
        }
    }
}

impl From<&str> for TransactionType {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "purchase" => TransactionType::Purchase,
            "chat-spend" => TransactionType::ChatSpend,
            "call-spend" => TransactionType::CallSpend,
            "calendar-booking" => TransactionType::CalendarBooking,
            "event-ticket" => TransactionType::EventTicket,
            "calendar-refund" => TransactionType::CalendarRefund,
            "event-refund" => TransactionType::EventRefund,
            "payout" => TransactionType::Payout,
            "other" => TransactionType::Other,
            _ => TransactionType::Unrecognized(s.to_string()),
        }
    }
}

impl From<String> for TransactionType {
    fn from(s: String) -> Self {
        TransactionType::from(s.as_str())
    }
}

impl From<TransactionType> for String {
    fn from(t: TransactionType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a transaction relative to the wallet owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" | "CREDIT" => Some(Direction::In),
            "OUT" | "DEBIT" => Some(Direction::Out),
            _ => None,
        }
    }
}

/// Source-specific transaction fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    /// Free-form hint used by the classifier when `type` is not decisive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Transaction a refund refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_transaction_id: Option<String>,

    /// Split precomputed by the producer, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_share: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_share: Option<i64>,

    /// Anything else the producer attached
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TransactionMeta {
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    pub fn refund_of(original_transaction_id: impl Into<String>) -> Self {
        Self {
            original_transaction_id: Some(original_transaction_id.into()),
            ..Default::default()
        }
    }

    pub fn with_split(creator_share: i64, platform_share: i64) -> Self {
        Self {
            creator_share: Some(creator_share),
            platform_share: Some(platform_share),
            ..Default::default()
        }
    }

    /// The producer's split, only when both halves are present
    pub fn precomputed_split(&self) -> Option<(i64, i64)> {
        Some((self.creator_share?, self.platform_share?))
    }
}

/// One entry of the append-only wallet transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub direction: Direction,
    /// Token units, never negative
    pub amount: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: TransactionMeta,
}

impl WalletTransaction {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        tx_type: TransactionType,
        direction: Direction,
        amount: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            tx_type,
            direction,
            amount,
            created_at,
            meta: TransactionMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: TransactionMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// Cached wallet state maintained by the producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWallet {
    pub user_id: String,
    pub tokens_balance: i64,
    pub lifetime_purchased: i64,
    pub lifetime_earned: i64,
    pub lifetime_withdrawn: i64,
}

impl UserWallet {
    pub fn with_balance(user_id: impl Into<String>, tokens_balance: i64) -> Self {
        Self {
            user_id: user_id.into(),
            tokens_balance,
            lifetime_purchased: 0,
            lifetime_earned: 0,
            lifetime_withdrawn: 0,
        }
    }
}

/// Payout request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Requested,
    Processing,
    Paid,
    Rejected,
    Cancelled,
}

impl PayoutStatus {
    /// Statuses that still count as a live request
    pub const OPEN_OR_PAID: [PayoutStatus; 3] = [
        PayoutStatus::Requested,
        PayoutStatus::Processing,
        PayoutStatus::Paid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Requested => "requested",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Rejected => "rejected",
            PayoutStatus::Cancelled => "cancelled",
        }
    }

    /// Every stored spelling that decodes to this status
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            PayoutStatus::Requested => &["requested", "pending"],
            PayoutStatus::Processing => &["processing"],
            PayoutStatus::Paid => &["paid", "completed"],
            PayoutStatus::Rejected => &["rejected"],
            PayoutStatus::Cancelled => &["cancelled", "canceled"],
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" | "pending" => Some(PayoutStatus::Requested),
            "processing" => Some(PayoutStatus::Processing),
            "paid" | "completed" => Some(PayoutStatus::Paid),
            "rejected" => Some(PayoutStatus::Rejected),
            "cancelled" | "canceled" => Some(PayoutStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Withdrawal record owned by the payout subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRecord {
    pub id: String,
    pub user_id: String,
    pub tokens: i64,
    pub fiat_amount: Decimal,
    pub currency: String,
    pub status: PayoutStatus,
    pub requested_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_parsing_is_lenient() {
        assert_eq!(TransactionType::from("chat-spend"), TransactionType::ChatSpend);
        assert_eq!(TransactionType::from("CHAT_SPEND"), TransactionType::ChatSpend);
        assert_eq!(TransactionType::from(" payout "), TransactionType::Payout);
        assert_eq!(
            TransactionType::from("media-unlock"),
            TransactionType::Unrecognized("media-unlock".to_string())
        );
    }

    #[test]
    fn test_payout_status_aliases_parse_back() {
        for status in [
            PayoutStatus::Requested,
            PayoutStatus::Processing,
            PayoutStatus::Paid,
            PayoutStatus::Rejected,
            PayoutStatus::Cancelled,
        ] {
            assert!(status.aliases().contains(&status.as_str()));
            for alias in status.aliases() {
                assert_eq!(PayoutStatus::parse(alias), Some(status));
            }
        }
    }

    #[test]
    fn test_unrecognized_type_keeps_raw_value() {
        let t = TransactionType::from("gift_sent");
        assert_eq!(t.as_str(), "gift_sent");
        assert_eq!(String::from(t), "gift_sent");
    }

    #[test]
    fn test_transaction_deserializes_from_producer_json() {
        let json = r#"{
            "id": "tx-1",
            "userId": "u-1",
            "type": "calendar_refund",
            "direction": "OUT",
            "amount": 40,
            "createdAt": "2026-03-04T10:00:00Z",
            "meta": { "originalTransactionId": "tx-0", "bookingId": "b-9" }
        }"#;

        let tx: WalletTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.tx_type, TransactionType::CalendarRefund);
        assert_eq!(tx.direction, Direction::Out);
        assert_eq!(tx.meta.original_transaction_id.as_deref(), Some("tx-0"));
        assert_eq!(tx.meta.extra.get("bookingId").and_then(|v| v.as_str()), Some("b-9"));
    }

    #[test]
    fn test_precomputed_split_requires_both_halves() {
        assert_eq!(TransactionMeta::with_split(65, 35).precomputed_split(), Some((65, 35)));

        let half = TransactionMeta {
            creator_share: Some(65),
            ..Default::default()
        };
        assert_eq!(half.precomputed_split(), None);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("in"), Some(Direction::In));
        assert_eq!(Direction::parse("OUT"), Some(Direction::Out));
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn test_payout_status_parse() {
        assert_eq!(PayoutStatus::parse("completed"), Some(PayoutStatus::Paid));
        assert_eq!(PayoutStatus::parse("canceled"), Some(PayoutStatus::Cancelled));
        assert_eq!(PayoutStatus::parse("unknown"), None);
    }
}
