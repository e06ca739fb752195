//! Transaction Classifier
//!
//! Maps a raw wallet transaction onto the bucket the aggregators and the
//! reconciler account it under. Classification is total: it never fails, an
//! unknown shape ends up as `Unclassified` and is only counted.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::transaction::{Direction, TransactionType, WalletTransaction};

/// Monetized feature a token movement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Chat,
    Call,
    Calendar,
    Event,
    Other,
}

impl SourceCategory {
    pub const ALL: [SourceCategory; 5] = [
        SourceCategory::Chat,
        SourceCategory::Call,
        SourceCategory::Calendar,
        SourceCategory::Event,
        SourceCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::Chat => "chat",
            SourceCategory::Call => "call",
            SourceCategory::Calendar => "calendar",
            SourceCategory::Event => "event",
            SourceCategory::Other => "other",
        }
    }

    /// Keyword match against a lower-cased source hint
    fn from_hint(hint: &str) -> Option<Self> {
        const KEYWORDS: &[(&str, SourceCategory)] = &[
            ("chat", SourceCategory::Chat),
            ("message", SourceCategory::Chat),
            ("call", SourceCategory::Call),
            ("voice", SourceCategory::Call),
            ("video", SourceCategory::Call),
            ("calendar", SourceCategory::Calendar),
            ("booking", SourceCategory::Calendar),
            ("meeting", SourceCategory::Calendar),
            ("event", SourceCategory::Event),
            ("ticket", SourceCategory::Event),
            ("tip", SourceCategory::Other),
            ("gift", SourceCategory::Other),
            ("media", SourceCategory::Other),
            ("other", SourceCategory::Other),
        ];

        KEYWORDS
            .iter()
            .find(|(keyword, _)| hint.contains(keyword))
            .map(|(_, category)| *category)
    }
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic bucket of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Tokens bought with money
    Purchase,
    /// Tokens received for a monetized feature (creator side)
    Earning(SourceCategory),
    /// Tokens paid for a monetized feature (payer side)
    Spend(SourceCategory),
    /// Tokens moved back because a paid feature was refunded
    Refund(SourceCategory),
    /// Tokens withdrawn to fiat
    Payout,
    /// Purchase taken back out of the wallet (chargeback)
    PurchaseReversal,
    /// Withdrawal returned to the wallet
    PayoutReversal,
    /// Nothing matched; kept out of every financial bucket
    Unclassified,
}

impl Classification {
    pub fn is_unclassified(&self) -> bool {
        matches!(self, Classification::Unclassified)
    }
}

/// Classify one transaction.
///
/// `type` is inspected first. `other` and unrecognized types fall back to
/// substring matching on `meta.source`; when that is absent or inconclusive,
/// a positive IN amount is treated as `Earning(Other)` and anything else is
/// `Unclassified`.
pub fn classify(tx: &WalletTransaction) -> Classification {
    if let Some(classification) = classify_by_type(&tx.tx_type, tx.direction) {
        return classification;
    }

    if let Some(hint) = tx.meta.source.as_deref() {
        if let Some(classification) = classify_by_hint(&hint.to_ascii_lowercase(), tx.direction) {
            return classification;
        }
    }

    if tx.direction == Direction::In && tx.amount > 0 {
        Classification::Earning(SourceCategory::Other)
    } else {
        tracing::warn!(
            transaction_id = %tx.id,
            user_id = %tx.user_id,
            tx_type = %tx.tx_type,
            "Unclassified transaction excluded from aggregation"
        );
        Classification::Unclassified
    }
}

fn classify_by_type(tx_type: &TransactionType, direction: Direction) -> Option<Classification> {
    let by_direction = |category| match direction {
        Direction::In => Classification::Earning(category),
        Direction::Out => Classification::Spend(category),
    };

    match tx_type {
        TransactionType::Purchase => Some(purchase_by_direction(direction)),
        TransactionType::ChatSpend => Some(by_direction(SourceCategory::Chat)),
        TransactionType::CallSpend => Some(by_direction(SourceCategory::Call)),
        TransactionType::CalendarBooking => Some(by_direction(SourceCategory::Calendar)),
        TransactionType::EventTicket => Some(by_direction(SourceCategory::Event)),
        TransactionType::CalendarRefund => Some(Classification::Refund(SourceCategory::Calendar)),
        TransactionType::EventRefund => Some(Classification::Refund(SourceCategory::Event)),
        TransactionType::Payout => Some(payout_by_direction(direction)),
        TransactionType::Other | TransactionType::Unrecognized(_) => None,
    }
}

fn purchase_by_direction(direction: Direction) -> Classification {
    match direction {
        Direction::In => Classification::Purchase,
        Direction::Out => Classification::PurchaseReversal,
    }
}

fn payout_by_direction(direction: Direction) -> Classification {
    match direction {
        Direction::Out => Classification::Payout,
        Direction::In => Classification::PayoutReversal,
    }
}

fn classify_by_hint(hint: &str, direction: Direction) -> Option<Classification> {
    if hint.contains("refund") {
        let category = SourceCategory::from_hint(hint).unwrap_or(SourceCategory::Other);
        return Some(Classification::Refund(category));
    }
    if hint.contains("payout") || hint.contains("withdraw") {
        return Some(payout_by_direction(direction));
    }
    if hint.contains("purchase") || hint.contains("topup") || hint.contains("top_up") {
        return Some(purchase_by_direction(direction));
    }

    SourceCategory::from_hint(hint).map(|category| match direction {
        Direction::In => Classification::Earning(category),
        Direction::Out => Classification::Spend(category),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionMeta;
    use chrono::Utc;

    fn tx(tx_type: &str, direction: Direction, amount: i64) -> WalletTransaction {
        WalletTransaction::new("tx", "user", TransactionType::from(tx_type), direction, amount, Utc::now())
    }

    #[test]
    fn test_known_types_map_directly() {
        assert_eq!(classify(&tx("purchase", Direction::In, 100)), Classification::Purchase);
        assert_eq!(classify(&tx("payout", Direction::Out, 30)), Classification::Payout);
        assert_eq!(
            classify(&tx("event-refund", Direction::Out, 5)),
            Classification::Refund(SourceCategory::Event)
        );
    }

    #[test]
    fn test_purchase_and_payout_respect_direction() {
        assert_eq!(classify(&tx("payout", Direction::In, 30)), Classification::PayoutReversal);
        assert_eq!(classify(&tx("purchase", Direction::Out, 100)), Classification::PurchaseReversal);

        let t = tx("legacy", Direction::In, 10).with_meta(TransactionMeta::with_source("withdrawal_returned"));
        assert_eq!(classify(&t), Classification::PayoutReversal);
    }

    #[test]
    fn test_spend_types_split_by_direction() {
        assert_eq!(
            classify(&tx("chat-spend", Direction::In, 50)),
            Classification::Earning(SourceCategory::Chat)
        );
        assert_eq!(
            classify(&tx("chat-spend", Direction::Out, 50)),
            Classification::Spend(SourceCategory::Chat)
        );
        assert_eq!(
            classify(&tx("calendar-booking", Direction::In, 200)),
            Classification::Earning(SourceCategory::Calendar)
        );
    }

    #[test]
    fn test_source_hint_fallback() {
        let t = tx("other", Direction::In, 10).with_meta(TransactionMeta::with_source("Video_Call_Minute"));
        assert_eq!(classify(&t), Classification::Earning(SourceCategory::Call));

        let t = tx("legacy", Direction::Out, 10).with_meta(TransactionMeta::with_source("chat_refund"));
        assert_eq!(classify(&t), Classification::Refund(SourceCategory::Chat));

        let t = tx("legacy", Direction::Out, 10).with_meta(TransactionMeta::with_source("withdrawal"));
        assert_eq!(classify(&t), Classification::Payout);

        let t = tx("legacy", Direction::In, 10).with_meta(TransactionMeta::with_source("store_topup"));
        assert_eq!(classify(&t), Classification::Purchase);
    }

    #[test]
    fn test_unknown_in_with_amount_is_other_earning() {
        assert_eq!(
            classify(&tx("mystery", Direction::In, 15)),
            Classification::Earning(SourceCategory::Other)
        );
    }

    #[test]
    fn test_unknown_without_hint_is_unclassified() {
        assert!(classify(&tx("mystery", Direction::Out, 15)).is_unclassified());
        assert!(classify(&tx("mystery", Direction::In, 0)).is_unclassified());

        let t = tx("other", Direction::Out, 5).with_meta(TransactionMeta::with_source("zzz"));
        assert!(classify(&t).is_unclassified());
    }
}
