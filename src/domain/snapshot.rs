//! Derived monthly snapshots
//!
//! Both snapshot kinds are caches over the transaction log: they can be
//! deleted and rebuilt by re-running the corresponding aggregator.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::classifier::SourceCategory;

/// Token amounts broken out per source category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAmounts {
    pub chat: i64,
    pub call: i64,
    pub calendar: i64,
    pub event: i64,
    pub other: i64,
}

impl SourceAmounts {
    pub fn get(&self, category: SourceCategory) -> i64 {
        match category {
            SourceCategory::Chat => self.chat,
            SourceCategory::Call => self.call,
            SourceCategory::Calendar => self.calendar,
            SourceCategory::Event => self.event,
            SourceCategory::Other => self.other,
        }
    }

    pub fn add(&mut self, category: SourceCategory, amount: i64) {
        let slot = match category {
            SourceCategory::Chat => &mut self.chat,
            SourceCategory::Call => &mut self.call,
            SourceCategory::Calendar => &mut self.calendar,
            SourceCategory::Event => &mut self.event,
            SourceCategory::Other => &mut self.other,
        };
        *slot += amount;
    }

    pub fn total(&self) -> i64 {
        SourceCategory::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

/// Earnings of one creator for one month, keyed by `(user_id, year, month)`.
///
/// # Invariants
/// - `net_earned == earned.total() - refunded.total()`
/// - `creator_share + platform_share == net_earned`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorEarningsMonthly {
    pub user_id: String,
    pub year: i32,
    pub month: u32,
    pub earned: SourceAmounts,
    pub refunded: SourceAmounts,
    pub net_earned: i64,
    pub creator_share: i64,
    pub platform_share: i64,
    pub payout_requested_tokens: i64,
    pub payout_paid_tokens: i64,
    pub payout_fiat_paid: Decimal,
    pub payout_currency: String,
    pub transaction_count: i64,
    pub unclassified_count: i64,
    pub split_table_version: String,
    pub generated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreatorEarningsMonthly {
    /// Check the arithmetic invariants of the snapshot
    pub fn is_balanced(&self) -> bool {
        self.net_earned == self.earned.total() - self.refunded.total()
            && self.creator_share + self.platform_share == self.net_earned
    }
}

/// Platform-wide financial rollup for one month, keyed by `(year, month)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFinanceMonthly {
    pub year: i32,
    pub month: u32,
    pub gmv_tokens: i64,
    pub gmv_fiat: Decimal,
    pub gmv_by_source: SourceAmounts,
    pub total_creator_share: i64,
    pub total_platform_share: i64,
    /// Platform share per source, net of refunds
    pub fees_by_source: SourceAmounts,
    pub purchase_tokens: i64,
    pub refunds_tokens: i64,
    pub net_revenue_tokens: i64,
    pub total_payout_tokens: i64,
    pub total_payout_fiat: Decimal,
    pub total_payout_count: i64,
    pub outstanding_creator_liability_tokens: i64,
    pub outstanding_creator_liability_fiat: Decimal,
    pub active_creator_count: i64,
    pub transaction_count: i64,
    pub unclassified_count: i64,
    pub fiat_currency: String,
    pub split_table_version: String,
    pub generated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fixed token to fiat conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiatConversion {
    pub currency: String,
    pub rate_per_token: Decimal,
}

impl FiatConversion {
    pub fn new(currency: impl Into<String>, rate_per_token: Decimal) -> Self {
        Self {
            currency: currency.into(),
            rate_per_token,
        }
    }

    /// Fiat value of a token amount, rounded to 2 decimal places
    pub fn to_fiat(&self, tokens: i64) -> Decimal {
        (Decimal::from(tokens) * self.rate_per_token).round_dp(2)
    }
}

impl Default for FiatConversion {
    fn default() -> Self {
        Self::new("PLN", Decimal::new(20, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_source_amounts_accumulate() {
        let mut amounts = SourceAmounts::default();
        amounts.add(SourceCategory::Chat, 50);
        amounts.add(SourceCategory::Chat, 25);
        amounts.add(SourceCategory::Event, 10);

        assert_eq!(amounts.chat, 75);
        assert_eq!(amounts.get(SourceCategory::Event), 10);
        assert_eq!(amounts.total(), 85);
    }

    #[test]
    fn test_fiat_conversion_rounds_to_cents() {
        let fx = FiatConversion::new("PLN", dec!(0.2049));
        assert_eq!(fx.to_fiat(3), dec!(0.61));
        assert_eq!(FiatConversion::default().to_fiat(120), dec!(24.00));
    }
}
