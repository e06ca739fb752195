//! Monthly Earnings Aggregator
//!
//! One `CreatorEarningsMonthly` per `(user, year, month)`, recomputed from the
//! user's transactions in the month window plus payout records.

use chrono::SubsecRound;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::{
    classify, Classification, Clock, CreatorEarningsMonthly, Direction, DomainError, Period,
    SourceAmounts, SplitTable, WalletTransaction,
};
use crate::store::{read_all_transactions, FinanceStore, PayoutQuery, TimeRange, TransactionQuery};

use super::{AggregationError, AggregationSettings};

/// Earnings arithmetic over one user's month of transactions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EarningsTotals {
    pub earned: SourceAmounts,
    pub refunded: SourceAmounts,
    pub creator_share: i64,
    pub platform_share: i64,
    pub transaction_count: i64,
    pub unclassified_count: i64,
}

impl EarningsTotals {
    /// Fold transactions into totals.
    ///
    /// Earnings add their split; OUT refunds on the creator's record take
    /// their split back out. Refunds IN belong to the payer and are skipped.
    pub fn accumulate<'a>(
        split_table: &SplitTable,
        transactions: impl IntoIterator<Item = &'a WalletTransaction>,
    ) -> Result<Self, DomainError> {
        let mut totals = Self::default();

        for tx in transactions {
            totals.transaction_count += 1;
            match classify(tx) {
                Classification::Earning(category) => {
                    let split = split_table.split(tx.amount, category)?;
                    totals.earned.add(category, tx.amount);
                    totals.creator_share += split.creator;
                    totals.platform_share += split.platform;
                }
                Classification::Refund(category) if tx.direction == Direction::Out => {
                    let split = split_table.split(tx.amount, category)?;
                    totals.refunded.add(category, tx.amount);
                    totals.creator_share -= split.creator;
                    totals.platform_share -= split.platform;
                }
                Classification::Unclassified => totals.unclassified_count += 1,
                _ => {}
            }
        }

        Ok(totals)
    }

    pub fn net_earned(&self) -> i64 {
        self.earned.total() - self.refunded.total()
    }
}

pub struct MonthlyEarningsAggregator {
    store: Arc<dyn FinanceStore>,
    clock: Arc<dyn Clock>,
    settings: AggregationSettings,
}

impl MonthlyEarningsAggregator {
    pub fn new(
        store: Arc<dyn FinanceStore>,
        clock: Arc<dyn Clock>,
        settings: AggregationSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn FinanceStore> {
        &self.store
    }

    /// Build (or return the cached) snapshot for one user and month.
    ///
    /// With `force == false` an existing snapshot is returned unchanged.
    pub async fn aggregate(
        &self,
        user_id: &str,
        period: Period,
        force: bool,
    ) -> Result<CreatorEarningsMonthly, AggregationError> {
        if user_id.trim().is_empty() {
            return Err(AggregationError::EmptyUserId);
        }

        if !force {
            if let Some(existing) = self.store.earnings_snapshot(user_id, period).await? {
                tracing::debug!(user_id = %user_id, period = %period, "Earnings snapshot cache hit");
                return Ok(existing);
            }
        }

        let snapshot = self.compute(user_id, period).await?;
        let stored = self.store.upsert_earnings_snapshot(&snapshot).await?;

        tracing::debug!(
            user_id = %user_id,
            period = %period,
            net_earned = stored.net_earned,
            creator_share = stored.creator_share,
            "Earnings snapshot written"
        );

        Ok(stored)
    }

    /// Recompute the snapshot without writing it
    pub async fn compute(
        &self,
        user_id: &str,
        period: Period,
    ) -> Result<CreatorEarningsMonthly, AggregationError> {
        let range = TimeRange::month(period);

        let transactions = read_all_transactions(
            self.store.as_ref(),
            &TransactionQuery::for_user(user_id, range),
            self.settings.page_size,
        )
        .await?;
        let totals = EarningsTotals::accumulate(&self.settings.split_table, &transactions)?;

        let requested = self
            .store
            .payouts(&PayoutQuery::requested(Some(user_id.to_string()), range))
            .await?;
        let paid = self
            .store
            .payouts(&PayoutQuery::paid(Some(user_id.to_string()), range))
            .await?;

        let payout_currency = paid
            .first()
            .map(|p| p.currency.clone())
            .unwrap_or_else(|| self.settings.fiat.currency.clone());
        if paid.iter().any(|p| p.currency != payout_currency) {
            tracing::warn!(
                user_id = %user_id,
                period = %period,
                currency = %payout_currency,
                "Paid payouts use mixed currencies; fiat total is a plain sum"
            );
        }

        let now = self.clock.now().trunc_subsecs(6);

        Ok(CreatorEarningsMonthly {
            user_id: user_id.to_string(),
            year: period.year(),
            month: period.month(),
            net_earned: totals.net_earned(),
            earned: totals.earned,
            refunded: totals.refunded,
            creator_share: totals.creator_share,
            platform_share: totals.platform_share,
            payout_requested_tokens: requested.iter().map(|p| p.tokens).sum(),
            payout_paid_tokens: paid.iter().map(|p| p.tokens).sum(),
            payout_fiat_paid: paid
                .iter()
                .map(|p| p.fiat_amount)
                .sum::<Decimal>()
                .round_dp(2),
            payout_currency,
            transaction_count: totals.transaction_count,
            unclassified_count: totals.unclassified_count,
            split_table_version: self.settings.split_table.version().to_string(),
            generated_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TransactionMeta, TransactionType};
    use chrono::{TimeZone, Utc};

    fn tx(id: &str, tx_type: &str, direction: Direction, amount: i64) -> WalletTransaction {
        WalletTransaction::new(
            id,
            "creator-1",
            TransactionType::from(tx_type),
            direction,
            amount,
            Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_accumulate_splits_per_transaction() {
        let txs = vec![
            tx("t1", "chat-spend", Direction::In, 101),
            tx("t2", "call-spend", Direction::In, 50),
            tx("t3", "chat-spend", Direction::Out, 70),
        ];
        let totals = EarningsTotals::accumulate(&SplitTable::v1(), &txs).unwrap();

        assert_eq!(totals.earned.chat, 101);
        assert_eq!(totals.earned.call, 50);
        // 65 + 40 for the creator, 36 + 10 for the platform; the OUT spend is the payer's
        assert_eq!(totals.creator_share, 105);
        assert_eq!(totals.platform_share, 46);
        assert_eq!(totals.net_earned(), 151);
        assert_eq!(totals.transaction_count, 3);
    }

    #[test]
    fn test_refund_direction() {
        let txs = vec![
            tx("t1", "calendar-booking", Direction::In, 100),
            tx("t2", "calendar-refund", Direction::Out, 25),
            tx("t3", "calendar-refund", Direction::In, 40),
        ];
        let totals = EarningsTotals::accumulate(&SplitTable::v1(), &txs).unwrap();

        assert_eq!(totals.refunded.calendar, 25);
        assert_eq!(totals.net_earned(), 75);
        assert_eq!(totals.creator_share + totals.platform_share, 75);
        assert_eq!(totals.creator_share, 80 - 20);
    }

    #[test]
    fn test_unclassified_is_counted_not_summed() {
        let txs = vec![
            tx("t1", "mystery", Direction::Out, 500),
            tx("t2", "mystery", Direction::In, 0),
            tx("t3", "other", Direction::In, 10).with_meta(TransactionMeta::with_source("gift")),
        ];
        let totals = EarningsTotals::accumulate(&SplitTable::v1(), &txs).unwrap();

        assert_eq!(totals.unclassified_count, 2);
        assert_eq!(totals.earned.other, 10);
        assert_eq!(totals.net_earned(), 10);
    }

    #[test]
    fn test_purchase_and_payout_ignored() {
        let txs = vec![
            tx("t1", "purchase", Direction::In, 1000),
            tx("t2", "payout", Direction::Out, 300),
        ];
        let totals = EarningsTotals::accumulate(&SplitTable::v1(), &txs).unwrap();
        assert_eq!(totals.net_earned(), 0);
        assert_eq!(totals.creator_share, 0);
        assert_eq!(totals.unclassified_count, 0);
    }
}
