//! Platform Rollup Aggregator
//!
//! One `PlatformFinanceMonthly` per month. Revenue figures are re-derived
//! from raw transactions across all users (per transaction, never from the
//! per-user snapshots); liability is cumulative over all history.

use chrono::SubsecRound;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::domain::{
    classify, Classification, Clock, Direction, DomainError, Period, PlatformFinanceMonthly,
    SourceAmounts, SplitTable, WalletTransaction,
};
use crate::store::{FinanceStore, PageCursor, PayoutQuery, TimeRange, TransactionQuery};

use super::{AggregationError, AggregationSettings};

/// Revenue arithmetic over one month of the whole log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformTotals {
    pub gmv_by_source: SourceAmounts,
    pub fees_by_source: SourceAmounts,
    pub total_creator_share: i64,
    pub total_platform_share: i64,
    pub purchase_tokens: i64,
    pub refunds_tokens: i64,
    pub transaction_count: i64,
    pub unclassified_count: i64,
    creators: BTreeSet<String>,
}

impl PlatformTotals {
    pub fn add(&mut self, split_table: &SplitTable, tx: &WalletTransaction) -> Result<(), DomainError> {
        self.transaction_count += 1;
        match classify(tx) {
            Classification::Earning(category) => {
                let split = split_table.split(tx.amount, category)?;
                self.gmv_by_source.add(category, tx.amount);
                self.fees_by_source.add(category, split.platform);
                self.total_creator_share += split.creator;
                self.total_platform_share += split.platform;
                self.creators.insert(tx.user_id.clone());
            }
            Classification::Refund(category) if tx.direction == Direction::Out => {
                let split = split_table.split(tx.amount, category)?;
                self.refunds_tokens += tx.amount;
                self.fees_by_source.add(category, -split.platform);
                self.total_creator_share -= split.creator;
                self.total_platform_share -= split.platform;
            }
            Classification::Purchase => self.purchase_tokens += tx.amount,
            Classification::PurchaseReversal => self.purchase_tokens -= tx.amount,
            Classification::Unclassified => self.unclassified_count += 1,
            _ => {}
        }
        Ok(())
    }

    pub fn gmv_tokens(&self) -> i64 {
        self.gmv_by_source.total()
    }

    pub fn active_creator_count(&self) -> i64 {
        self.creators.len() as i64
    }
}

pub struct PlatformRollupAggregator {
    store: Arc<dyn FinanceStore>,
    clock: Arc<dyn Clock>,
    settings: AggregationSettings,
}

impl PlatformRollupAggregator {
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

    /// Build (or return the cached) rollup for a month.
    ///
    /// Reads the per-user earnings snapshots for the liability figure, so the
    /// month's earnings batch must have finished first.
    pub async fn aggregate(
        &self,
        period: Period,
        force: bool,
    ) -> Result<PlatformFinanceMonthly, AggregationError> {
        if !force {
            if let Some(existing) = self.store.platform_snapshot(period).await? {
                tracing::debug!(period = %period, "Platform snapshot cache hit");
                return Ok(existing);
            }
        }

        let snapshot = self.compute(period).await?;
        let stored = self.store.upsert_platform_snapshot(&snapshot).await?;

        tracing::info!(
            period = %period,
            gmv_tokens = stored.gmv_tokens,
            net_revenue_tokens = stored.net_revenue_tokens,
            liability_tokens = stored.outstanding_creator_liability_tokens,
            "Platform snapshot written"
        );

        Ok(stored)
    }

    /// Recompute the rollup without writing it
    pub async fn compute(&self, period: Period) -> Result<PlatformFinanceMonthly, AggregationError> {
        let range = TimeRange::month(period);
        let totals = self.scan_month(range).await?;

        let paid_in_month = self.store.payouts(&PayoutQuery::paid(None, range)).await?;
        let total_payout_tokens: i64 = paid_in_month.iter().map(|p| p.tokens).sum();
        let total_payout_fiat = paid_in_month
            .iter()
            .map(|p| p.fiat_amount)
            .sum::<Decimal>()
            .round_dp(2);

        let liability = self.outstanding_liability(period).await?;

        let fiat = &self.settings.fiat;
        let now = self.clock.now().trunc_subsecs(6);

        Ok(PlatformFinanceMonthly {
            year: period.year(),
            month: period.month(),
            gmv_tokens: totals.gmv_tokens(),
            gmv_fiat: fiat.to_fiat(totals.gmv_tokens()),
            gmv_by_source: totals.gmv_by_source,
            total_creator_share: totals.total_creator_share,
            total_platform_share: totals.total_platform_share,
            fees_by_source: totals.fees_by_source,
            purchase_tokens: totals.purchase_tokens,
            refunds_tokens: totals.refunds_tokens,
            net_revenue_tokens: totals.total_platform_share,
            total_payout_tokens,
            total_payout_fiat,
            total_payout_count: paid_in_month.len() as i64,
            outstanding_creator_liability_tokens: liability,
            outstanding_creator_liability_fiat: fiat.to_fiat(liability),
            active_creator_count: totals.active_creator_count(),
            transaction_count: totals.transaction_count,
            unclassified_count: totals.unclassified_count,
            fiat_currency: fiat.currency.clone(),
            split_table_version: self.settings.split_table.version().to_string(),
            generated_at: now,
            updated_at: now,
        })
    }

    /// Stream the month page by page into the totals
    async fn scan_month(&self, range: TimeRange) -> Result<PlatformTotals, AggregationError> {
        let query = TransactionQuery::all_users(range);
        let page_size = self.settings.page_size.max(1);
        let mut totals = PlatformTotals::default();
        let mut cursor: Option<PageCursor> = None;

        loop {
            let page = self
                .store
                .transactions_page(&query, cursor.as_ref(), page_size)
                .await?;
            for tx in &page.transactions {
                totals.add(&self.settings.split_table, tx)?;
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(totals)
    }

    /// Lifetime creator share through `period` minus payouts paid before its end
    async fn outstanding_liability(&self, period: Period) -> Result<i64, AggregationError> {
        let lifetime_share = self.store.lifetime_creator_share(period).await?;
        let paid_out = self
            .store
            .paid_payout_total(TimeRange::before(period.end()))
            .await?;

        let liability = lifetime_share - paid_out;
        if liability < 0 {
            tracing::warn!(
                period = %period,
                lifetime_share,
                paid_out,
                "Payouts exceed lifetime creator share; liability reported as 0"
            );
            return Ok(0);
        }
        Ok(liability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionType;
    use chrono::{TimeZone, Utc};

    fn tx(user: &str, tx_type: &str, direction: Direction, amount: i64) -> WalletTransaction {
        WalletTransaction::new(
            format!("{}-{}-{}", user, tx_type, amount),
            user,
            TransactionType::from(tx_type),
            direction,
            amount,
            Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_totals_across_users() {
        let table = SplitTable::v1();
        let mut totals = PlatformTotals::default();
        for t in [
            tx("a", "chat-spend", Direction::In, 101),
            tx("b", "chat-spend", Direction::In, 99),
            tx("b", "event-ticket", Direction::In, 50),
            tx("c", "event-refund", Direction::Out, 10),
            tx("d", "purchase", Direction::In, 500),
            tx("d", "purchase", Direction::Out, 120),
            tx("d", "chat-spend", Direction::Out, 200),
        ] {
            totals.add(&table, &t).unwrap();
        }

        assert_eq!(totals.gmv_tokens(), 250);
        assert_eq!(totals.gmv_by_source.chat, 200);
        // chat: 101 -> 65/36, 99 -> 64/35; event: 50 -> 40/10; refund 10 -> 8/2
        assert_eq!(totals.total_creator_share, 65 + 64 + 40 - 8);
        assert_eq!(totals.total_platform_share, 36 + 35 + 10 - 2);
        assert_eq!(totals.fees_by_source.chat, 71);
        assert_eq!(totals.fees_by_source.event, 8);
        assert_eq!(totals.refunds_tokens, 10);
        assert_eq!(totals.purchase_tokens, 380);
        assert_eq!(totals.active_creator_count(), 2);
        assert_eq!(totals.transaction_count, 7);
    }
}
