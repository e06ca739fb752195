//! Postgres store
//!
//! `FinanceStore` over the tables in `migrations/0001_finance_engine.sql`.
//! Rows are read into flat `FromRow` structs and mapped to domain types;
//! anything that does not map is reported as `StoreError::Decode`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AggregationRun, RunKind, RunStatus};
use crate::domain::{
    AnomalyStatus, AnomalyType, CreatorEarningsMonthly, Direction, FinanceAnomaly, PayoutRecord,
    PayoutStatus, Period, PlatformFinanceMonthly, Severity, SourceAmounts, TransactionMeta,
    TransactionType, Trigger, UserWallet, WalletTransaction,
};

use super::{
    AnomalyFilter, AnomalyStore, AuditStore, InsertOutcome, PageCursor, PayoutLedger,
    PayoutQuery, PayoutTimeBasis, SnapshotStore, StoreError, StoreResult, TimeRange,
    TransactionLog, TransactionPage, TransactionQuery, WalletCache,
};

#[derive(Debug, Clone)]
pub struct PgFinanceStore {
    pool: PgPool,
}

impl PgFinanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =========================================================================
// Row types
// =========================================================================

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: String,
    user_id: String,
    #[sqlx(rename = "type")]
    tx_type: String,
    direction: String,
    amount: i64,
    created_at: DateTime<Utc>,
    meta: serde_json::Value,
}

impl TryFrom<TransactionRow> for WalletTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let direction = Direction::parse(&row.direction).ok_or_else(|| {
            StoreError::decode(
                "transaction",
                &row.id,
                format!("unknown direction '{}'", row.direction),
            )
        })?;

        // Producers write free-form meta; a malformed document degrades to
        // no hints rather than losing the transaction
        let meta = match serde_json::from_value::<TransactionMeta>(row.meta) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(tx_id = %row.id, error = %e, "Malformed transaction meta ignored");
                TransactionMeta::default()
            }
        };

        Ok(WalletTransaction {
            id: row.id,
            user_id: row.user_id,
            tx_type: TransactionType::from(row.tx_type),
            direction,
            amount: row.amount,
            created_at: row.created_at,
            meta,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    user_id: String,
    tokens_balance: i64,
    lifetime_purchased: i64,
    lifetime_earned: i64,
    lifetime_withdrawn: i64,
}

impl From<WalletRow> for UserWallet {
    fn from(row: WalletRow) -> Self {
        UserWallet {
            user_id: row.user_id,
            tokens_balance: row.tokens_balance,
            lifetime_purchased: row.lifetime_purchased,
            lifetime_earned: row.lifetime_earned,
            lifetime_withdrawn: row.lifetime_withdrawn,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PayoutRow {
    id: String,
    user_id: String,
    tokens: i64,
    fiat_amount: Decimal,
    currency: String,
    status: String,
    requested_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<PayoutRow> for PayoutRecord {
    type Error = StoreError;

    fn try_from(row: PayoutRow) -> Result<Self, Self::Error> {
        let status = PayoutStatus::parse(&row.status).ok_or_else(|| {
            StoreError::decode("payout", &row.id, format!("unknown status '{}'", row.status))
        })?;

        Ok(PayoutRecord {
            id: row.id,
            user_id: row.user_id,
            tokens: row.tokens,
            fiat_amount: row.fiat_amount,
            currency: row.currency,
            status,
            requested_at: row.requested_at,
            paid_at: row.paid_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EarningsRow {
    user_id: String,
    year: i32,
    month: i32,
    earned: serde_json::Value,
    refunded: serde_json::Value,
    net_earned: i64,
    creator_share: i64,
    platform_share: i64,
    payout_requested_tokens: i64,
    payout_paid_tokens: i64,
    payout_fiat_paid: Decimal,
    payout_currency: String,
    transaction_count: i64,
    unclassified_count: i64,
    split_table_version: String,
    generated_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EarningsRow> for CreatorEarningsMonthly {
    type Error = StoreError;

    fn try_from(row: EarningsRow) -> Result<Self, Self::Error> {
        Ok(CreatorEarningsMonthly {
            earned: serde_json::from_value::<SourceAmounts>(row.earned)?,
            refunded: serde_json::from_value::<SourceAmounts>(row.refunded)?,
            month: month_from_db("earnings snapshot", &row.user_id, row.month)?,
            user_id: row.user_id,
            year: row.year,
            net_earned: row.net_earned,
            creator_share: row.creator_share,
            platform_share: row.platform_share,
            payout_requested_tokens: row.payout_requested_tokens,
            payout_paid_tokens: row.payout_paid_tokens,
            payout_fiat_paid: row.payout_fiat_paid,
            payout_currency: row.payout_currency,
            transaction_count: row.transaction_count,
            unclassified_count: row.unclassified_count,
            split_table_version: row.split_table_version,
            generated_at: row.generated_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlatformRow {
    year: i32,
    month: i32,
    gmv_tokens: i64,
    gmv_fiat: Decimal,
    gmv_by_source: serde_json::Value,
    total_creator_share: i64,
    total_platform_share: i64,
    fees_by_source: serde_json::Value,
    purchase_tokens: i64,
    refunds_tokens: i64,
    net_revenue_tokens: i64,
    total_payout_tokens: i64,
    total_payout_fiat: Decimal,
    total_payout_count: i64,
    outstanding_creator_liability_tokens: i64,
    outstanding_creator_liability_fiat: Decimal,
    active_creator_count: i64,
    transaction_count: i64,
    unclassified_count: i64,
    fiat_currency: String,
    split_table_version: String,
    generated_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PlatformRow> for PlatformFinanceMonthly {
    type Error = StoreError;

    fn try_from(row: PlatformRow) -> Result<Self, Self::Error> {
        let id = format!("{}-{}", row.year, row.month);
        Ok(PlatformFinanceMonthly {
            year: row.year,
            month: month_from_db("platform snapshot", &id, row.month)?,
            gmv_tokens: row.gmv_tokens,
            gmv_fiat: row.gmv_fiat,
            gmv_by_source: serde_json::from_value(row.gmv_by_source)?,
            total_creator_share: row.total_creator_share,
            total_platform_share: row.total_platform_share,
            fees_by_source: serde_json::from_value(row.fees_by_source)?,
            purchase_tokens: row.purchase_tokens,
            refunds_tokens: row.refunds_tokens,
            net_revenue_tokens: row.net_revenue_tokens,
            total_payout_tokens: row.total_payout_tokens,
            total_payout_fiat: row.total_payout_fiat,
            total_payout_count: row.total_payout_count,
            outstanding_creator_liability_tokens: row.outstanding_creator_liability_tokens,
            outstanding_creator_liability_fiat: row.outstanding_creator_liability_fiat,
            active_creator_count: row.active_creator_count,
            transaction_count: row.transaction_count,
            unclassified_count: row.unclassified_count,
            fiat_currency: row.fiat_currency,
            split_table_version: row.split_table_version,
            generated_at: row.generated_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AnomalyRow {
    id: Uuid,
    #[sqlx(rename = "type")]
    anomaly_type: String,
    user_id: Option<String>,
    period: Option<String>,
    details: String,
    severity: String,
    status: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<String>,
}

impl TryFrom<AnomalyRow> for FinanceAnomaly {
    type Error = StoreError;

    fn try_from(row: AnomalyRow) -> Result<Self, Self::Error> {
        let id = row.id.to_string();
        let anomaly_type = AnomalyType::parse(&row.anomaly_type)
            .ok_or_else(|| StoreError::decode("anomaly", &id, format!("unknown type '{}'", row.anomaly_type)))?;
        let severity = Severity::parse(&row.severity)
            .ok_or_else(|| StoreError::decode("anomaly", &id, format!("unknown severity '{}'", row.severity)))?;
        let status = AnomalyStatus::parse(&row.status)
            .ok_or_else(|| StoreError::decode("anomaly", &id, format!("unknown status '{}'", row.status)))?;
        let period = row
            .period
            .map(|p| p.parse::<Period>())
            .transpose()
            .map_err(|e| StoreError::decode("anomaly", &id, e.to_string()))?;

        Ok(FinanceAnomaly {
            id: row.id,
            anomaly_type,
            user_id: row.user_id,
            period,
            details: row.details,
            severity,
            status,
            metadata: row.metadata,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
            resolved_by: row.resolved_by,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    sequence_number: i64,
    kind: String,
    trigger: String,
    correlation_id: Option<Uuid>,
    user_id: Option<String>,
    period: Option<String>,
    status: String,
    processed: i64,
    failed: i64,
    detail: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    previous_hash: String,
    current_hash: String,
}

impl TryFrom<RunRow> for AggregationRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let id = row.id.to_string();
        let kind = RunKind::parse(&row.kind)
            .ok_or_else(|| StoreError::decode("aggregation run", &id, format!("unknown kind '{}'", row.kind)))?;
        let trigger = Trigger::parse(&row.trigger)
            .ok_or_else(|| StoreError::decode("aggregation run", &id, format!("unknown trigger '{}'", row.trigger)))?;
        let status = RunStatus::parse(&row.status)
            .ok_or_else(|| StoreError::decode("aggregation run", &id, format!("unknown status '{}'", row.status)))?;
        let period = row
            .period
            .map(|p| p.parse::<Period>())
            .transpose()
            .map_err(|e| StoreError::decode("aggregation run", &id, e.to_string()))?;

        Ok(AggregationRun {
            id: row.id,
            sequence_number: row.sequence_number,
            kind,
            trigger,
            correlation_id: row.correlation_id,
            user_id: row.user_id,
            period,
            status,
            processed: row.processed,
            failed: row.failed,
            detail: row.detail,
            started_at: row.started_at,
            finished_at: row.finished_at,
            previous_hash: row.previous_hash,
            current_hash: row.current_hash,
        })
    }
}

fn month_from_db(entity: &'static str, id: &str, month: i32) -> StoreResult<u32> {
    u32::try_from(month)
        .ok()
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| StoreError::decode(entity, id, format!("month {} out of range", month)))
}

const EARNINGS_COLUMNS: &str = "user_id, year, month, earned, refunded, net_earned, creator_share, \
    platform_share, payout_requested_tokens, payout_paid_tokens, payout_fiat_paid, payout_currency, \
    transaction_count, unclassified_count, split_table_version, generated_at, updated_at";

const PLATFORM_COLUMNS: &str = "year, month, gmv_tokens, gmv_fiat, gmv_by_source, total_creator_share, \
    total_platform_share, fees_by_source, purchase_tokens, refunds_tokens, net_revenue_tokens, \
    total_payout_tokens, total_payout_fiat, total_payout_count, outstanding_creator_liability_tokens, \
    outstanding_creator_liability_fiat, active_creator_count, transaction_count, unclassified_count, \
    fiat_currency, split_table_version, generated_at, updated_at";

const ANOMALY_COLUMNS: &str = "id, type, user_id, period, details, severity, status, metadata, \
    created_at, resolved_at, resolved_by";

const RUN_COLUMNS: &str = "id, sequence_number, kind, trigger, correlation_id, user_id, period, status, \
    processed, failed, detail, started_at, finished_at, previous_hash, current_hash";

// =========================================================================
// Source reads
// =========================================================================

#[async_trait]
impl TransactionLog for PgFinanceStore {
    async fn transactions_page(
        &self,
        query: &TransactionQuery,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> StoreResult<TransactionPage> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, type, direction, amount, created_at, meta
            FROM wallet_transactions
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at < $3)
              AND ($4::timestamptz IS NULL OR (created_at, id) > ($4, $5))
            ORDER BY created_at ASC, id ASC
            LIMIT $6
            "#,
        )
        .bind(query.user_id.as_deref())
        .bind(query.range.start)
        .bind(query.range.end)
        .bind(after.map(|c| c.created_at))
        .bind(after.map(|c| c.id.as_str()).unwrap_or_default())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let full_page = rows.len() == limit;
        let transactions = rows
            .into_iter()
            .map(WalletTransaction::try_from)
            .collect::<StoreResult<Vec<_>>>()?;

        let next = if full_page {
            transactions.last().map(PageCursor::after)
        } else {
            None
        };

        Ok(TransactionPage { transactions, next })
    }

    async fn transaction(&self, id: &str) -> StoreResult<Option<WalletTransaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, type, direction, amount, created_at, meta
            FROM wallet_transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WalletTransaction::try_from).transpose()
    }

    async fn active_users(&self, range: TimeRange) -> StoreResult<Vec<String>> {
        let users: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT user_id
            FROM wallet_transactions
            WHERE ($1::timestamptz IS NULL OR created_at >= $1)
              AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY user_id
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}

#[async_trait]
impl PayoutLedger for PgFinanceStore {
    async fn payouts(&self, query: &PayoutQuery) -> StoreResult<Vec<PayoutRecord>> {
        let time_column = match query.basis {
            PayoutTimeBasis::RequestedAt => "requested_at",
            PayoutTimeBasis::PaidAt => "paid_at",
        };

        let sql = format!(
            r#"
            SELECT id, user_id, tokens, fiat_amount, currency, status, requested_at, paid_at
            FROM payout_records
            WHERE ($1::text IS NULL OR user_id = $1)
              AND {col} IS NOT NULL
              AND ($2::timestamptz IS NULL OR {col} >= $2)
              AND ($3::timestamptz IS NULL OR {col} < $3)
              AND ($4::text[] IS NULL OR status = ANY($4))
            ORDER BY requested_at ASC, id ASC
            "#,
            col = time_column
        );

        let rows: Vec<PayoutRow> = sqlx::query_as(&sql)
            .bind(query.user_id.as_deref())
            .bind(query.range.start)
            .bind(query.range.end)
            .bind(query.status_spellings())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(PayoutRecord::try_from).collect()
    }

    async fn paid_payout_total(&self, range: TimeRange) -> StoreResult<i64> {
        let paid = PayoutQuery::paid(None, range);
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(tokens), 0)::bigint
            FROM payout_records
            WHERE status = ANY($1)
              AND paid_at IS NOT NULL
              AND ($2::timestamptz IS NULL OR paid_at >= $2)
              AND ($3::timestamptz IS NULL OR paid_at < $3)
            "#,
        )
        .bind(paid.status_spellings())
        .bind(range.start)
        .bind(range.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }
}

#[async_trait]
impl WalletCache for PgFinanceStore {
    async fn wallet(&self, user_id: &str) -> StoreResult<Option<UserWallet>> {
        let row: Option<WalletRow> = sqlx::query_as(
            r#"
            SELECT user_id, tokens_balance, lifetime_purchased, lifetime_earned, lifetime_withdrawn
            FROM user_wallets
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserWallet::from))
    }

    async fn wallet_user_ids(&self) -> StoreResult<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM user_wallets ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

// =========================================================================
// Snapshots
// =========================================================================

#[async_trait]
impl SnapshotStore for PgFinanceStore {
    async fn earnings_snapshot(
        &self,
        user_id: &str,
        period: Period,
    ) -> StoreResult<Option<CreatorEarningsMonthly>> {
        let sql = format!(
            "SELECT {} FROM creator_earnings_monthly WHERE user_id = $1 AND year = $2 AND month = $3",
            EARNINGS_COLUMNS
        );
        let row: Option<EarningsRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .bind(period.year())
            .bind(period.month() as i32)
            .fetch_optional(&self.pool)
            .await?;

        row.map(CreatorEarningsMonthly::try_from).transpose()
    }

    async fn upsert_earnings_snapshot(
        &self,
        snapshot: &CreatorEarningsMonthly,
    ) -> StoreResult<CreatorEarningsMonthly> {
        let sql = format!(
            r#"
            INSERT INTO creator_earnings_monthly ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (user_id, year, month) DO UPDATE SET
                earned = EXCLUDED.earned,
                refunded = EXCLUDED.refunded,
                net_earned = EXCLUDED.net_earned,
                creator_share = EXCLUDED.creator_share,
                platform_share = EXCLUDED.platform_share,
                payout_requested_tokens = EXCLUDED.payout_requested_tokens,
                payout_paid_tokens = EXCLUDED.payout_paid_tokens,
                payout_fiat_paid = EXCLUDED.payout_fiat_paid,
                payout_currency = EXCLUDED.payout_currency,
                transaction_count = EXCLUDED.transaction_count,
                unclassified_count = EXCLUDED.unclassified_count,
                split_table_version = EXCLUDED.split_table_version,
                updated_at = EXCLUDED.updated_at
            RETURNING {cols}
            "#,
            cols = EARNINGS_COLUMNS
        );

        let row: EarningsRow = sqlx::query_as(&sql)
            .bind(&snapshot.user_id)
            .bind(snapshot.year)
            .bind(snapshot.month as i32)
            .bind(serde_json::to_value(snapshot.earned)?)
            .bind(serde_json::to_value(snapshot.refunded)?)
            .bind(snapshot.net_earned)
            .bind(snapshot.creator_share)
            .bind(snapshot.platform_share)
            .bind(snapshot.payout_requested_tokens)
            .bind(snapshot.payout_paid_tokens)
            .bind(snapshot.payout_fiat_paid)
            .bind(&snapshot.payout_currency)
            .bind(snapshot.transaction_count)
            .bind(snapshot.unclassified_count)
            .bind(&snapshot.split_table_version)
            .bind(snapshot.generated_at)
            .bind(snapshot.updated_at)
            .fetch_one(&self.pool)
            .await?;

        CreatorEarningsMonthly::try_from(row)
    }

    async fn delete_earnings_snapshot(&self, user_id: &str, period: Period) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM creator_earnings_monthly WHERE user_id = $1 AND year = $2 AND month = $3",
        )
        .bind(user_id)
        .bind(period.year())
        .bind(period.month() as i32)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn earnings_snapshots_for_user(
        &self,
        user_id: &str,
    ) -> StoreResult<Vec<CreatorEarningsMonthly>> {
        let sql = format!(
            "SELECT {} FROM creator_earnings_monthly WHERE user_id = $1 ORDER BY year, month",
            EARNINGS_COLUMNS
        );
        let rows: Vec<EarningsRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(CreatorEarningsMonthly::try_from).collect()
    }

    async fn lifetime_creator_share(&self, through: Period) -> StoreResult<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(creator_share), 0)::BIGINT
            FROM creator_earnings_monthly
            WHERE (year, month) <= ($1, $2)
            "#,
        )
        .bind(through.year())
        .bind(through.month() as i32)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn platform_snapshot(&self, period: Period) -> StoreResult<Option<PlatformFinanceMonthly>> {
        let sql = format!(
            "SELECT {} FROM platform_finance_monthly WHERE year = $1 AND month = $2",
            PLATFORM_COLUMNS
        );
        let row: Option<PlatformRow> = sqlx::query_as(&sql)
            .bind(period.year())
            .bind(period.month() as i32)
            .fetch_optional(&self.pool)
            .await?;

        row.map(PlatformFinanceMonthly::try_from).transpose()
    }

    async fn upsert_platform_snapshot(
        &self,
        snapshot: &PlatformFinanceMonthly,
    ) -> StoreResult<PlatformFinanceMonthly> {
        let sql = format!(
            r#"
            INSERT INTO platform_finance_monthly ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23)
            ON CONFLICT (year, month) DO UPDATE SET
                gmv_tokens = EXCLUDED.gmv_tokens,
                gmv_fiat = EXCLUDED.gmv_fiat,
                gmv_by_source = EXCLUDED.gmv_by_source,
                total_creator_share = EXCLUDED.total_creator_share,
                total_platform_share = EXCLUDED.total_platform_share,
                fees_by_source = EXCLUDED.fees_by_source,
                purchase_tokens = EXCLUDED.purchase_tokens,
                refunds_tokens = EXCLUDED.refunds_tokens,
                net_revenue_tokens = EXCLUDED.net_revenue_tokens,
                total_payout_tokens = EXCLUDED.total_payout_tokens,
                total_payout_fiat = EXCLUDED.total_payout_fiat,
                total_payout_count = EXCLUDED.total_payout_count,
                outstanding_creator_liability_tokens = EXCLUDED.outstanding_creator_liability_tokens,
                outstanding_creator_liability_fiat = EXCLUDED.outstanding_creator_liability_fiat,
                active_creator_count = EXCLUDED.active_creator_count,
                transaction_count = EXCLUDED.transaction_count,
                unclassified_count = EXCLUDED.unclassified_count,
                fiat_currency = EXCLUDED.fiat_currency,
                split_table_version = EXCLUDED.split_table_version,
                updated_at = EXCLUDED.updated_at
            RETURNING {cols}
            "#,
            cols = PLATFORM_COLUMNS
        );

        let row: PlatformRow = sqlx::query_as(&sql)
            .bind(snapshot.year)
            .bind(snapshot.month as i32)
            .bind(snapshot.gmv_tokens)
            .bind(snapshot.gmv_fiat)
            .bind(serde_json::to_value(snapshot.gmv_by_source)?)
            .bind(snapshot.total_creator_share)
            .bind(snapshot.total_platform_share)
            .bind(serde_json::to_value(snapshot.fees_by_source)?)
            .bind(snapshot.purchase_tokens)
            .bind(snapshot.refunds_tokens)
            .bind(snapshot.net_revenue_tokens)
            .bind(snapshot.total_payout_tokens)
            .bind(snapshot.total_payout_fiat)
            .bind(snapshot.total_payout_count)
            .bind(snapshot.outstanding_creator_liability_tokens)
            .bind(snapshot.outstanding_creator_liability_fiat)
            .bind(snapshot.active_creator_count)
            .bind(snapshot.transaction_count)
            .bind(snapshot.unclassified_count)
            .bind(&snapshot.fiat_currency)
            .bind(&snapshot.split_table_version)
            .bind(snapshot.generated_at)
            .bind(snapshot.updated_at)
            .fetch_one(&self.pool)
            .await?;

        PlatformFinanceMonthly::try_from(row)
    }
}

// =========================================================================
// Anomalies and audit
// =========================================================================

#[async_trait]
impl AnomalyStore for PgFinanceStore {
    async fn insert_anomaly(&self, anomaly: &FinanceAnomaly) -> StoreResult<InsertOutcome> {
        let period = anomaly.period.map(|p| p.to_string());

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO finance_anomalies (
                id, type, user_id, period, details, severity, status, metadata,
                created_at, resolved_at, resolved_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (type, COALESCE(user_id, ''), COALESCE(period, ''))
                WHERE status <> 'resolved'
                DO NOTHING
            RETURNING id
            "#,
        )
        .bind(anomaly.id)
        .bind(anomaly.anomaly_type.as_str())
        .bind(anomaly.user_id.as_deref())
        .bind(period.as_deref())
        .bind(&anomaly.details)
        .bind(anomaly.severity.as_str())
        .bind(anomaly.status.as_str())
        .bind(&anomaly.metadata)
        .bind(anomaly.created_at)
        .bind(anomaly.resolved_at)
        .bind(anomaly.resolved_by.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            return Ok(InsertOutcome::Inserted);
        }

        let existing_id: Uuid = sqlx::query_scalar(
            r#"
            SELECT id FROM finance_anomalies
            WHERE type = $1
              AND COALESCE(user_id, '') = COALESCE($2, '')
              AND COALESCE(period, '') = COALESCE($3, '')
              AND status <> 'resolved'
            LIMIT 1
            "#,
        )
        .bind(anomaly.anomaly_type.as_str())
        .bind(anomaly.user_id.as_deref())
        .bind(period.as_deref())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            StoreError::Conflict(format!(
                "anomaly {} rejected without a matching open record",
                anomaly.id
            ))
        })?;

        Ok(InsertOutcome::Duplicate { existing_id })
    }

    async fn anomalies(&self, filter: &AnomalyFilter) -> StoreResult<Vec<FinanceAnomaly>> {
        let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            r#"
            SELECT {}
            FROM finance_anomalies
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR period = $2)
              AND ($3::text IS NULL OR type = $3)
              AND (cardinality($4::text[]) = 0 OR status = ANY($4))
            ORDER BY created_at ASC, id ASC
            "#,
            ANOMALY_COLUMNS
        );

        let rows: Vec<AnomalyRow> = sqlx::query_as(&sql)
            .bind(filter.user_id.as_deref())
            .bind(filter.period.map(|p| p.to_string()))
            .bind(filter.anomaly_type.map(|t| t.as_str()))
            .bind(&statuses)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(FinanceAnomaly::try_from).collect()
    }
}

#[async_trait]
impl AuditStore for PgFinanceStore {
    async fn append_run(&self, run: &AggregationRun) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO aggregation_runs (
                id, sequence_number, kind, trigger, correlation_id, user_id, period, status,
                processed, failed, detail, started_at, finished_at, previous_hash, current_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(run.id)
        .bind(run.sequence_number)
        .bind(run.kind.as_str())
        .bind(run.trigger.as_str())
        .bind(run.correlation_id)
        .bind(run.user_id.as_deref())
        .bind(run.period.map(|p| p.to_string()))
        .bind(run.status.as_str())
        .bind(run.processed)
        .bind(run.failed)
        .bind(run.detail.as_deref())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.previous_hash)
        .bind(&run.current_hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::Conflict(
                format!("audit sequence {} already taken", run.sequence_number),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn last_run(&self) -> StoreResult<Option<AggregationRun>> {
        let sql = format!(
            "SELECT {} FROM aggregation_runs ORDER BY sequence_number DESC LIMIT 1",
            RUN_COLUMNS
        );
        let row: Option<RunRow> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        row.map(AggregationRun::try_from).transpose()
    }

    async fn runs(&self, limit: usize) -> StoreResult<Vec<AggregationRun>> {
        let sql = format!(
            "SELECT {} FROM aggregation_runs ORDER BY sequence_number ASC LIMIT $1",
            RUN_COLUMNS
        );
        let rows: Vec<RunRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(AggregationRun::try_from).collect()
    }

    async fn recent_runs(&self, limit: usize) -> StoreResult<Vec<AggregationRun>> {
        let sql = format!(
            "SELECT {} FROM aggregation_runs ORDER BY sequence_number DESC LIMIT $1",
            RUN_COLUMNS
        );
        let rows: Vec<RunRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(AggregationRun::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(direction: &str, meta: serde_json::Value) -> TransactionRow {
        TransactionRow {
            id: "tx-1".to_string(),
            user_id: "u-1".to_string(),
            tx_type: "CHAT_SPEND".to_string(),
            direction: direction.to_string(),
            amount: 40,
            created_at: Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap(),
            meta,
        }
    }

    #[test]
    fn test_transaction_row_mapping() {
        let tx = WalletTransaction::try_from(row("IN", json!({"source": "chat"}))).unwrap();
        assert_eq!(tx.tx_type, TransactionType::ChatSpend);
        assert_eq!(tx.direction, Direction::In);
        assert_eq!(tx.meta.source.as_deref(), Some("chat"));
    }

    #[test]
    fn test_malformed_meta_is_lenient() {
        let tx = WalletTransaction::try_from(row("OUT", json!({"creatorShare": "lots"}))).unwrap();
        assert_eq!(tx.meta, TransactionMeta::default());
    }

    #[test]
    fn test_unknown_direction_is_decode_error() {
        let err = WalletTransaction::try_from(row("SIDEWAYS", json!({}))).unwrap_err();
        assert!(matches!(err, StoreError::Decode { entity: "transaction", .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(month_from_db("x", "1", 12).unwrap(), 12);
        assert!(month_from_db("x", "1", 0).is_err());
        assert!(month_from_db("x", "1", -3).is_err());
    }
}
