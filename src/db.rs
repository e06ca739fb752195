//! Database module
//!
//! Connectivity and schema verification. The schema itself lives in the
//! raw SQL files under migrations/.

use sqlx::PgPool;

/// Tables the engine reads from or writes to
pub const REQUIRED_TABLES: &[&str] = &[
    "wallet_transactions",
    "user_wallets",
    "payout_records",
    "creator_earnings_monthly",
    "platform_finance_monthly",
    "finance_anomalies",
    "aggregation_runs",
];

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
