//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use creator_ledger::domain::{
    Direction, FixedClock, PayoutRecord, PayoutStatus, TransactionMeta, TransactionType,
    UserWallet, WalletTransaction,
};
use creator_ledger::store::{FinanceStore, InMemoryStore};
use creator_ledger::{FinanceService, ServiceSettings};

/// Fixed "now" for every test: mid-March 2026
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
}

/// An instant inside the given month
pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 10, 0, 0).unwrap()
}

pub struct TestEnv {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub service: Arc<FinanceService>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_settings(ServiceSettings::default())
    }

    pub fn with_settings(settings: ServiceSettings) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(now()));
        let dyn_store: Arc<dyn FinanceStore> = store.clone();
        let service = Arc::new(FinanceService::new(dyn_store, clock.clone(), settings));
        Self {
            store,
            clock,
            service,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn FinanceStore> {
        self.store.clone()
    }
}

// =========================================================================
// Transaction builders
// =========================================================================

pub fn tx(
    id: &str,
    user_id: &str,
    tx_type: &str,
    direction: Direction,
    amount: i64,
    created_at: DateTime<Utc>,
) -> WalletTransaction {
    WalletTransaction::new(
        id,
        user_id,
        TransactionType::from(tx_type),
        direction,
        amount,
        created_at,
    )
}

pub fn purchase(id: &str, user_id: &str, amount: i64, created_at: DateTime<Utc>) -> WalletTransaction {
    tx(id, user_id, "purchase", Direction::In, amount, created_at)
}

/// Creator side of a chat message
pub fn chat_earning(id: &str, user_id: &str, amount: i64, created_at: DateTime<Utc>) -> WalletTransaction {
    tx(id, user_id, "chat-spend", Direction::In, amount, created_at)
}

/// Payer side of a chat message
pub fn chat_spend(id: &str, user_id: &str, amount: i64, created_at: DateTime<Utc>) -> WalletTransaction {
    tx(id, user_id, "chat-spend", Direction::Out, amount, created_at)
}

pub fn call_earning(id: &str, user_id: &str, amount: i64, created_at: DateTime<Utc>) -> WalletTransaction {
    tx(id, user_id, "call-spend", Direction::In, amount, created_at)
}

pub fn event_earning(id: &str, user_id: &str, amount: i64, created_at: DateTime<Utc>) -> WalletTransaction {
    tx(id, user_id, "event-ticket", Direction::In, amount, created_at)
}

/// Refund paid back by the creator
pub fn event_refund_out(
    id: &str,
    user_id: &str,
    original: &str,
    amount: i64,
    created_at: DateTime<Utc>,
) -> WalletTransaction {
    tx(id, user_id, "event-refund", Direction::Out, amount, created_at)
        .with_meta(TransactionMeta::refund_of(original))
}

pub fn payout_tx(id: &str, user_id: &str, amount: i64, created_at: DateTime<Utc>) -> WalletTransaction {
    tx(id, user_id, "payout", Direction::Out, amount, created_at)
}

pub fn wallet(user_id: &str, balance: i64) -> UserWallet {
    UserWallet::with_balance(user_id, balance)
}

pub fn paid_payout(id: &str, user_id: &str, tokens: i64, paid_at: DateTime<Utc>) -> PayoutRecord {
    PayoutRecord {
        id: id.to_string(),
        user_id: user_id.to_string(),
        tokens,
        fiat_amount: (Decimal::from(tokens) * Decimal::new(20, 2)).round_dp(2),
        currency: "PLN".to_string(),
        status: PayoutStatus::Paid,
        requested_at: paid_at - Duration::days(2),
        paid_at: Some(paid_at),
    }
}

pub fn requested_payout(id: &str, user_id: &str, tokens: i64, requested_at: DateTime<Utc>) -> PayoutRecord {
    PayoutRecord {
        id: id.to_string(),
        user_id: user_id.to_string(),
        tokens,
        fiat_amount: Decimal::ZERO,
        currency: "PLN".to_string(),
        status: PayoutStatus::Requested,
        requested_at,
        paid_at: None,
    }
}
