//! creator_ledger Library
//!
//! Monthly creator earnings, platform rollups and balance reconciliation
//! over an append-only token ledger.

pub mod aggregation;
pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod reconcile;
pub mod service;
pub mod store;

pub use config::Config;
pub use domain::{DomainError, OperationContext, Period};
pub use error::{ApiError, AppError};
pub use service::{FinanceService, ServiceSettings, UserFinancialSummary};
pub use store::{FinanceStore, InMemoryStore, PgFinanceStore, StoreError};
