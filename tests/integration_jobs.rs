//! Scheduled cycle tests

mod common;

use std::time::Duration;

use tokio::sync::watch;

use common::*;
use creator_ledger::domain::{Period, TransactionMeta};
use creator_ledger::jobs::{
    run_earnings_cycle, run_reconciliation_cycle, JobScheduler, JobSchedulerConfig,
};
use creator_ledger::store::SnapshotStore;

fn february() -> Period {
    Period::new(2026, 2).unwrap()
}

fn march() -> Period {
    Period::new(2026, 3).unwrap()
}

async fn seed_two_months(env: &TestEnv) {
    env.store
        .insert_transactions(vec![
            chat_earning("f1", "creator-1", 100, at(2026, 2, 10)),
            call_earning("m1", "creator-1", 50, at(2026, 3, 3)),
            event_earning("m2", "creator-2", 200, at(2026, 3, 4)),
        ])
        .await;
}

#[tokio::test]
async fn test_earnings_cycle_covers_previous_and_current_month() {
    let env = TestEnv::new();
    seed_two_months(&env).await;
    let (_tx, cancel) = watch::channel(false);

    let runs = run_earnings_cycle(&env.service, cancel).await.unwrap();

    let periods: Vec<Period> = runs.iter().map(|r| r.period).collect();
    assert_eq!(periods, vec![february(), march()]);
    assert!(runs.iter().all(|r| r.platform_written && r.batch.is_clean()));
    assert_eq!(runs[0].batch.processed, 1);
    assert_eq!(runs[1].batch.processed, 2);

    let feb = env
        .store
        .earnings_snapshot("creator-1", february())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(feb.creator_share, 65);

    let mar = env.store.platform_snapshot(march()).await.unwrap().unwrap();
    assert_eq!(mar.gmv_tokens, 250);
    // 65 (Feb) + 40 + 160 (Mar)
    assert_eq!(mar.outstanding_creator_liability_tokens, 265);
}

#[tokio::test]
async fn test_cancelled_cycle_skips_platform_rollup() {
    let env = TestEnv::new();
    seed_two_months(&env).await;
    let (_tx, cancel) = watch::channel(true);

    let runs = run_earnings_cycle(&env.service, cancel).await.unwrap();

    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].period, february());
    assert!(runs[0].batch.cancelled);
    assert!(!runs[0].platform_written);
    assert!(env.store.platform_snapshot(february()).await.unwrap().is_none());
    assert!(env.store.platform_snapshot(march()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reconciliation_cycle_counts_wallet_and_period_findings() {
    let env = TestEnv::new();
    env.store
        .insert_transactions(vec![
            purchase("t1", "user-1", 100, at(2026, 1, 5)),
            chat_earning("s1", "creator-1", 100, at(2026, 3, 2))
                .with_meta(TransactionMeta::with_split(60, 30)),
        ])
        .await;
    env.store.put_wallet(wallet("user-1", 150)).await;

    let first = run_reconciliation_cycle(&env.service).await.unwrap();
    assert_eq!(first.users_checked, 1);
    assert_eq!(first.users_failed, 0);
    // balance-mismatch for user-1, invalid-split for March
    assert_eq!(first.anomalies_recorded, 2);
    assert_eq!(first.duplicates, 0);

    let second = run_reconciliation_cycle(&env.service).await.unwrap();
    assert_eq!(second.anomalies_recorded, 0);
    assert_eq!(second.duplicates, 2);
}

#[tokio::test]
async fn test_run_all_once_reports_both_cycles() {
    let env = TestEnv::new();
    seed_two_months(&env).await;
    let (_tx, cancel) = watch::channel(false);
    let scheduler = JobScheduler::new(env.service.clone(), cancel);

    let report = scheduler.run_all_once().await;

    assert!(report.is_clean(), "errors: {:?}", report.errors);
    assert_eq!(report.earnings.len(), 2);
    let reconciliation = report.reconciliation.unwrap();
    assert_eq!(reconciliation.anomalies_recorded, 0);
}

#[tokio::test]
async fn test_run_all_once_collects_cycle_errors() {
    let env = TestEnv::new();
    env.store.set_unavailable(true).await;
    let (_tx, cancel) = watch::channel(false);
    let scheduler = JobScheduler::new(env.service.clone(), cancel);

    let report = scheduler.run_all_once().await;

    assert!(!report.is_clean());
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors[0].starts_with("Earnings cycle"));
    assert!(report.reconciliation.is_none());
}

#[tokio::test]
async fn test_scheduler_stops_on_shutdown_signal() {
    let env = TestEnv::new();
    seed_two_months(&env).await;
    let (shutdown, cancel) = watch::channel(false);
    let config = JobSchedulerConfig {
        earnings_interval: Duration::from_secs(3_600),
        reconcile_interval: Duration::from_secs(3_600),
    };

    let handle = JobScheduler::with_config(env.service.clone(), config, cancel).start();
    shutdown.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
