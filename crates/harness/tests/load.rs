//! Short load runs against the in-process service

mod common;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use qa_harness::load::{LoadGenerator, LoadTask};
use qa_harness::{run_case, Account, HarnessError, LoadRun};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_short_run_stays_within_budget() {
    let server = common::start_service().await;
    let mut config = common::config_for(&server);
    config.load.users = 2;
    config.load.duration_secs = 2;
    config.load.pacing_min_ms = 10;
    config.load.pacing_max_ms = 50;
    config.load.p95_limit_ms = Some(2_000);
    config.load.seed = Some(1);

    let account = config.target.accounts[0].clone();
    let generator = LoadGenerator::new(config.load.clone(), &server.base_url(), account).unwrap();
    let report = generator.run(CancellationToken::new()).await.unwrap();

    assert!(report.total > 0);
    assert_eq!(report.peak_users, 2);
    assert!(report.tasks.contains_key(LoadTask::Login.name()));
    assert!(report.tasks.contains_key(LoadTask::Contact.name()));
    report.ensure_healthy().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_logins_count_as_failures_with_bodies() {
    let server = common::start_service().await;
    let mut config = common::config_for(&server);
    config.load.users = 1;
    config.load.duration_secs = 1;
    config.load.pacing_min_ms = 10;
    config.load.pacing_max_ms = 30;
    config.load.seed = Some(3);

    let generator = LoadGenerator::new(config.load.clone(), &server.base_url(), Account::new("admin", "wrongpw")).unwrap();
    let report = generator.run(CancellationToken::new()).await.unwrap();

    assert!(report.failed > 0);
    assert!(report.tasks[LoadTask::Login.name()].failures >= 1);
    let first = &report.sample_failures[0];
    assert_eq!(first.status, Some(401));
    assert!(first.detail.contains("Invalid credentials"), "{}", first.detail);
    assert!(matches!(report.ensure_healthy(), Err(HarnessError::LoadBudgetExceeded(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_run_stops_early() {
    let server = common::start_service().await;
    let mut config = common::config_for(&server);
    config.load.users = 1;
    config.load.duration_secs = 60;
    config.load.pacing_min_ms = 10;
    config.load.pacing_max_ms = 20;

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        stopper.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(15), run_case(&LoadRun { config, cancel }))
        .await
        .expect("load run honours cancellation");
    assert!(result.duration_ms < 15_000);
}
