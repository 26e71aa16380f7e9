//! Functional, fuzz and lifecycle checks against the in-process service

mod common;

use serde_json::json;
use std::time::Duration;

use qa_harness::functional::FunctionalVerifier;
use qa_harness::fuzz::ContractFuzzer;
use qa_harness::runner::Phase;
use qa_harness::server::ReadinessProbe;
use qa_harness::{
    run_case, Contract, FormTarget, FunctionalRun, FuzzRun, HarnessError, OutcomeClass, Scenario, ScenarioTable,
    SuiteReport,
};

async fn contract(verifier: &FunctionalVerifier, url: &str) -> Contract {
    Contract::fetch(verifier.client(), url).await.unwrap()
}

#[tokio::test]
async fn test_readiness_against_live_service() {
    let server = common::start_service().await;
    ReadinessProbe::health(&server.base_url(), Duration::from_secs(2))
        .wait_until_ready()
        .await
        .unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_readiness_gives_up_on_dead_port() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let err = ReadinessProbe::health(&format!("http://{}", addr), Duration::from_millis(600))
        .with_interval(Duration::from_millis(100))
        .wait_until_ready()
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::ServiceUnavailable { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_builtin_tables_all_pass() {
    let server = common::start_service().await;
    let config = common::config_for(&server);
    let verifier = FunctionalVerifier::new(config.target.clone()).unwrap();
    let contract = contract(&verifier, &config.target.openapi_url()).await;

    let tables = ScenarioTable::builtin(&config.target.accounts);
    let report = verifier.run(&contract, &tables).await.unwrap();

    for failed in report.failed() {
        eprintln!("{}: {:?}", failed.case, failed.reasons);
    }
    report.ensure_passed().unwrap();
    let rows: usize = tables.iter().map(|t| t.scenarios.len()).sum();
    assert_eq!(report.results.len(), rows + 2);
}

#[tokio::test]
async fn test_valid_login_returns_token() {
    let server = common::start_service().await;
    let config = common::config_for(&server);
    let verifier = FunctionalVerifier::new(config.target.clone()).unwrap();
    let contract = contract(&verifier, &config.target.openapi_url()).await;
    let op = contract.operation("POST", "/api/login").unwrap();

    let scenario = Scenario::new(
        "admin logs in",
        &[("username", "admin"), ("password", "1234")],
        OutcomeClass::Success,
    );
    let result = verifier.verify_scenario(op, &scenario).await.unwrap();
    assert!(result.passed, "{:?}", result.reasons);
    assert_eq!(result.status, 200);
    assert!(result.body["access_token"].as_str().is_some_and(|t| !t.is_empty()));
    assert_eq!(result.body["token_type"], "bearer");
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let server = common::start_service().await;
    let config = common::config_for(&server);
    let verifier = FunctionalVerifier::new(config.target.clone()).unwrap();
    let contract = contract(&verifier, &config.target.openapi_url()).await;
    let op = contract.operation("POST", "/api/login").unwrap();

    let scenario = Scenario::new(
        "wrong password",
        &[("username", "admin"), ("password", "wrongpass")],
        OutcomeClass::AuthFailure,
    );
    let result = verifier.verify_scenario(op, &scenario).await.unwrap();
    assert!(result.passed, "{:?}", result.reasons);
    assert_eq!(result.status, 401);
    assert!(result.body.get("detail").is_some());
}

#[tokio::test]
async fn test_contact_rows() {
    let server = common::start_service().await;
    let config = common::config_for(&server);
    let verifier = FunctionalVerifier::new(config.target.clone()).unwrap();
    let contract = contract(&verifier, &config.target.openapi_url()).await;
    let op = contract
        .operation(FormTarget::Contact.method(), FormTarget::Contact.path())
        .unwrap();

    let ok = Scenario::new(
        "short greeting",
        &[("name", "Eddie"), ("email", "eddie@mail.com"), ("message", "Hi")],
        OutcomeClass::Success,
    );
    let result = verifier.verify_scenario(op, &ok).await.unwrap();
    assert!(result.passed, "{:?}", result.reasons);
    assert_eq!(result.status, 200);

    let bad = Scenario::new(
        "bad email",
        &[("name", "Eddie"), ("email", "not-an-email"), ("message", "Hello there")],
        OutcomeClass::ValidationFailure,
    );
    let result = verifier.verify_scenario(op, &bad).await.unwrap();
    assert!(result.passed, "{:?}", result.reasons);
    assert_eq!(result.status, 422);

    let repeated = verifier
        .check_idempotence(op, &json!({ "name": "Eddie", "email": "eddie@mail.com", "message": "Hi" }))
        .await
        .unwrap();
    assert!(repeated.passed, "{:?}", repeated.reasons);
}

#[tokio::test]
async fn test_mislabelled_row_fails() {
    let server = common::start_service().await;
    let config = common::config_for(&server);
    let verifier = FunctionalVerifier::new(config.target.clone()).unwrap();
    let contract = contract(&verifier, &config.target.openapi_url()).await;
    let op = contract.operation("POST", "/api/login").unwrap();

    let scenario = Scenario::new(
        "expects success with a bad password",
        &[("username", "admin"), ("password", "nope")],
        OutcomeClass::Success,
    );
    let result = verifier.verify_scenario(op, &scenario).await.unwrap();
    assert!(!result.passed);
    assert!(result.reasons[0].contains("observed 401"));
}

#[tokio::test]
async fn test_fuzz_finds_no_violations() {
    let server = common::start_service().await;
    let config = common::config_for(&server);
    let fuzzer = ContractFuzzer::new(config.fuzz.clone(), &config.target.base_url, config.target.openapi_url()).unwrap();

    let report = fuzzer.run().await.unwrap();
    for v in &report.violations {
        eprintln!("{} {}: {}", v.operation, v.case, v.reason);
    }
    report.ensure_conformant().unwrap();
    assert!(report.operations.len() >= 3);
    assert!(report.operations.iter().all(|op| op.examples >= 10));
    assert_eq!(report.seed, 7);
}

#[tokio::test]
async fn test_functional_and_fuzz_cases_pass() {
    let server = common::start_service().await;
    let config = common::config_for(&server);

    let functional = run_case(&FunctionalRun { config: config.clone() }).await;
    let fuzz = run_case(&FuzzRun { config: config.clone() }).await;
    assert!(functional.passed, "{:?}", functional.failure);
    assert!(fuzz.passed, "{:?}", fuzz.failure);
    assert_eq!(functional.phases.len(), 4);

    let suite = SuiteReport::new(chrono::Utc::now(), vec![functional, fuzz]);
    assert_eq!(suite.exit_code(), 0);
}

#[tokio::test]
async fn test_case_fails_setup_when_service_is_down() {
    let server = common::start_service().await;
    let mut config = common::config_for(&server);
    server.shutdown().await.unwrap();
    config.target.readiness_timeout_secs = 1;

    let result = run_case(&FunctionalRun { config }).await;
    assert!(!result.passed);
    let failure = result.failure.as_ref().unwrap();
    assert_eq!(failure.phase, Phase::Setup);
    assert_eq!(result.phases.len(), 1);
    assert_eq!(result.exit_code(), 2);
}
