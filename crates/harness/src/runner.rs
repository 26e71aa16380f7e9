//! Lifecycle runner shared by every component
//!
//! A case moves through `SETUP → EXECUTE → VERIFY → TEARDOWN` strictly in
//! order. Execution never starts unless setup succeeded, and teardown runs
//! whenever setup succeeded, whatever happened afterwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{FailureKind, HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Execute,
    Verify,
    Teardown,
}

/// One component run expressed as the four lifecycle phases
#[async_trait]
pub trait HarnessCase: Send + Sync {
    /// Resources acquired in setup and released in teardown
    type Context: Send + Sync;
    /// What execute observed
    type Observation: Send + Sync;

    fn name(&self) -> String;

    async fn setup(&self) -> HarnessResult<Self::Context>;

    async fn execute(&self, ctx: &mut Self::Context) -> HarnessResult<Self::Observation>;

    /// Report-friendly rendering of an observation
    fn describe(&self, obs: &Self::Observation) -> Value;

    async fn verify(&self, ctx: &Self::Context, obs: &Self::Observation) -> HarnessResult<()>;

    async fn teardown(&self, ctx: Self::Context) -> HarnessResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub duration_ms: u64,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseFailure {
    pub phase: Phase,
    pub kind: FailureKind,
    pub message: String,
}

/// Result of running a single case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub phases: Vec<PhaseRecord>,
    pub failure: Option<CaseFailure>,
    #[serde(default)]
    pub details: Value,
}

impl CaseResult {
    pub fn exit_code(&self) -> i32 {
        self.failure.as_ref().map(|f| f.kind.exit_code()).unwrap_or(0)
    }
}

struct PhaseLog {
    records: Vec<PhaseRecord>,
}

impl PhaseLog {
    fn record<T>(&mut self, phase: Phase, started: Instant, result: &HarnessResult<T>) {
        let ok = result.is_ok();
        debug!("{:?} {}", phase, if ok { "ok" } else { "failed" });
        self.records.push(PhaseRecord {
            phase,
            duration_ms: started.elapsed().as_millis() as u64,
            ok,
        });
    }
}

fn failure(phase: Phase, e: &HarnessError) -> CaseFailure {
    CaseFailure {
        phase,
        kind: e.kind(),
        message: e.to_string(),
    }
}

/// Run `case` through its lifecycle.
pub async fn run_case<C: HarnessCase>(case: &C) -> CaseResult {
    let name = case.name();
    let start = Instant::now();
    let mut log = PhaseLog { records: Vec::new() };
    info!("▶ {}", name);

    let t = Instant::now();
    let setup = case.setup().await;
    log.record(Phase::Setup, t, &setup);
    let mut ctx = match setup {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("✗ {} setup: {}", name, e);
            return CaseResult {
                name,
                passed: false,
                duration_ms: start.elapsed().as_millis() as u64,
                phases: log.records,
                failure: Some(failure(Phase::Setup, &e)),
                details: Value::Null,
            };
        }
    };

    let mut details = Value::Null;
    let t = Instant::now();
    let executed = case.execute(&mut ctx).await;
    log.record(Phase::Execute, t, &executed);
    let mut outcome = match executed {
        Ok(obs) => {
            details = case.describe(&obs);
            let t = Instant::now();
            let verified = case.verify(&ctx, &obs).await;
            log.record(Phase::Verify, t, &verified);
            verified.map_err(|e| failure(Phase::Verify, &e))
        }
        Err(e) => Err(failure(Phase::Execute, &e)),
    };

    let t = Instant::now();
    let torn_down = case.teardown(ctx).await;
    log.record(Phase::Teardown, t, &torn_down);
    if let Err(e) = torn_down {
        warn!("{} teardown: {}", name, e);
        if outcome.is_ok() {
            outcome = Err(failure(Phase::Teardown, &e));
        }
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    match &outcome {
        Ok(()) => info!("✓ {} ({} ms)", name, duration_ms),
        Err(f) => error!("✗ {} [{:?}] {}", name, f.phase, f.message),
    }

    CaseResult {
        name,
        passed: outcome.is_ok(),
        duration_ms,
        phases: log.records,
        failure: outcome.err(),
        details,
    }
}

/// Result of running all cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub cases: Vec<CaseResult>,
}

impl SuiteReport {
    pub fn new(started_at: DateTime<Utc>, cases: Vec<CaseResult>) -> Self {
        let passed = cases.iter().filter(|c| c.passed).count();
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            duration_ms: (Utc::now() - started_at).num_milliseconds().max(0) as u64,
            total: cases.len(),
            passed,
            failed: cases.len() - passed,
            cases,
        }
    }

    /// 0 when everything passed; an environment or harness failure anywhere
    /// outranks verification failures.
    pub fn exit_code(&self) -> i32 {
        self.cases.iter().map(CaseResult::exit_code).max().unwrap_or(0)
    }

    /// Write results to `{dir}/qa-report.json`
    pub fn write_results(&self, dir: &Path) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("qa-report.json");
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("Results written to: {}", path.display());
        Ok(path)
    }

    pub fn log_summary(&self) {
        info!(
            "Results: {} passed, {} failed ({} ms)",
            self.passed, self.failed, self.duration_ms
        );
        for case in self.cases.iter().filter(|c| !c.passed) {
            if let Some(f) = &case.failure {
                error!("  {} failed in {:?} ({:?}): {}", case.name, f.phase, f.kind, f.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Scripted case recording the phases it went through
    struct Scripted {
        fail_at: Option<Phase>,
        trail: Arc<Mutex<Vec<Phase>>>,
    }

    impl Scripted {
        fn new(fail_at: Option<Phase>) -> Self {
            Self {
                fail_at,
                trail: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn step(&self, phase: Phase) -> HarnessResult<()> {
            self.trail.lock().push(phase);
            if self.fail_at == Some(phase) {
                return Err(match phase {
                    Phase::Setup => HarnessError::ServiceUnavailable {
                        url: "http://127.0.0.1:9/health".into(),
                        attempts: 1,
                    },
                    Phase::Verify => HarnessError::AssertionFailed {
                        case: "scripted".into(),
                        expected: "200".into(),
                        observed: "500".into(),
                    },
                    _ => HarnessError::Timeout(format!("{:?}", phase)),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl HarnessCase for Scripted {
        type Context = ();
        type Observation = u16;

        fn name(&self) -> String {
            "scripted".into()
        }

        async fn setup(&self) -> HarnessResult<()> {
            self.step(Phase::Setup)
        }

        async fn execute(&self, _ctx: &mut ()) -> HarnessResult<u16> {
            self.step(Phase::Execute).map(|_| 200)
        }

        fn describe(&self, obs: &u16) -> Value {
            serde_json::json!({ "status": obs })
        }

        async fn verify(&self, _ctx: &(), _obs: &u16) -> HarnessResult<()> {
            self.step(Phase::Verify)
        }

        async fn teardown(&self, _ctx: ()) -> HarnessResult<()> {
            self.step(Phase::Teardown)
        }
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let case = Scripted::new(None);
        let result = run_case(&case).await;
        assert!(result.passed);
        assert_eq!(
            *case.trail.lock(),
            vec![Phase::Setup, Phase::Execute, Phase::Verify, Phase::Teardown]
        );
        assert_eq!(result.details["status"], 200);
        assert_eq!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_failed_setup_skips_everything_else() {
        let case = Scripted::new(Some(Phase::Setup));
        let result = run_case(&case).await;
        assert_eq!(*case.trail.lock(), vec![Phase::Setup]);
        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.phase, Phase::Setup);
        assert_eq!(result.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_teardown_runs_after_execute_failure() {
        let case = Scripted::new(Some(Phase::Execute));
        let result = run_case(&case).await;
        assert_eq!(*case.trail.lock(), vec![Phase::Setup, Phase::Execute, Phase::Teardown]);
        assert_eq!(result.failure.unwrap().phase, Phase::Execute);
    }

    #[tokio::test]
    async fn test_teardown_runs_after_verify_failure() {
        let case = Scripted::new(Some(Phase::Verify));
        let result = run_case(&case).await;
        assert_eq!(case.trail.lock().last(), Some(&Phase::Teardown));
        assert_eq!(result.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_teardown_failure_fails_a_passing_case() {
        let case = Scripted::new(Some(Phase::Teardown));
        let result = run_case(&case).await;
        assert!(!result.passed);
        assert_eq!(result.failure.unwrap().phase, Phase::Teardown);
    }

    #[tokio::test]
    async fn test_suite_exit_code_prefers_environment_failures() {
        let verify_fail = run_case(&Scripted::new(Some(Phase::Verify))).await;
        let setup_fail = run_case(&Scripted::new(Some(Phase::Setup))).await;
        let ok = run_case(&Scripted::new(None)).await;

        let suite = SuiteReport::new(Utc::now(), vec![ok.clone(), verify_fail]);
        assert_eq!(suite.exit_code(), 1);
        let suite = SuiteReport::new(Utc::now(), vec![ok, setup_fail]);
        assert_eq!(suite.exit_code(), 2);
        assert_eq!(suite.failed, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = suite.write_results(dir.path()).unwrap();
        let written: SuiteReport = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written.run_id, suite.run_id);
    }
}
