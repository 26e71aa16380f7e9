//! Load generation with concurrent virtual users
//!
//! Every virtual user is its own tokio task with its own cookie-carrying HTTP
//! client. A user logs in once, then loops over weighted tasks with a random
//! pause between them until it is cancelled. The only state users share is
//! the [`LoadStats`] sink.
//!
//! ```text
//!  controller ──(target users per tick)──► spawn / cancel
//!      │                                        │
//!      ▼                                        ▼
//!  stages: (duration, users) ...         VU 1 .. VU n ──► LoadStats
//! ```

use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Account;
use crate::error::{HarnessError, HarnessResult};

const TICK: Duration = Duration::from_millis(100);
const MAX_SAMPLED_FAILURES: usize = 20;
const MAX_BODY_CHARS: usize = 300;

/// Stage of a load profile: ramp linearly to `users` over `duration_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub duration_secs: u64,
    pub users: usize,
}

impl Stage {
    pub const fn new(duration_secs: u64, users: usize) -> Self {
        Self { duration_secs, users }
    }
}

/// Named load shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadProfile {
    /// 20 users for two minutes
    Baseline,
    /// 10 users, a burst to 100, and recovery
    Spike,
    /// Step up to 300 users, then ramp down
    Stress,
    /// 20 users for twelve hours
    Soak,
}

impl LoadProfile {
    pub fn stages(self) -> Vec<Stage> {
        match self {
            LoadProfile::Baseline => vec![Stage::new(0, 20), Stage::new(120, 20)],
            LoadProfile::Spike => vec![
                Stage::new(10, 10),
                Stage::new(10, 100),
                Stage::new(10, 10),
                Stage::new(20, 10),
            ],
            LoadProfile::Stress => vec![
                Stage::new(60, 10),
                Stage::new(60, 50),
                Stage::new(60, 100),
                Stage::new(60, 200),
                Stage::new(60, 300),
                Stage::new(60, 0),
            ],
            LoadProfile::Soak => vec![Stage::new(0, 20), Stage::new(12 * 3600, 20)],
        }
    }
}

impl std::str::FromStr for LoadProfile {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "baseline" => Ok(LoadProfile::Baseline),
            "spike" => Ok(LoadProfile::Spike),
            "stress" => Ok(LoadProfile::Stress),
            "soak" => Ok(LoadProfile::Soak),
            other => Err(HarnessError::Config(format!("unknown load profile '{}'", other))),
        }
    }
}

/// Configuration for load runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Constant user count when no stages or profile are given
    pub users: usize,
    pub duration_secs: u64,
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
    /// Highest acceptable failed/total ratio
    pub error_budget: f64,
    /// Per-task p95 latency limit
    pub p95_limit_ms: Option<u64>,
    pub stages: Vec<Stage>,
    pub profile: Option<LoadProfile>,
    pub request_timeout_ms: u64,
    /// Seed for pacing and task choice; each user offsets it by its id
    pub seed: Option<u64>,
    pub contact: ContactPayload,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            users: 10,
            duration_secs: 30,
            pacing_min_ms: 200,
            pacing_max_ms: 1000,
            error_budget: 0.01,
            p95_limit_ms: Some(500),
            stages: Vec::new(),
            profile: None,
            request_timeout_ms: 10_000,
            seed: None,
            contact: ContactPayload::default(),
        }
    }
}

impl LoadConfig {
    /// The effective stages: profile, then explicit stages, then a constant
    /// `users` for `duration_secs`.
    pub fn plan(&self) -> Vec<Stage> {
        if let Some(profile) = self.profile {
            return profile.stages();
        }
        if !self.stages.is_empty() {
            return self.stages.clone();
        }
        vec![Stage::new(0, self.users), Stage::new(self.duration_secs, self.users)]
    }
}

/// Fixed contact submission every user sends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactPayload {
    pub name: String,
    pub email: String,
    pub message: String,
}

impl Default for ContactPayload {
    fn default() -> Self {
        Self {
            name: "Eddie".to_string(),
            email: "a@b.com".to_string(),
            message: "Hello from QA site!".to_string(),
        }
    }
}

/// Tasks a virtual user performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadTask {
    /// Once, when the user starts
    Login,
    Contact,
    Relogin,
}

impl LoadTask {
    /// Looping tasks and their relative weights
    pub const WEIGHTED: [(LoadTask, u32); 2] = [(LoadTask::Contact, 3), (LoadTask::Relogin, 1)];

    pub fn name(self) -> &'static str {
        match self {
            LoadTask::Login => "login",
            LoadTask::Contact => "contact",
            LoadTask::Relogin => "relogin",
        }
    }

    fn path(self) -> &'static str {
        match self {
            LoadTask::Login | LoadTask::Relogin => "/api/login",
            LoadTask::Contact => "/api/contact",
        }
    }
}

/// One failed request kept for the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadFailure {
    pub task: String,
    pub user: usize,
    pub status: Option<u16>,
    pub detail: String,
}

#[derive(Debug, Default)]
struct TaskStats {
    total: u64,
    failures: u64,
    latencies_ms: Vec<u64>,
    statuses: BTreeMap<u16, u64>,
}

/// Shared sink all virtual users record into
#[derive(Debug, Default)]
pub struct LoadStats {
    tasks: Mutex<HashMap<LoadTask, TaskStats>>,
    failures: Mutex<Vec<LoadFailure>>,
}

impl LoadStats {
    pub fn record(&self, task: LoadTask, latency: Duration, status: Option<u16>, failure: Option<LoadFailure>) {
        {
            let mut tasks = self.tasks.lock();
            let stats = tasks.entry(task).or_default();
            stats.total += 1;
            stats.latencies_ms.push(latency.as_millis() as u64);
            if let Some(status) = status {
                *stats.statuses.entry(status).or_insert(0) += 1;
            }
            if failure.is_some() {
                stats.failures += 1;
            }
        }

        if let Some(failure) = failure {
            let mut failures = self.failures.lock();
            if failures.len() < MAX_SAMPLED_FAILURES {
                failures.push(failure);
            }
        }
    }

    fn summarize(&self) -> (BTreeMap<String, TaskReport>, Vec<LoadFailure>) {
        let mut tasks = self.tasks.lock();
        let reports = tasks
            .iter_mut()
            .map(|(task, stats)| {
                stats.latencies_ms.sort_unstable();
                (
                    task.name().to_string(),
                    TaskReport {
                        total: stats.total,
                        failures: stats.failures,
                        p50_ms: percentile(&stats.latencies_ms, 50.0),
                        p95_ms: percentile(&stats.latencies_ms, 95.0),
                        max_ms: stats.latencies_ms.last().copied().unwrap_or(0),
                        statuses: stats.statuses.clone(),
                    },
                )
            })
            .collect();
        (reports, self.failures.lock().clone())
    }
}

/// Nearest-rank percentile over sorted samples
pub fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub total: u64,
    pub failures: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
    pub statuses: BTreeMap<u16, u64>,
}

/// Outcome of a load run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub duration_ms: u64,
    pub peak_users: usize,
    pub total: u64,
    pub failed: u64,
    pub error_ratio: f64,
    pub error_budget: f64,
    pub p95_limit_ms: Option<u64>,
    pub tasks: BTreeMap<String, TaskReport>,
    /// First failures, with response bodies
    pub sample_failures: Vec<LoadFailure>,
}

impl LoadReport {
    /// Every reason the run counts as unhealthy.
    pub fn violations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.total == 0 {
            out.push("no requests completed".to_string());
        }
        if self.error_ratio > self.error_budget {
            out.push(format!(
                "error ratio {:.4} ({} of {}) exceeds budget {:.4}",
                self.error_ratio, self.failed, self.total, self.error_budget
            ));
        }
        if let Some(limit) = self.p95_limit_ms {
            for (name, task) in &self.tasks {
                if task.p95_ms >= limit {
                    out.push(format!("{} p95 {}ms is not under {}ms", name, task.p95_ms, limit));
                }
            }
        }
        out
    }

    pub fn is_healthy(&self) -> bool {
        self.violations().is_empty()
    }

    pub fn ensure_healthy(&self) -> HarnessResult<()> {
        let violations = self.violations();
        if violations.is_empty() {
            return Ok(());
        }
        let mut detail = violations.join("; ");
        if let Some(first) = self.sample_failures.first() {
            detail.push_str(&format!(
                "; first failure: {} {:?} {}",
                first.task, first.status, first.detail
            ));
        }
        Err(HarnessError::LoadBudgetExceeded(detail))
    }
}

/// Runs a load plan against the service
pub struct LoadGenerator {
    config: LoadConfig,
    base_url: String,
    account: Account,
}

impl LoadGenerator {
    pub fn new(config: LoadConfig, base_url: impl Into<String>, account: Account) -> HarnessResult<Self> {
        if config.pacing_min_ms > config.pacing_max_ms {
            return Err(HarnessError::Config("load pacing min exceeds max".into()));
        }
        Ok(Self {
            config,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            account,
        })
    }

    /// Run the plan to completion, or until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> HarnessResult<LoadReport> {
        let plan = self.config.plan();
        let total_secs: u64 = plan.iter().map(|s| s.duration_secs).sum();
        info!(
            "Load run: {} stage(s), {}s, pacing {}..={}ms",
            plan.len(),
            total_secs,
            self.config.pacing_min_ms,
            self.config.pacing_max_ms
        );

        let stats = Arc::new(LoadStats::default());
        let root = cancel.child_token();
        let mut users: Vec<(CancellationToken, JoinHandle<()>)> = Vec::new();
        let mut next_id = 0usize;
        let mut peak = 0usize;
        let start = Instant::now();

        loop {
            let Some(target) = target_users(&plan, start.elapsed()) else {
                break;
            };

            while users.len() < target {
                let token = root.child_token();
                let user = self.virtual_user(next_id, token.clone(), stats.clone())?;
                users.push((token, tokio::spawn(user)));
                next_id += 1;
            }
            while users.len() > target {
                if let Some((token, handle)) = users.pop() {
                    token.cancel();
                    drop(handle);
                }
            }
            peak = peak.max(users.len());

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Load run cancelled after {:?}", start.elapsed());
                    break;
                }
                _ = tokio::time::sleep(TICK) => {}
            }
        }

        root.cancel();
        let grace = Duration::from_millis(self.config.request_timeout_ms) + Duration::from_secs(1);
        let remaining = users.len();
        let stopping = futures::future::join_all(users.into_iter().map(|(_, handle)| handle));
        if tokio::time::timeout(grace, stopping).await.is_err() {
            warn!("{} virtual user(s) did not stop within {:?}", remaining, grace);
        }

        let (tasks, sample_failures) = stats.summarize();
        let total: u64 = tasks.values().map(|t| t.total).sum();
        let failed: u64 = tasks.values().map(|t| t.failures).sum();
        let report = LoadReport {
            duration_ms: start.elapsed().as_millis() as u64,
            peak_users: peak,
            total,
            failed,
            error_ratio: if total == 0 { 0.0 } else { failed as f64 / total as f64 },
            error_budget: self.config.error_budget,
            p95_limit_ms: self.config.p95_limit_ms,
            tasks,
            sample_failures,
        };
        info!(
            "Load run finished: {} request(s), {} failed, peak {} user(s)",
            report.total, report.failed, report.peak_users
        );
        Ok(report)
    }

    fn virtual_user(
        &self,
        id: usize,
        cancel: CancellationToken,
        stats: Arc<LoadStats>,
    ) -> HarnessResult<impl std::future::Future<Output = ()> + Send + 'static> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .build()?;

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_entropy(),
        };
        let weights = WeightedIndex::new(LoadTask::WEIGHTED.iter().map(|(_, w)| *w))
            .map_err(|e| HarnessError::Config(format!("task weights: {}", e)))?;
        let pacing = self.config.pacing_min_ms..=self.config.pacing_max_ms;
        let session = UserSession {
            id,
            client,
            base_url: self.base_url.clone(),
            login: json!({ "username": self.account.username, "password": self.account.password }),
            contact: json!({
                "name": self.config.contact.name,
                "email": self.config.contact.email,
                "message": self.config.contact.message,
            }),
            stats,
        };

        Ok(async move {
            debug!("VU {} starting", id);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = session.perform(LoadTask::Login) => {}
            }

            loop {
                let pause = Duration::from_millis(rng.gen_range(pacing.clone()));
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }

                let task = LoadTask::WEIGHTED[weights.sample(&mut rng)].0;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = session.perform(task) => {}
                }
            }
            debug!("VU {} stopped", id);
        })
    }
}

/// State owned by a single virtual user
struct UserSession {
    id: usize,
    client: reqwest::Client,
    base_url: String,
    login: Value,
    contact: Value,
    stats: Arc<LoadStats>,
}

impl UserSession {
    async fn perform(&self, task: LoadTask) {
        let body = match task {
            LoadTask::Login | LoadTask::Relogin => &self.login,
            LoadTask::Contact => &self.contact,
        };
        let url = format!("{}{}", self.base_url, task.path());

        let started = Instant::now();
        let result = self.client.post(&url).json(body).send().await;

        let (status, failure) = match result {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    (Some(status.as_u16()), None)
                } else {
                    let text = resp.text().await.unwrap_or_default();
                    (
                        Some(status.as_u16()),
                        Some(self.failure(task, Some(status.as_u16()), text)),
                    )
                }
            }
            Err(e) => (None, Some(self.failure(task, None, e.to_string()))),
        };

        self.stats.record(task, started.elapsed(), status, failure);
    }

    fn failure(&self, task: LoadTask, status: Option<u16>, detail: String) -> LoadFailure {
        LoadFailure {
            task: task.name().to_string(),
            user: self.id,
            status,
            detail: detail.chars().take(MAX_BODY_CHARS).collect(),
        }
    }
}

/// Target user count at `elapsed`, or `None` once the plan is over.
pub fn target_users(plan: &[Stage], elapsed: Duration) -> Option<usize> {
    let mut stage_start = Duration::ZERO;
    let mut from = 0usize;

    for stage in plan {
        let length = Duration::from_secs(stage.duration_secs);
        let stage_end = stage_start + length;
        if elapsed < stage_end {
            let frac = (elapsed - stage_start).as_secs_f64() / length.as_secs_f64();
            let users = from as f64 + (stage.users as f64 - from as f64) * frac;
            return Some(users.round() as usize);
        }
        stage_start = stage_end;
        from = stage.users;
    }
    None
}
