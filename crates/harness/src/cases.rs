//! The harness components as lifecycle cases

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::contract::Contract;
use crate::error::{HarnessError, HarnessResult};
use crate::functional::{FunctionalReport, FunctionalVerifier};
use crate::fuzz::{ContractFuzzer, FuzzReport};
use crate::load::{LoadGenerator, LoadReport};
use crate::playwright::{check_dialog, PlaywrightHandle, UiObservation};
use crate::runner::HarnessCase;
use crate::scenario::{OutcomeClass, Scenario, ScenarioTable};
use crate::server::ReadinessProbe;
use crate::visual::{VisualDiff, VisualTester};

async fn api_ready(config: &HarnessConfig) -> HarnessResult<()> {
    ReadinessProbe::health(
        &config.target.base_url,
        Duration::from_secs(config.target.readiness_timeout_secs),
    )
    .wait_until_ready()
    .await
}

async fn frontend_ready(config: &HarnessConfig) -> HarnessResult<PlaywrightHandle> {
    let url = format!(
        "{}/login.html",
        config.playwright.base_url.trim_end_matches('/')
    );
    ReadinessProbe::page(url, Duration::from_secs(config.target.readiness_timeout_secs))
        .wait_until_ready()
        .await?;

    let handle = PlaywrightHandle::new(config.playwright.clone())?;
    handle.ensure_available().await?;
    Ok(handle)
}

fn http_client(config: &HarnessConfig) -> HarnessResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_millis(config.target.request_timeout_ms))
        .build()?)
}

/// Scenario tables checked against a freshly fetched contract
async fn checked_tables(config: &HarnessConfig, client: &reqwest::Client) -> HarnessResult<(Contract, Vec<ScenarioTable>)> {
    let contract = Contract::fetch(client, &config.target.openapi_url()).await?;
    let tables = ScenarioTable::load_or_builtin(config.scenarios_dir.as_deref(), &config.target.accounts)?;
    for table in &tables {
        table.check_against(&contract)?;
    }
    Ok((contract, tables))
}

fn to_details<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

/// Functional Verifier run
pub struct FunctionalRun {
    pub config: HarnessConfig,
}

pub struct FunctionalContext {
    verifier: FunctionalVerifier,
    contract: Contract,
    tables: Vec<ScenarioTable>,
}

#[async_trait]
impl HarnessCase for FunctionalRun {
    type Context = FunctionalContext;
    type Observation = FunctionalReport;

    fn name(&self) -> String {
        "functional".into()
    }

    async fn setup(&self) -> HarnessResult<FunctionalContext> {
        api_ready(&self.config).await?;
        let verifier = FunctionalVerifier::new(self.config.target.clone())?;
        let (contract, tables) = checked_tables(&self.config, verifier.client()).await?;
        Ok(FunctionalContext {
            verifier,
            contract,
            tables,
        })
    }

    async fn execute(&self, ctx: &mut FunctionalContext) -> HarnessResult<FunctionalReport> {
        ctx.verifier.run(&ctx.contract, &ctx.tables).await
    }

    fn describe(&self, obs: &FunctionalReport) -> Value {
        to_details(obs)
    }

    async fn verify(&self, _ctx: &FunctionalContext, obs: &FunctionalReport) -> HarnessResult<()> {
        obs.ensure_passed()
    }

    async fn teardown(&self, _ctx: FunctionalContext) -> HarnessResult<()> {
        Ok(())
    }
}

/// One driven scenario row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiOutcome {
    pub table: String,
    pub scenario: String,
    pub expected: OutcomeClass,
    pub dialogs: Vec<String>,
    pub passed: bool,
    pub reason: Option<String>,
    pub failure_screenshot: Option<PathBuf>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl UiOutcome {
    /// Judge one driven row: a failed page step or a wrong dialog fails it.
    pub fn judge(table: &ScenarioTable, scenario: &Scenario, obs: UiObservation) -> Self {
        let verdict = match obs.page_failure(&scenario.description) {
            Some(e) => Err(e),
            None => check_dialog(table.form, scenario, &obs),
        };
        UiOutcome {
            table: table.name.clone(),
            scenario: scenario.description.clone(),
            expected: scenario.expected,
            dialogs: obs.dialogs,
            passed: verdict.is_ok(),
            reason: verdict.err().map(|e| e.to_string()),
            failure_screenshot: obs.failure_screenshot,
            notes: obs.notes,
        }
    }
}

fn ensure_rows_passed(outcomes: &[UiOutcome]) -> HarnessResult<()> {
    let failed: Vec<_> = outcomes.iter().filter(|o| !o.passed).collect();
    if failed.is_empty() {
        return Ok(());
    }
    Err(HarnessError::Failures {
        failed: failed.len(),
        total: outcomes.len(),
        details: failed
            .iter()
            .map(|o| format!("  - {} / {}: {}", o.table, o.scenario, o.reason.as_deref().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

/// UI Driver run: every scenario row through the real pages
pub struct UiRun {
    pub config: HarnessConfig,
}

pub struct UiContext {
    handle: PlaywrightHandle,
    tables: Vec<ScenarioTable>,
}

#[async_trait]
impl HarnessCase for UiRun {
    type Context = UiContext;
    type Observation = Vec<UiOutcome>;

    fn name(&self) -> String {
        "ui".into()
    }

    async fn setup(&self) -> HarnessResult<UiContext> {
        api_ready(&self.config).await?;
        let handle = frontend_ready(&self.config).await?;
        let (_, tables) = checked_tables(&self.config, &http_client(&self.config)?).await?;
        Ok(UiContext { handle, tables })
    }

    async fn execute(&self, ctx: &mut UiContext) -> HarnessResult<Vec<UiOutcome>> {
        let mut outcomes = Vec::new();

        for table in &ctx.tables {
            for scenario in &table.scenarios {
                let obs = ctx.handle.submit_scenario(table.form, scenario).await?;
                let outcome = UiOutcome::judge(table, scenario, obs);
                if !outcome.passed {
                    warn!("{}: {}", outcome.scenario, outcome.reason.as_deref().unwrap_or_default());
                }
                outcomes.push(outcome);
            }
        }

        Ok(outcomes)
    }

    fn describe(&self, obs: &Vec<UiOutcome>) -> Value {
        to_details(obs)
    }

    async fn verify(&self, _ctx: &UiContext, obs: &Vec<UiOutcome>) -> HarnessResult<()> {
        ensure_rows_passed(obs)
    }

    async fn teardown(&self, _ctx: UiContext) -> HarnessResult<()> {
        Ok(())
    }
}

/// Visual Verifier run
pub struct VisualRun {
    pub config: HarnessConfig,
}

pub struct VisualContext {
    handle: PlaywrightHandle,
    tester: VisualTester,
}

#[async_trait]
impl HarnessCase for VisualRun {
    type Context = VisualContext;
    type Observation = Vec<VisualDiff>;

    fn name(&self) -> String {
        "visual".into()
    }

    async fn setup(&self) -> HarnessResult<VisualContext> {
        if self.config.visual.pages.is_empty() {
            return Err(HarnessError::Config("visual.pages is empty".into()));
        }
        let handle = frontend_ready(&self.config).await?;
        let tester = VisualTester::new(self.config.visual.clone())?;
        Ok(VisualContext { handle, tester })
    }

    async fn execute(&self, ctx: &mut VisualContext) -> HarnessResult<Vec<VisualDiff>> {
        let mut diffs = Vec::new();
        for page in &self.config.visual.pages {
            let path = ctx
                .handle
                .capture_page(
                    page.form,
                    &page.title_pattern,
                    &page.capture_name(),
                    page.selector.as_deref(),
                )
                .await?;
            diffs.push(ctx.tester.compare(&page.key(), &path)?);
        }
        Ok(diffs)
    }

    fn describe(&self, obs: &Vec<VisualDiff>) -> Value {
        to_details(obs)
    }

    async fn verify(&self, _ctx: &VisualContext, obs: &Vec<VisualDiff>) -> HarnessResult<()> {
        for diff in obs {
            if diff.baseline_written {
                info!("Baseline '{}' written; review it before committing", diff.name);
            }
            diff.ensure_matches()?;
        }
        Ok(())
    }

    async fn teardown(&self, _ctx: VisualContext) -> HarnessResult<()> {
        Ok(())
    }
}

/// Load Generator run
pub struct LoadRun {
    pub config: HarnessConfig,
    pub cancel: CancellationToken,
}

pub struct LoadContext {
    generator: LoadGenerator,
    cancel: CancellationToken,
}

#[async_trait]
impl HarnessCase for LoadRun {
    type Context = LoadContext;
    type Observation = LoadReport;

    fn name(&self) -> String {
        "load".into()
    }

    async fn setup(&self) -> HarnessResult<LoadContext> {
        api_ready(&self.config).await?;
        let account = self
            .config
            .target
            .accounts
            .first()
            .cloned()
            .ok_or_else(|| HarnessError::Config("load needs at least one account".into()))?;
        let generator = LoadGenerator::new(self.config.load.clone(), &self.config.target.base_url, account)?;
        Ok(LoadContext {
            generator,
            cancel: self.cancel.child_token(),
        })
    }

    async fn execute(&self, ctx: &mut LoadContext) -> HarnessResult<LoadReport> {
        ctx.generator.run(ctx.cancel.clone()).await
    }

    fn describe(&self, obs: &LoadReport) -> Value {
        to_details(obs)
    }

    async fn verify(&self, _ctx: &LoadContext, obs: &LoadReport) -> HarnessResult<()> {
        obs.ensure_healthy()
    }

    async fn teardown(&self, ctx: LoadContext) -> HarnessResult<()> {
        ctx.cancel.cancel();
        Ok(())
    }
}

/// Contract Fuzzer run
pub struct FuzzRun {
    pub config: HarnessConfig,
}

#[async_trait]
impl HarnessCase for FuzzRun {
    type Context = ContractFuzzer;
    type Observation = FuzzReport;

    fn name(&self) -> String {
        "fuzz".into()
    }

    async fn setup(&self) -> HarnessResult<ContractFuzzer> {
        api_ready(&self.config).await?;
        ContractFuzzer::new(
            self.config.fuzz.clone(),
            &self.config.target.base_url,
            self.config.target.openapi_url(),
        )
    }

    async fn execute(&self, fuzzer: &mut ContractFuzzer) -> HarnessResult<FuzzReport> {
        fuzzer.run().await
    }

    fn describe(&self, obs: &FuzzReport) -> Value {
        to_details(obs)
    }

    async fn verify(&self, _fuzzer: &ContractFuzzer, obs: &FuzzReport) -> HarnessResult<()> {
        obs.ensure_conformant()
    }

    async fn teardown(&self, _fuzzer: ContractFuzzer) -> HarnessResult<()> {
        Ok(())
    }
}
