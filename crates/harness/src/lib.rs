//! QA Harness for the demo login/contact API
//!
//! This crate drives the service under test from five directions:
//! - Functional checks: direct requests with status, body and header assertions
//! - UI scenarios: Playwright driving the real login and contact pages
//! - Visual regression: screenshots compared against stored baselines
//! - Load generation: concurrent virtual users with latency and error budgets
//! - Contract fuzzing: schema-derived inputs checked against `/openapi.json`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    qa-harness (Rust)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run_case(case: impl HarnessCase) -> CaseResult             │
//! │    SETUP ─► EXECUTE ─► VERIFY ─► TEARDOWN                   │
//! │      │  ReadinessProbe (/health, frontend page)             │
//! │      │  Contract::fetch(/openapi.json)                      │
//! │      └─ ScenarioTable::check_against(contract)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FunctionalRun  ── FunctionalVerifier ── reqwest            │
//! │  UiRun          ── PlaywrightHandle   ── node + playwright  │
//! │  VisualRun      ── PlaywrightHandle + VisualTester (image)  │
//! │  LoadRun        ── LoadGenerator      ── tokio tasks        │
//! │  FuzzRun        ── ContractFuzzer     ── jsonschema         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SuiteReport ─► test-results/qa-report.json, exit code      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod cases;
pub mod config;
pub mod contract;
pub mod error;
pub mod functional;
pub mod fuzz;
pub mod load;
pub mod playwright;
pub mod runner;
pub mod scenario;
pub mod server;
pub mod steps;
pub mod visual;

pub use cases::{FunctionalRun, FuzzRun, LoadRun, UiRun, VisualRun};
pub use config::{Account, HarnessConfig, TargetConfig};
pub use contract::Contract;
pub use error::{FailureKind, HarnessError, HarnessResult};
pub use runner::{run_case, CaseResult, HarnessCase, SuiteReport};
pub use scenario::{FormTarget, OutcomeClass, Scenario, ScenarioTable};
