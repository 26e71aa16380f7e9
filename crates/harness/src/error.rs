//! Error types for the QA harness

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which of the failure classes an error belongs to.
///
/// The classes decide the process exit code: verification failures (contract
/// or assertion) exit 1, everything that prevented a verdict exits 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The service broke its own declared contract.
    Contract,
    /// An observed value differs from the expected scenario outcome.
    Assertion,
    /// Target service or browser unreachable.
    Environment,
    /// A bounded wait ran out.
    Transient,
    /// Harness misconfiguration or missing inputs.
    Harness,
}

impl FailureKind {
    pub fn exit_code(self) -> i32 {
        match self {
            FailureKind::Contract | FailureKind::Assertion | FailureKind::Transient => 1,
            FailureKind::Environment | FailureKind::Harness => 2,
        }
    }
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Service at {url} not ready after {attempts} attempts")]
    ServiceUnavailable { url: String, attempts: usize },

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Page step '{step}' failed in '{run}': {error}")]
    PageStep { run: String, step: String, error: String },

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Contract violation in {operation}: {reason}")]
    ContractViolation { operation: String, reason: String },

    #[error("Scenario table drifted from contract: {0}")]
    ScenarioDrift(String),

    #[error("Assertion failed in '{case}': expected {expected}, observed {observed}")]
    AssertionFailed {
        case: String,
        expected: String,
        observed: String,
    },

    #[error("{failed} of {total} checks failed:\n{details}")]
    Failures {
        failed: usize,
        total: usize,
        details: String,
    },

    #[error("Load run unhealthy: {0}")]
    LoadBudgetExceeded(String),

    #[error("Screenshot mismatch: {name} differs by {diff_percent:.2}% (threshold: {threshold:.2}%) in region {region}")]
    ScreenshotMismatch {
        name: String,
        diff_percent: f64,
        threshold: f64,
        region: String,
    },

    #[error("Baseline not found: {path}. Review the captured image and re-run with --update-baselines to approve it")]
    BaselineNotFound { name: String, path: String },

    #[error("Visual regression: {0}")]
    VisualRegression(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl HarnessError {
    pub fn kind(&self) -> FailureKind {
        match self {
            HarnessError::ContractViolation { .. } => FailureKind::Contract,
            HarnessError::AssertionFailed { .. }
            | HarnessError::PageStep { .. }
            | HarnessError::Failures { .. }
            | HarnessError::LoadBudgetExceeded(_)
            | HarnessError::ScreenshotMismatch { .. }
            | HarnessError::VisualRegression(_) => FailureKind::Assertion,
            HarnessError::Timeout(_) => FailureKind::Transient,
            HarnessError::Setup(_)
            | HarnessError::ServiceUnavailable { .. }
            | HarnessError::PlaywrightNotFound
            | HarnessError::Playwright(_) => FailureKind::Environment,
            HarnessError::Http(e) if e.is_timeout() => FailureKind::Transient,
            HarnessError::Http(_) => FailureKind::Environment,
            HarnessError::Contract(_)
            | HarnessError::ScenarioDrift(_)
            | HarnessError::BaselineNotFound { .. }
            | HarnessError::Config(_)
            | HarnessError::Io(_)
            | HarnessError::Json(_)
            | HarnessError::Yaml(_)
            | HarnessError::Toml(_)
            | HarnessError::Image(_) => FailureKind::Harness,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
