//! Harness configuration
//!
//! Layered the same way for every component: built-in defaults suitable for
//! a local run, then an optional TOML file, then environment variables,
//! then CLI flags (applied by the binary).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, HarnessResult};
use crate::fuzz::FuzzConfig;
use crate::load::LoadConfig;
use crate::playwright::PlaywrightConfig;
use crate::visual::VisualConfig;

/// Complete harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Service under test
    pub target: TargetConfig,

    /// Contract fuzzing
    pub fuzz: FuzzConfig,

    /// Load generation
    pub load: LoadConfig,

    /// Browser automation
    pub playwright: PlaywrightConfig,

    /// Visual regression
    pub visual: VisualConfig,

    /// Directory for the JSON report
    pub output_dir: PathBuf,

    /// Optional directory of YAML scenario tables replacing the built-in ones
    pub scenarios_dir: Option<PathBuf>,
}

/// Where the service under test lives and how to reach it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL for functional, fuzz and load runs
    pub base_url: String,

    /// Contract location; defaults to `{base_url}/openapi.json`
    pub openapi_url: Option<String>,

    /// Accounts the service is expected to accept
    pub accounts: Vec<Account>,

    /// Per-request timeout
    pub request_timeout_ms: u64,

    /// How long to poll `/health` before giving up
    pub readiness_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            openapi_url: None,
            accounts: vec![
                Account::new("admin", "1234"),
                Account::new("testuser", "password123"),
            ],
            request_timeout_ms: 10_000,
            readiness_timeout_secs: 30,
        }
    }
}

impl TargetConfig {
    pub fn openapi_url(&self) -> String {
        self.openapi_url
            .clone()
            .unwrap_or_else(|| format!("{}/openapi.json", self.base_url.trim_end_matches('/')))
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// A username/password pair the service should accept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
}

impl Account {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse `user:pass,user:pass`.
    pub fn parse_list(list: &str) -> HarnessResult<Vec<Self>> {
        list.split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|entry| {
                entry
                    .split_once(':')
                    .filter(|(user, _)| !user.is_empty())
                    .map(|(user, pass)| Account::new(user, pass))
                    .ok_or_else(|| HarnessError::Config(format!("account '{}' is not user:pass", entry)))
            })
            .collect()
    }
}

impl HarnessConfig {
    /// Load configuration from file; a missing file yields the defaults.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> HarnessResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> HarnessResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BASE_URL") {
            self.target.base_url = v;
        }
        if let Some(v) = get("OPENAPI_URL") {
            self.target.openapi_url = Some(v);
        }
        if let Some(v) = get("FRONTEND_URL") {
            self.playwright.base_url = v;
        }
        if let Some(v) = get("QA_ACCOUNTS") {
            self.target.accounts = Account::parse_list(&v)?;
        }
        if let Some(v) = get("QA_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("FUZZ_EXAMPLES") {
            self.fuzz.max_examples = parse_env("FUZZ_EXAMPLES", &v)?;
        }
        if let Some(v) = get("FUZZ_SEED") {
            self.fuzz.seed = Some(parse_env("FUZZ_SEED", &v)?);
        }
        if let Some(v) = get("LOAD_USERS") {
            self.load.users = parse_env("LOAD_USERS", &v)?;
        }
        if let Some(v) = get("LOAD_DURATION_SECS") {
            self.load.duration_secs = parse_env("LOAD_DURATION_SECS", &v)?;
        }
        if let Some(v) = get("LOAD_PACING_MIN_MS") {
            self.load.pacing_min_ms = parse_env("LOAD_PACING_MIN_MS", &v)?;
        }
        if let Some(v) = get("LOAD_PACING_MAX_MS") {
            self.load.pacing_max_ms = parse_env("LOAD_PACING_MAX_MS", &v)?;
        }
        if let Some(v) = get("LOAD_ERROR_BUDGET") {
            self.load.error_budget = parse_env("LOAD_ERROR_BUDGET", &v)?;
        }
        if let Some(v) = get("VISUAL_THRESHOLD") {
            self.visual.threshold = parse_env("VISUAL_THRESHOLD", &v)?;
        }
        if let Some(v) = get("UPDATE_BASELINES") {
            self.visual.update_baselines = matches!(v.trim(), "1" | "true" | "yes");
        }

        Ok(())
    }

    /// Reject combinations no component could run with.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.fuzz.max_examples == 0 {
            return Err(HarnessError::Config("fuzz.max_examples must be at least 1".into()));
        }
        if self.load.users == 0 && self.load.stages.is_empty() && self.load.profile.is_none() {
            return Err(HarnessError::Config("load.users must be at least 1".into()));
        }
        if self.load.pacing_min_ms > self.load.pacing_max_ms {
            return Err(HarnessError::Config(format!(
                "load pacing min {}ms exceeds max {}ms",
                self.load.pacing_min_ms, self.load.pacing_max_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.load.error_budget) {
            return Err(HarnessError::Config(format!(
                "load.error_budget {} is outside 0.0..=1.0",
                self.load.error_budget
            )));
        }
        if !(0.0..=100.0).contains(&self.visual.threshold) {
            return Err(HarnessError::Config(format!(
                "visual.threshold {} is outside 0..=100 percent",
                self.visual.threshold
            )));
        }
        if self.target.request_timeout_ms == 0 {
            return Err(HarnessError::Config("target.request_timeout_ms must be bounded and non-zero".into()));
        }
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        if self.output_dir.as_os_str().is_empty() {
            PathBuf::from("test-results")
        } else {
            self.output_dir.clone()
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> HarnessResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| HarnessError::Config(format!("{}='{}': {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::LoadProfile;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_target_local_service() {
        let config = HarnessConfig::default();
        assert_eq!(config.target.openapi_url(), "http://127.0.0.1:8000/openapi.json");
        assert_eq!(config.fuzz.max_examples, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BASE_URL", "http://api.test:9000/"),
            ("FRONTEND_URL", "http://ui.test:8080"),
            ("FUZZ_EXAMPLES", "25"),
            ("LOAD_PACING_MIN_MS", "50"),
            ("LOAD_PACING_MAX_MS", "75"),
            ("QA_ACCOUNTS", "root:toor"),
            ("UPDATE_BASELINES", "1"),
            ("OPENAPI_URL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = HarnessConfig::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.target.url("/health"), "http://api.test:9000/health");
        assert_eq!(config.target.openapi_url(), "http://api.test:9000/openapi.json");
        assert_eq!(config.playwright.base_url, "http://ui.test:8080");
        assert_eq!(config.fuzz.max_examples, 25);
        assert_eq!(config.load.pacing_min_ms, 50);
        assert_eq!(config.target.accounts, vec![Account::new("root", "toor")]);
        assert!(config.visual.update_baselines);
    }

    #[test]
    fn test_bad_env_value_is_a_config_error() {
        let mut config = HarnessConfig::default();
        let err = config
            .apply_env_from(|k| (k == "LOAD_USERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_inverted_pacing() {
        let mut config = HarnessConfig::default();
        config.load.pacing_min_ms = 900;
        config.load.pacing_max_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_profile_stands_in_for_user_count() {
        let mut config = HarnessConfig::default();
        config.load.users = 0;
        assert!(config.validate().is_err());

        config.load.profile = Some(LoadProfile::Spike);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qa.toml");
        std::fs::write(
            &path,
            r#"
output_dir = "out"

[target]
base_url = "http://10.0.0.5:8000"

[fuzz]
max_examples = 40
seed = 7

[load]
users = 3
error_budget = 0.05
"#,
        )
        .unwrap();

        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.target.base_url, "http://10.0.0.5:8000");
        assert_eq!(config.target.accounts.len(), 2);
        assert_eq!(config.fuzz.seed, Some(7));
        assert_eq!(config.load.users, 3);
        assert_eq!(config.output_dir(), PathBuf::from("out"));
    }

    #[test]
    fn test_sample_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../qa-harness.toml");
        let config = HarnessConfig::load(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.visual.pages.len(), 2);
        assert_eq!(config.playwright.base_url, config.target.base_url);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = HarnessConfig::load(Path::new("/nonexistent/qa.toml")).unwrap();
        assert_eq!(config.target.base_url, "http://127.0.0.1:8000");
    }
}
