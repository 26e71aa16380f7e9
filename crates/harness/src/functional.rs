//! Functional verification: direct requests with status, body and header
//! assertions
//!
//! Every scenario row is submitted once to its form's operation. A row passes
//! when the observed status is declared for its outcome class, the body
//! matches the declared response schema, failure bodies carry `detail`, and
//! the security headers are present.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::contract::{Contract, Operation};
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{FormTarget, OutcomeClass, Scenario, ScenarioTable};

/// Headers every response must carry: name, expected value, exact match.
pub const SECURITY_HEADERS: &[(&str, &str, bool)] = &[
    ("x-content-type-options", "nosniff", true),
    ("cross-origin-opener-policy", "same-origin", true),
    ("cross-origin-embedder-policy", "require-corp", true),
    ("cross-origin-resource-policy", "same-origin", true),
    ("cache-control", "no-store", false),
];

/// Outcome of one check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub case: String,
    pub operation: String,
    pub expected: Option<OutcomeClass>,
    pub status: u16,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
    pub passed: bool,
    pub reasons: Vec<String>,
}

impl VerificationResult {
    fn judge(mut self, reasons: Vec<String>) -> Self {
        self.passed = reasons.is_empty();
        self.reasons = reasons;
        self
    }
}

/// All results of a functional run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionalReport {
    pub results: Vec<VerificationResult>,
}

impl FunctionalReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &VerificationResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn ensure_passed(&self) -> HarnessResult<()> {
        let failed: Vec<_> = self.failed().collect();
        if failed.is_empty() {
            return Ok(());
        }
        let details = failed
            .iter()
            .map(|r| format!("  - {} [{}]: {}", r.case, r.operation, r.reasons.join("; ")))
            .collect::<Vec<_>>()
            .join("\n");
        Err(HarnessError::Failures {
            failed: failed.len(),
            total: self.results.len(),
            details,
        })
    }
}

struct Observed {
    status: u16,
    content_type: Option<String>,
    headers: BTreeMap<String, String>,
    raw: Vec<u8>,
    body: Value,
}

pub struct FunctionalVerifier {
    client: reqwest::Client,
    target: TargetConfig,
}

impl FunctionalVerifier {
    pub fn new(target: TargetConfig) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(target.request_timeout_ms))
            .build()?;
        Ok(Self { client, target })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Verify every row of every table, then health and idempotence.
    pub async fn run(&self, contract: &Contract, tables: &[ScenarioTable]) -> HarnessResult<FunctionalReport> {
        let mut report = FunctionalReport::default();

        for table in tables {
            table.check_against(contract)?;
            let op = table.operation(contract)?;
            info!("Verifying {} row(s) of '{}' against {}", table.scenarios.len(), table.name, op.label());

            for scenario in &table.scenarios {
                let result = self.verify_scenario(op, scenario).await?;
                if !result.passed {
                    warn!("{}: {}", scenario.description, result.reasons.join("; "));
                }
                report.results.push(result);
            }
        }

        report.results.push(self.check_health().await?);

        if let Some(op) = contract.operation(FormTarget::Contact.method(), FormTarget::Contact.path()) {
            let body = json!({ "name": "Eddie", "email": "eddie@mail.com", "message": "Hi" });
            report.results.push(self.check_idempotence(op, &body).await?);
        }

        info!("Functional: {}/{} passed", report.passed(), report.results.len());
        Ok(report)
    }

    /// Submit one row and judge the response.
    pub async fn verify_scenario(&self, op: &Operation, scenario: &Scenario) -> HarnessResult<VerificationResult> {
        let observed = self.send(op, Some(&scenario.body())).await?;
        debug!("{} -> {}", scenario.description, observed.status);

        let mut reasons = Vec::new();
        if !scenario.expected.accepts(op, observed.status) {
            let declared: Vec<String> = scenario
                .expected
                .declared_keys(op)
                .iter()
                .map(ToString::to_string)
                .collect();
            reasons.push(format!(
                "expected {} (one of {}), observed {}",
                scenario.expected,
                declared.join(", "),
                observed.status
            ));
        }
        reasons.extend(op.check_response(observed.status, observed.content_type.as_deref(), &observed.raw));
        if scenario.expected.is_failure() && observed.body.get("detail").is_none() {
            reasons.push("failure body has no 'detail' member".into());
        }
        reasons.extend(missing_security_headers(&observed.headers));

        Ok(result(&scenario.description, op.label(), Some(scenario.expected), observed).judge(reasons))
    }

    /// `GET /health` answers `{"status":"ok"}`.
    pub async fn check_health(&self) -> HarnessResult<VerificationResult> {
        let resp = self.client.get(self.target.url("/health")).send().await?;
        let observed = observe(resp).await?;

        let mut reasons = Vec::new();
        if observed.status != 200 {
            reasons.push(format!("expected 200, observed {}", observed.status));
        }
        if observed.body.get("status").and_then(Value::as_str) != Some("ok") {
            reasons.push(format!("expected {{\"status\":\"ok\"}}, observed {}", observed.body));
        }
        reasons.extend(missing_security_headers(&observed.headers));

        Ok(result("health", "GET /health".into(), None, observed).judge(reasons))
    }

    /// The same submission twice yields two independent acknowledgements.
    pub async fn check_idempotence(&self, op: &Operation, body: &Value) -> HarnessResult<VerificationResult> {
        let first = self.send(op, Some(body)).await?;
        let second = self.send(op, Some(body)).await?;
        let reasons = repeated_submission_reasons(op, &[&first, &second]);

        Ok(result("repeated submission", op.label(), Some(OutcomeClass::Success), second).judge(reasons))
    }

    async fn send(&self, op: &Operation, body: Option<&Value>) -> HarnessResult<Observed> {
        let method = reqwest::Method::from_bytes(op.method.as_bytes())
            .map_err(|e| HarnessError::Contract(format!("{}: bad method: {}", op.label(), e)))?;
        let mut req = self.client.request(method, self.target.url(&op.path));
        if let Some(body) = body {
            req = req.json(body);
        }
        observe(req.send().await?).await
    }
}

async fn observe(resp: reqwest::Response) -> HarnessResult<Observed> {
    let status = resp.status().as_u16();
    let headers: BTreeMap<String, String> = resp
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let content_type = headers.get("content-type").cloned();
    let raw = resp.bytes().await?.to_vec();
    let body = serde_json::from_slice(&raw)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&raw).into_owned()));

    Ok(Observed {
        status,
        content_type,
        headers,
        raw,
        body,
    })
}

/// Each acknowledgement must be a conforming 200 on its own; their bodies
/// may differ (per-request ids and the like).
fn repeated_submission_reasons(op: &Operation, submissions: &[&Observed]) -> Vec<String> {
    let mut reasons = Vec::new();
    for (n, obs) in submissions.iter().enumerate().map(|(i, o)| (i + 1, o)) {
        if obs.status != 200 {
            reasons.push(format!("submission {} answered {}", n, obs.status));
        }
        reasons.extend(
            op.check_response(obs.status, obs.content_type.as_deref(), &obs.raw)
                .into_iter()
                .map(|r| format!("submission {}: {}", n, r)),
        );
    }
    reasons
}

fn result(case: &str, operation: String, expected: Option<OutcomeClass>, observed: Observed) -> VerificationResult {
    VerificationResult {
        case: case.to_string(),
        operation,
        expected,
        status: observed.status,
        body: observed.body,
        headers: observed.headers,
        passed: false,
        reasons: Vec::new(),
    }
}

/// Reasons for every security header that is missing or wrong.
pub fn missing_security_headers(headers: &BTreeMap<String, String>) -> Vec<String> {
    SECURITY_HEADERS
        .iter()
        .filter_map(|&(name, expected, exact)| {
            let ok = match headers.get(name) {
                Some(v) if exact => v.eq_ignore_ascii_case(expected),
                Some(v) => v.to_ascii_lowercase().contains(expected),
                None => false,
            };
            (!ok).then(|| format!("header {} should be {}{}", name, if exact { "" } else { "~" }, expected))
        })
        .collect()
}
