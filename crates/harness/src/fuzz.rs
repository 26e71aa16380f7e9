//! Schema-driven contract fuzzing
//!
//! Operations are discovered from a freshly fetched contract. For each one
//! the fuzzer builds cases in several phases and interleaves them, so that a
//! small `max_examples` still touches every phase:
//!
//! | phase          | what it sends                                       |
//! |----------------|-----------------------------------------------------|
//! | example        | a body that satisfies the request schema            |
//! | boundary       | string lengths at and just past min/max             |
//! | missing_field  | the example minus one required property             |
//! | type_confusion | a property replaced by a value of another JSON type |
//! | adversarial    | markup, SQL-shaped, unicode and control characters  |
//! | non_object     | arrays, scalars and malformed JSON as the body      |
//! | random         | seeded random strings in every property             |
//!
//! A response breaks the contract when its status is undeclared, it is a
//! 5xx that is not explicitly declared, or its body does not match the
//! declared media type or schema.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::contract::{Contract, Operation, ParamLocation};
use crate::error::{HarnessError, HarnessResult};

const ADVERSARIAL: &[&str] = &[
    "<script>alert(1)</script>",
    "<img src=x onerror=alert(1)>",
    "' OR '1'='1",
    "Robert'); DROP TABLE users;--",
    "Ω≈ç√∫ 漢字 🚀",
    "\u{0}\u{1}\u{7f}",
    "\n\t\r",
    "   ",
    "%s%n%x",
    "../../etc/passwd",
];

const RANDOM_POOL: &[char] = &[
    'a', 'b', 'z', 'A', 'Z', '0', '9', ' ', '@', '.', '-', '_', '+', '<', '>', '"', '\'', '\\', '/', '%',
    '\n', '\t', 'é', 'ñ', 'ß', 'Ж', '中', '🚀', '\u{200b}',
];

/// Configuration for fuzz runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    /// Requests per operation
    pub max_examples: usize,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
    pub request_timeout_ms: u64,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            max_examples: 10,
            seed: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzPhase {
    Example,
    Boundary,
    MissingField,
    TypeConfusion,
    Adversarial,
    NonObject,
    Random,
}

/// Request body of a case
#[derive(Debug, Clone, PartialEq)]
pub enum CaseBody {
    None,
    Json(Value),
    /// Sent verbatim as `application/json`, typically malformed
    Raw(String),
}

/// One generated request
#[derive(Debug, Clone)]
pub struct FuzzCase {
    pub phase: FuzzPhase,
    pub label: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: CaseBody,
}

impl FuzzCase {
    fn preview(&self) -> String {
        let text = match &self.body {
            CaseBody::None => String::new(),
            CaseBody::Json(v) => v.to_string(),
            CaseBody::Raw(s) => s.clone(),
        };
        text.chars().take(200).collect()
    }
}

/// A single conformance failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzViolation {
    pub operation: String,
    pub phase: FuzzPhase,
    pub case: String,
    pub status: u16,
    pub reason: String,
    pub request_body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSummary {
    pub operation: String,
    pub examples: usize,
    pub violations: usize,
}

/// Result of a fuzz run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuzzReport {
    pub contract: String,
    pub seed: u64,
    pub operations: Vec<OperationSummary>,
    pub violations: Vec<FuzzViolation>,
}

impl FuzzReport {
    pub fn total_examples(&self) -> usize {
        self.operations.iter().map(|o| o.examples).sum()
    }

    pub fn ensure_conformant(&self) -> HarnessResult<()> {
        let Some(first) = self.violations.first() else {
            return Ok(());
        };
        Err(HarnessError::ContractViolation {
            operation: first.operation.clone(),
            reason: format!(
                "{} violation(s) in {} example(s); first: [{:?}] {} -> {}: {} (body: {})",
                self.violations.len(),
                self.total_examples(),
                first.phase,
                first.case,
                first.status,
                first.reason,
                first.request_body
            ),
        })
    }
}

/// Drives fuzz cases against a live service
pub struct ContractFuzzer {
    config: FuzzConfig,
    base_url: String,
    openapi_url: String,
    client: reqwest::Client,
}

impl ContractFuzzer {
    pub fn new(config: FuzzConfig, base_url: impl Into<String>, openapi_url: impl Into<String>) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            config,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            openapi_url: openapi_url.into(),
            client,
        })
    }

    /// Fetch the contract and fuzz every operation it declares.
    pub async fn run(&self) -> HarnessResult<FuzzReport> {
        let contract = Contract::fetch(&self.client, &self.openapi_url).await?;
        self.run_against(&contract).await
    }

    pub async fn run_against(&self, contract: &Contract) -> HarnessResult<FuzzReport> {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        info!("Fuzzing {} operation(s), seed {}", contract.operations().len(), seed);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut report = FuzzReport {
            contract: format!("{} v{}", contract.title, contract.version),
            seed,
            operations: Vec::new(),
            violations: Vec::new(),
        };

        for op in contract.operations() {
            let cases = generate_cases(op, self.config.max_examples, &mut rng);
            let mut found = 0;

            for case in &cases {
                for reason in self.execute(op, case).await? {
                    warn!("{} [{:?}] {}: {}", op.label(), case.phase, case.label, reason.1);
                    report.violations.push(FuzzViolation {
                        operation: op.label(),
                        phase: case.phase,
                        case: case.label.clone(),
                        status: reason.0,
                        reason: reason.1,
                        request_body: case.preview(),
                    });
                    found += 1;
                }
            }

            info!("{}: {} example(s), {} violation(s)", op.label(), cases.len(), found);
            report.operations.push(OperationSummary {
                operation: op.label(),
                examples: cases.len(),
                violations: found,
            });
        }

        Ok(report)
    }

    /// Send one case; returns `(status, reason)` per violation.
    async fn execute(&self, op: &Operation, case: &FuzzCase) -> HarnessResult<Vec<(u16, String)>> {
        let method = reqwest::Method::from_bytes(op.method.as_bytes())
            .map_err(|e| HarnessError::Contract(format!("{}: bad method: {}", op.label(), e)))?;
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, case.path))
            .query(&case.query);

        req = match &case.body {
            CaseBody::None => req,
            CaseBody::Json(v) => req.json(v),
            CaseBody::Raw(s) => req.header("content-type", "application/json").body(s.clone()),
        };

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = resp.bytes().await?;

        debug!("{} [{:?}] {} -> {}", op.label(), case.phase, case.label, status);
        Ok(op
            .check_response(status, content_type.as_deref(), &body)
            .into_iter()
            .map(|r| (status, r))
            .collect())
    }
}

/// Build up to `max` cases for `op`, interleaving phases.
pub fn generate_cases(op: &Operation, max: usize, rng: &mut StdRng) -> Vec<FuzzCase> {
    let path = fill_path(op);
    let query = required_query(op);
    let case = |phase, label: String, body| FuzzCase {
        phase,
        label,
        path: path.clone(),
        query: query.clone(),
        body,
    };

    let Some(schema) = op.request_schema.as_ref() else {
        let mut cases = vec![case(FuzzPhase::Example, "no body".into(), CaseBody::None)];
        while cases.len() < max {
            let mut c = case(FuzzPhase::Random, format!("random query #{}", cases.len()), CaseBody::None);
            c.query.push(("q".into(), random_string(rng, 0, 24)));
            cases.push(c);
        }
        cases.truncate(max);
        return cases;
    };

    let example = example_value(schema);
    let props = string_properties(schema);
    let mut phases: Vec<Vec<FuzzCase>> = Vec::new();

    phases.push(vec![case(FuzzPhase::Example, "conformant example".into(), CaseBody::Json(example.clone()))]);

    let mut boundary = Vec::new();
    for (name, min, max_len) in &props {
        let mut lengths = Vec::new();
        if let Some(min) = min {
            lengths.push(*min);
            if *min > 0 {
                lengths.push(min - 1);
            }
        }
        if let Some(max_len) = max_len {
            lengths.push(*max_len);
            lengths.push(max_len + 1);
        }
        for len in lengths {
            boundary.push(case(
                FuzzPhase::Boundary,
                format!("{} length {}", name, len),
                CaseBody::Json(with_field(&example, name, Value::String("x".repeat(len)))),
            ));
        }
    }
    phases.push(boundary);

    let required: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();
    phases.push(
        required
            .iter()
            .map(|name| {
                let mut body = example.clone();
                if let Some(obj) = body.as_object_mut() {
                    obj.remove(name);
                }
                case(FuzzPhase::MissingField, format!("without {}", name), CaseBody::Json(body))
            })
            .collect(),
    );

    let confusions = [json!(12345), Value::Null, json!(true), json!([]), json!({})];
    let mut confusion = Vec::new();
    for value in &confusions {
        for (name, _, _) in &props {
            confusion.push(case(
                FuzzPhase::TypeConfusion,
                format!("{} as {}", name, value),
                CaseBody::Json(with_field(&example, name, value.clone())),
            ));
        }
    }
    phases.push(confusion);

    let mut adversarial = Vec::new();
    for payload in ADVERSARIAL {
        for (name, _, _) in &props {
            adversarial.push(case(
                FuzzPhase::Adversarial,
                format!("{} = {:?}", name, payload),
                CaseBody::Json(with_field(&example, name, Value::String(payload.to_string()))),
            ));
        }
    }
    phases.push(adversarial);

    phases.push(vec![
        case(FuzzPhase::NonObject, "array body".into(), CaseBody::Json(json!([example.clone()]))),
        case(FuzzPhase::NonObject, "string body".into(), CaseBody::Json(json!("hello"))),
        case(FuzzPhase::NonObject, "null body".into(), CaseBody::Json(Value::Null)),
        case(FuzzPhase::NonObject, "truncated JSON".into(), CaseBody::Raw("{\"a\":".into())),
        case(FuzzPhase::NonObject, "empty body".into(), CaseBody::Raw(String::new())),
    ]);

    let mut interleaved = Vec::with_capacity(max);
    let mut iters: Vec<_> = phases.into_iter().map(Vec::into_iter).collect();
    while interleaved.len() < max {
        let mut progressed = false;
        for it in iters.iter_mut() {
            if interleaved.len() >= max {
                break;
            }
            if let Some(c) = it.next() {
                interleaved.push(c);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    while interleaved.len() < max {
        let mut body = example.clone();
        for (name, min, max_len) in &props {
            let lo = min.unwrap_or(0);
            let hi = max_len.map(|m| m + 5).unwrap_or(lo + 32).max(lo + 1);
            body = with_field(&body, name, Value::String(random_string(rng, lo.saturating_sub(1), hi)));
        }
        interleaved.push(case(
            FuzzPhase::Random,
            format!("random #{}", interleaved.len()),
            CaseBody::Json(body),
        ));
    }

    interleaved
}

/// A value satisfying `schema`, as far as this generator understands it.
pub fn example_value(schema: &Value) -> Value {
    if let Some(v) = schema.get("example") {
        return v.clone();
    }
    if let Some(first) = schema.get("enum").and_then(Value::as_array).and_then(|e| e.first()) {
        return first.clone();
    }
    if let Some(first) = schema
        .get("allOf")
        .or_else(|| schema.get("anyOf"))
        .or_else(|| schema.get("oneOf"))
        .and_then(Value::as_array)
        .and_then(|a| a.first())
    {
        return example_value(first);
    }

    let ty = match schema.get("type") {
        Some(Value::String(t)) => t.as_str(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or("null"),
        _ if schema.get("properties").is_some() => "object",
        _ => "string",
    };

    match ty {
        "object" => {
            let mut obj = Map::new();
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (name, prop) in props {
                    obj.insert(name.clone(), example_value(prop));
                }
            }
            Value::Object(obj)
        }
        "array" => {
            let min = schema.get("minItems").and_then(Value::as_u64).unwrap_or(0);
            let item = schema.get("items").map(example_value).unwrap_or(Value::Null);
            Value::Array(vec![item; min as usize])
        }
        "integer" => json!(schema.get("minimum").and_then(Value::as_i64).unwrap_or(1)),
        "number" => json!(schema.get("minimum").and_then(Value::as_f64).unwrap_or(1.0)),
        "boolean" => json!(true),
        "null" => Value::Null,
        _ => Value::String(example_string(schema)),
    }
}

fn example_string(schema: &Value) -> String {
    match schema.get("format").and_then(Value::as_str) {
        Some("email") => return "qa@example.com".into(),
        Some("uuid") => return "00000000-0000-4000-8000-000000000000".into(),
        Some("date-time") => return "2024-01-01T00:00:00Z".into(),
        _ => {}
    }
    let min = schema.get("minLength").and_then(Value::as_u64).unwrap_or(0) as usize;
    let max = schema.get("maxLength").and_then(Value::as_u64).map(|m| m as usize);
    let len = max.map(|m| min.max(8).min(m)).unwrap_or_else(|| min.max(8));
    "a".repeat(len)
}

/// `(name, minLength, maxLength)` of every string-typed top-level property.
/// Format-constrained strings have no length bounds here.
fn string_properties(schema: &Value) -> Vec<(String, Option<usize>, Option<usize>)> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .filter(|(_, p)| p.get("type").and_then(Value::as_str) == Some("string"))
                .map(|(name, p)| {
                    let bound = |k: &str| p.get(k).and_then(Value::as_u64).map(|v| v as usize);
                    (name.clone(), bound("minLength"), bound("maxLength"))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn with_field(body: &Value, name: &str, value: Value) -> Value {
    let mut body = body.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert(name.to_string(), value);
    }
    body
}

fn random_string(rng: &mut StdRng, min: usize, max: usize) -> String {
    let len = rng.gen_range(min..=max.max(min));
    (0..len)
        .map(|_| RANDOM_POOL[rng.gen_range(0..RANDOM_POOL.len())])
        .collect()
}

fn fill_path(op: &Operation) -> String {
    let mut path = op.path.clone();
    for p in op.parameters.iter().filter(|p| p.location == ParamLocation::Path) {
        let value = match example_value(&p.schema) {
            Value::String(s) => s,
            other => other.to_string(),
        };
        path = path.replace(&format!("{{{}}}", p.name), &value);
    }
    path
}

fn required_query(op: &Operation) -> Vec<(String, String)> {
    op.parameters
        .iter()
        .filter(|p| p.location == ParamLocation::Query && p.required)
        .map(|p| {
            let value = match example_value(&p.schema) {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (p.name.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::schema_errors;

    fn contract() -> Contract {
        Contract::from_value(&qa_api::openapi::document()).unwrap()
    }

    #[test]
    fn test_example_satisfies_request_schema() {
        let contract = contract();
        for op in contract.operations() {
            if let Some(schema) = &op.request_schema {
                let example = example_value(schema);
                assert!(
                    schema_errors(schema, &example).unwrap().is_empty(),
                    "{} example {} does not conform",
                    op.label(),
                    example
                );
            }
        }
    }

    #[test]
    fn test_small_budget_still_covers_every_phase() {
        let contract = contract();
        let op = contract.require("POST", "/api/contact").unwrap();
        let cases = generate_cases(op, 10, &mut StdRng::seed_from_u64(1));
        assert_eq!(cases.len(), 10);

        for phase in [
            FuzzPhase::Example,
            FuzzPhase::Boundary,
            FuzzPhase::MissingField,
            FuzzPhase::TypeConfusion,
            FuzzPhase::Adversarial,
            FuzzPhase::NonObject,
        ] {
            assert!(cases.iter().any(|c| c.phase == phase), "missing {:?}", phase);
        }
    }

    #[test]
    fn test_large_budget_tops_up_with_random_cases() {
        let contract = contract();
        let op = contract.require("POST", "/api/login").unwrap();
        let cases = generate_cases(op, 200, &mut StdRng::seed_from_u64(2));
        assert_eq!(cases.len(), 200);
        assert!(cases.iter().any(|c| c.phase == FuzzPhase::Random));
    }

    #[test]
    fn test_same_seed_same_cases() {
        let contract = contract();
        let op = contract.require("POST", "/api/login").unwrap();
        let a = generate_cases(op, 120, &mut StdRng::seed_from_u64(9));
        let b = generate_cases(op, 120, &mut StdRng::seed_from_u64(9));
        let bodies = |cases: &[FuzzCase]| cases.iter().map(|c| c.body.clone()).collect::<Vec<_>>();
        assert_eq!(bodies(&a), bodies(&b));
    }

    #[test]
    fn test_bodiless_operation_cases() {
        let contract = contract();
        let op = contract.require("GET", "/health").unwrap();
        let cases = generate_cases(op, 10, &mut StdRng::seed_from_u64(3));
        assert_eq!(cases.len(), 10);
        assert!(cases.iter().all(|c| c.body == CaseBody::None));
    }

    #[test]
    fn test_boundary_lengths_from_schema() {
        let schema = json!({
            "type": "object",
            "required": ["username"],
            "properties": { "username": { "type": "string", "minLength": 3, "maxLength": 20 } }
        });
        let props = string_properties(&schema);
        assert_eq!(props, vec![("username".to_string(), Some(3), Some(20))]);
        assert_eq!(example_value(&schema)["username"], "aaaaaaaa");
    }

    #[test]
    fn test_report_verdict() {
        let mut report = FuzzReport {
            contract: "demo".into(),
            seed: 1,
            operations: vec![OperationSummary {
                operation: "POST /api/login".into(),
                examples: 10,
                violations: 0,
            }],
            violations: Vec::new(),
        };
        assert!(report.ensure_conformant().is_ok());

        report.violations.push(FuzzViolation {
            operation: "POST /api/login".into(),
            phase: FuzzPhase::NonObject,
            case: "null body".into(),
            status: 500,
            reason: "undeclared status 500".into(),
            request_body: "null".into(),
        });
        let err = report.ensure_conformant().unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("undeclared status 500"));
    }
}
