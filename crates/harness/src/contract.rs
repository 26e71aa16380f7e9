//! Contract Source: the service's OpenAPI document, parsed into operations
//!
//! The document is fetched fresh on every call to [`Contract::fetch`]; nothing
//! is cached across runs. Local `$ref`s are inlined at parse time so each
//! [`Operation`] carries self-contained JSON schemas.

use std::collections::BTreeSet;
use std::fmt;

use jsonschema::Draft;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};

const HTTP_METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];
const MAX_REF_DEPTH: usize = 32;

/// A key in an operation's `responses` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatusKey {
    Exact(u16),
    /// `2XX` style ranges, holding the leading digit.
    Class(u16),
    Default,
}

impl StatusKey {
    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim();
        if key.eq_ignore_ascii_case("default") {
            return Some(StatusKey::Default);
        }
        let mut chars = key.chars();
        if let (Some(first), rest) = (chars.next(), chars.as_str()) {
            if rest.eq_ignore_ascii_case("xx") {
                return first
                    .to_digit(10)
                    .map(|d| d as u16)
                    .filter(|d| (1..=5).contains(d))
                    .map(StatusKey::Class);
            }
        }
        key.parse().ok().filter(|s| (100..=599).contains(s)).map(StatusKey::Exact)
    }

    pub fn matches(&self, status: u16) -> bool {
        match self {
            StatusKey::Exact(s) => *s == status,
            StatusKey::Class(d) => status / 100 == *d,
            StatusKey::Default => true,
        }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKey::Exact(s) => write!(f, "{}", s),
            StatusKey::Class(d) => write!(f, "{}XX", d),
            StatusKey::Default => write!(f, "default"),
        }
    }
}

/// One declared response
#[derive(Debug, Clone)]
pub struct ResponseSpec {
    pub status: StatusKey,
    pub description: String,
    /// Media type of the declared body, if any
    pub content_type: Option<String>,
    /// Resolved body schema, if any
    pub schema: Option<Value>,
}

/// Where a parameter travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub schema: Value,
}

/// One API endpoint as declared by the contract
#[derive(Debug, Clone)]
pub struct Operation {
    /// Uppercase HTTP method
    pub method: String,
    pub path: String,
    pub operation_id: Option<String>,
    pub parameters: Vec<Parameter>,
    /// Resolved JSON request-body schema
    pub request_schema: Option<Value>,
    pub request_required: bool,
    pub responses: Vec<ResponseSpec>,
}

impl Operation {
    /// `POST /api/login`
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    pub fn is(&self, method: &str, path: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && self.path == path
    }

    /// Exact codes declared for this operation.
    pub fn declared_statuses(&self) -> BTreeSet<u16> {
        self.responses
            .iter()
            .filter_map(|r| match r.status {
                StatusKey::Exact(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Human-readable list of every response key.
    pub fn declared_keys(&self) -> String {
        self.responses
            .iter()
            .map(|r| r.status.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The most specific response declared for `status`: exact, then range,
    /// then `default`.
    pub fn response_for(&self, status: u16) -> Option<&ResponseSpec> {
        let find = |pred: fn(&StatusKey) -> bool| {
            self.responses
                .iter()
                .find(|r| pred(&r.status) && r.status.matches(status))
        };
        find(|k| matches!(k, StatusKey::Exact(_)))
            .or_else(|| find(|k| matches!(k, StatusKey::Class(_))))
            .or_else(|| find(|k| matches!(k, StatusKey::Default)))
    }

    pub fn declares(&self, status: u16) -> bool {
        self.response_for(status).is_some()
    }

    /// Every way the observed response breaks this operation's declaration.
    /// An empty list means the response conforms.
    pub fn check_response(&self, status: u16, content_type: Option<&str>, body: &[u8]) -> Vec<String> {
        let Some(spec) = self.response_for(status) else {
            return vec![format!(
                "undeclared status {} (declared: {})",
                status,
                self.declared_keys()
            )];
        };

        let mut violations = Vec::new();
        if status >= 500 && !matches!(spec.status, StatusKey::Exact(_)) {
            violations.push(format!("server fault {} only covered by '{}'", status, spec.status));
        }

        let declared_json = spec
            .content_type
            .as_deref()
            .map(is_json_media_type)
            .unwrap_or(false);
        if !declared_json {
            return violations;
        }

        if !content_type.map(is_json_media_type).unwrap_or(false) {
            violations.push(format!(
                "content-type {:?} does not match declared {}",
                content_type.unwrap_or("<none>"),
                spec.content_type.as_deref().unwrap_or_default()
            ));
            return violations;
        }

        let instance: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                violations.push(format!("body is not valid JSON: {}", e));
                return violations;
            }
        };

        if let Some(schema) = &spec.schema {
            match schema_errors(schema, &instance) {
                Ok(errors) => violations.extend(
                    errors
                        .into_iter()
                        .map(|e| format!("body does not match {} schema: {}", spec.status, e)),
                ),
                Err(e) => violations.push(e.to_string()),
            }
        }

        violations
    }
}

/// The parsed contract
#[derive(Debug, Clone)]
pub struct Contract {
    pub title: String,
    pub version: String,
    operations: Vec<Operation>,
}

impl Contract {
    /// Fetch and parse the contract. Always hits the network.
    pub async fn fetch(client: &reqwest::Client, url: &str) -> HarnessResult<Self> {
        debug!("Fetching contract from {}", url);
        let resp = client.get(url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                HarnessError::Setup(format!("contract source {} unreachable: {}", url, e))
            } else {
                HarnessError::Http(e)
            }
        })?;

        if !resp.status().is_success() {
            return Err(HarnessError::Setup(format!(
                "contract source {} answered {}",
                url,
                resp.status()
            )));
        }

        let doc: Value = resp.json().await?;
        let contract = Self::from_value(&doc)?;
        info!(
            "Contract '{}' v{}: {} operation(s)",
            contract.title,
            contract.version,
            contract.operations.len()
        );
        Ok(contract)
    }

    /// Parse an OpenAPI 3.x document.
    pub fn from_value(doc: &Value) -> HarnessResult<Self> {
        let version = doc.get("openapi").and_then(Value::as_str).unwrap_or_default();
        if !version.starts_with('3') {
            return Err(HarnessError::Contract(format!(
                "unsupported OpenAPI version '{}'",
                version
            )));
        }

        let paths = doc
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| HarnessError::Contract("document has no 'paths' object".into()))?;

        let mut operations = Vec::new();
        for (path, item) in paths {
            let Some(item) = item.as_object() else {
                continue;
            };
            let shared_params = item.get("parameters");

            for method in HTTP_METHODS {
                let Some(op) = item.get(*method) else {
                    continue;
                };
                operations.push(parse_operation(doc, path, method, op, shared_params)?);
            }
        }

        if operations.is_empty() {
            return Err(HarnessError::Contract("document declares no operations".into()));
        }

        Ok(Self {
            title: doc
                .pointer("/info/title")
                .and_then(Value::as_str)
                .unwrap_or("untitled")
                .to_string(),
            version: doc
                .pointer("/info/version")
                .and_then(Value::as_str)
                .unwrap_or("0")
                .to_string(),
            operations,
        })
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn operation(&self, method: &str, path: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.is(method, path))
    }

    /// Like [`Contract::operation`] but a missing operation is an error.
    pub fn require(&self, method: &str, path: &str) -> HarnessResult<&Operation> {
        self.operation(method, path).ok_or_else(|| {
            HarnessError::Contract(format!(
                "contract does not declare {} {}",
                method.to_uppercase(),
                path
            ))
        })
    }
}

fn parse_operation(
    doc: &Value,
    path: &str,
    method: &str,
    op: &Value,
    shared_params: Option<&Value>,
) -> HarnessResult<Operation> {
    let label = format!("{} {}", method.to_uppercase(), path);

    let mut parameters = Vec::new();
    let params = shared_params
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .chain(op.get("parameters").and_then(Value::as_array).into_iter().flatten());
    for raw in params {
        let param = resolve(raw, doc, 0)?;
        let location = match param.get("in").and_then(Value::as_str) {
            Some("path") => ParamLocation::Path,
            Some("query") => ParamLocation::Query,
            Some("header") => ParamLocation::Header,
            Some("cookie") => ParamLocation::Cookie,
            other => {
                return Err(HarnessError::Contract(format!(
                    "{}: parameter location {:?} is invalid",
                    label, other
                )))
            }
        };
        parameters.push(Parameter {
            name: param
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            required: location == ParamLocation::Path
                || param.get("required").and_then(Value::as_bool).unwrap_or(false),
            location,
            schema: param.get("schema").cloned().unwrap_or(Value::Object(Map::new())),
        });
    }

    let (request_schema, request_required) = match op.get("requestBody") {
        Some(body) => {
            let body = resolve(body, doc, 0)?;
            let schema = body
                .get("content")
                .and_then(Value::as_object)
                .and_then(|content| {
                    content
                        .iter()
                        .find(|(media, _)| is_json_media_type(media))
                        .and_then(|(_, m)| m.get("schema").cloned())
                });
            (
                schema,
                body.get("required").and_then(Value::as_bool).unwrap_or(false),
            )
        }
        None => (None, false),
    };

    let raw_responses = op
        .get("responses")
        .and_then(Value::as_object)
        .ok_or_else(|| HarnessError::Contract(format!("{}: no responses declared", label)))?;

    let mut responses = Vec::new();
    for (key, raw) in raw_responses {
        let status = StatusKey::parse(key).ok_or_else(|| {
            HarnessError::Contract(format!("{}: response key '{}' is not a status", label, key))
        })?;
        let raw = resolve(raw, doc, 0)?;
        let content = raw.get("content").and_then(Value::as_object);
        let (content_type, schema) = match content.and_then(|c| c.iter().next()) {
            Some((media, m)) => (Some(media.clone()), m.get("schema").cloned()),
            None => (None, None),
        };
        responses.push(ResponseSpec {
            status,
            description: raw
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content_type,
            schema,
        });
    }
    responses.sort_by_key(|r| r.status);

    Ok(Operation {
        method: method.to_uppercase(),
        path: path.to_string(),
        operation_id: op.get("operationId").and_then(Value::as_str).map(String::from),
        parameters,
        request_schema,
        request_required,
        responses,
    })
}

/// Inline every local `$ref` and map OpenAPI `nullable` onto JSON Schema.
fn resolve(value: &Value, root: &Value, depth: usize) -> HarnessResult<Value> {
    if depth > MAX_REF_DEPTH {
        return Err(HarnessError::Contract("$ref nesting too deep (cycle?)".into()));
    }

    match value {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                let pointer = reference.strip_prefix('#').ok_or_else(|| {
                    HarnessError::Contract(format!("only local $refs are supported, got '{}'", reference))
                })?;
                let target = root.pointer(pointer).ok_or_else(|| {
                    HarnessError::Contract(format!("dangling $ref '{}'", reference))
                })?;
                return resolve(target, root, depth + 1);
            }

            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve(v, root, depth)?);
            }

            if out.remove("nullable") == Some(Value::Bool(true)) {
                if let Some(Value::String(t)) = out.get("type").cloned() {
                    out.insert("type".into(), Value::Array(vec![Value::String(t), "null".into()]));
                }
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve(v, root, depth))
            .collect::<HarnessResult<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

/// Validation messages for `instance` against `schema`; empty when valid.
pub fn schema_errors(schema: &Value, instance: &Value) -> HarnessResult<Vec<String>> {
    let validator = jsonschema::options()
        .with_draft(Draft::Draft4)
        .build(schema)
        .map_err(|e| HarnessError::Contract(format!("invalid schema: {}", e)))?;
    Ok(validator.iter_errors(instance).map(|e| e.to_string()).collect())
}

pub fn is_json_media_type(media: &str) -> bool {
    let media = media.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    media == "application/json" || media.ends_with("+json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "openapi": "3.0.3",
            "info": { "title": "Sample", "version": "1.2.0" },
            "paths": {
                "/api/login": {
                    "post": {
                        "requestBody": {
                            "required": true,
                            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Login" } } }
                        },
                        "responses": {
                            "200": {
                                "description": "ok",
                                "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Token" } } }
                            },
                            "401": {
                                "description": "denied",
                                "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Error" } } }
                            },
                            "4XX": { "description": "client error" }
                        }
                    }
                },
                "/items/{id}": {
                    "parameters": [{ "name": "id", "in": "path", "schema": { "type": "integer" } }],
                    "get": { "responses": { "default": { "description": "anything" } } }
                }
            },
            "components": {
                "schemas": {
                    "Login": {
                        "type": "object",
                        "required": ["username"],
                        "properties": { "username": { "type": "string", "minLength": 3 } }
                    },
                    "Token": {
                        "type": "object",
                        "required": ["access_token"],
                        "properties": { "access_token": { "type": "string" }, "note": { "type": "string", "nullable": true } }
                    },
                    "Error": {
                        "type": "object",
                        "required": ["detail"],
                        "properties": { "detail": { "type": "string" } }
                    }
                }
            }
        })
    }

    #[test]
    fn test_status_key_parsing() {
        assert_eq!(StatusKey::parse("200"), Some(StatusKey::Exact(200)));
        assert_eq!(StatusKey::parse("4xx"), Some(StatusKey::Class(4)));
        assert_eq!(StatusKey::parse("default"), Some(StatusKey::Default));
        assert_eq!(StatusKey::parse("9XX"), None);
        assert_eq!(StatusKey::parse("abc"), None);
        assert_eq!(StatusKey::parse("é1"), None);
        assert_eq!(StatusKey::parse("éxx"), None);
        assert_eq!(StatusKey::parse("２00"), None);
    }

    #[test]
    fn test_non_ascii_response_key_is_a_contract_error() {
        let mut doc = sample();
        doc["paths"]["/api/login"]["post"]["responses"]["é1"] = json!({ "description": "odd" });
        let err = Contract::from_value(&doc).unwrap_err();
        assert!(matches!(err, HarnessError::Contract(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_discovers_operations_and_inlines_refs() {
        let contract = Contract::from_value(&sample()).unwrap();
        assert_eq!(contract.operations().len(), 2);

        let login = contract.require("post", "/api/login").unwrap();
        assert!(login.request_required);
        let schema = login.request_schema.as_ref().unwrap();
        assert_eq!(schema["properties"]["username"]["minLength"], 3);
        assert_eq!(login.declared_statuses().into_iter().collect::<Vec<_>>(), vec![200, 401]);

        let item = contract.require("GET", "/items/{id}").unwrap();
        assert_eq!(item.parameters.len(), 1);
        assert!(item.parameters[0].required);
    }

    #[test]
    fn test_response_lookup_prefers_exact_then_range() {
        let contract = Contract::from_value(&sample()).unwrap();
        let login = contract.require("POST", "/api/login").unwrap();
        assert_eq!(login.response_for(401).unwrap().status, StatusKey::Exact(401));
        assert_eq!(login.response_for(422).unwrap().status, StatusKey::Class(4));
        assert!(login.response_for(500).is_none());
    }

    #[test]
    fn test_check_response_conforming_body() {
        let contract = Contract::from_value(&sample()).unwrap();
        let login = contract.require("POST", "/api/login").unwrap();
        let body = br#"{"access_token":"abc","note":null}"#;
        assert!(login.check_response(200, Some("application/json"), body).is_empty());
    }

    #[test]
    fn test_check_response_flags_violations() {
        let contract = Contract::from_value(&sample()).unwrap();
        let login = contract.require("POST", "/api/login").unwrap();

        let missing_field = login.check_response(200, Some("application/json"), br#"{"token":"abc"}"#);
        assert_eq!(missing_field.len(), 1);

        let wrong_type = login.check_response(401, Some("application/json"), br#"{"detail":5}"#);
        assert_eq!(wrong_type.len(), 1);

        let undeclared = login.check_response(503, Some("application/json"), b"{}");
        assert!(undeclared[0].contains("undeclared status 503"));

        let not_json = login.check_response(200, Some("text/plain"), b"ok");
        assert!(not_json[0].contains("content-type"));
    }

    #[test]
    fn test_default_response_does_not_excuse_server_faults() {
        let contract = Contract::from_value(&sample()).unwrap();
        let item = contract.require("GET", "/items/{id}").unwrap();
        assert!(item.check_response(200, None, b"").is_empty());
        assert_eq!(item.check_response(500, None, b"").len(), 1);
    }

    #[test]
    fn test_rejects_non_openapi3_documents() {
        let doc = json!({ "swagger": "2.0", "paths": {} });
        assert!(matches!(Contract::from_value(&doc), Err(HarnessError::Contract(_))));
    }

    #[test]
    fn test_dangling_ref_is_reported() {
        let mut doc = sample();
        doc["components"]["schemas"].as_object_mut().unwrap().remove("Token");
        let err = Contract::from_value(&doc).unwrap_err();
        assert!(err.to_string().contains("dangling"));
    }

    #[test]
    fn test_json_media_types() {
        assert!(is_json_media_type("application/json; charset=utf-8"));
        assert!(is_json_media_type("application/problem+json"));
        assert!(!is_json_media_type("text/html"));
    }
}
