//! Scenario tables: static (inputs, expected outcome) rows per form
//!
//! Built-in tables cover the login and contact forms, including boundary and
//! adversarial inputs. Tables can also be loaded from YAML:
//!
//! ```yaml
//! name: login-extra
//! form: login
//! scenarios:
//!   - description: Trailing dot username
//!     expected: auth_failure
//!     fields:
//!       username: admin.
//!       password: "1234"
//! ```

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::config::Account;
use crate::contract::{Contract, Operation, StatusKey};
use crate::error::{HarnessError, HarnessResult};

/// What the service is expected to do with a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Success,
    ValidationFailure,
    AuthFailure,
    /// Any declared status is acceptable.
    Unspecified,
}

impl OutcomeClass {
    /// Whether a concrete status belongs to this class.
    pub fn admits(self, status: u16) -> bool {
        match self {
            OutcomeClass::Success => (200..300).contains(&status),
            OutcomeClass::ValidationFailure => matches!(status, 400 | 422),
            OutcomeClass::AuthFailure => matches!(status, 401 | 403),
            OutcomeClass::Unspecified => true,
        }
    }

    /// Response keys `op` declares for this class.
    pub fn declared_keys(self, op: &Operation) -> Vec<StatusKey> {
        op.responses
            .iter()
            .map(|r| r.status)
            .filter(|key| match (self, key) {
                (OutcomeClass::Unspecified, _) => true,
                (_, StatusKey::Exact(s)) => self.admits(*s),
                (OutcomeClass::Success, StatusKey::Class(d)) => *d == 2,
                (_, StatusKey::Class(d)) => *d == 4,
                (_, StatusKey::Default) => false,
            })
            .collect()
    }

    /// An observed status satisfies the row when it is both in the class and
    /// declared by the operation.
    pub fn accepts(self, op: &Operation, status: u16) -> bool {
        self.admits(status) && op.declares(status)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, OutcomeClass::ValidationFailure | OutcomeClass::AuthFailure)
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeClass::Success => "success",
            OutcomeClass::ValidationFailure => "validation-failure",
            OutcomeClass::AuthFailure => "auth-failure",
            OutcomeClass::Unspecified => "unspecified",
        };
        f.write_str(s)
    }
}

/// The form a table drives, with its page and backing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormTarget {
    Login,
    Contact,
}

impl FormTarget {
    pub fn page(self) -> &'static str {
        match self {
            FormTarget::Login => "/login.html",
            FormTarget::Contact => "/contact.html",
        }
    }

    pub fn form_selector(self) -> &'static str {
        match self {
            FormTarget::Login => "#loginForm",
            FormTarget::Contact => "#contactForm",
        }
    }

    pub fn submit_selector(self) -> &'static str {
        "button[type='submit']"
    }

    pub fn method(self) -> &'static str {
        "POST"
    }

    pub fn path(self) -> &'static str {
        match self {
            FormTarget::Login => "/api/login",
            FormTarget::Contact => "/api/contact",
        }
    }

    /// Fields are located by id.
    pub fn field_selector(self, field: &str) -> String {
        format!("#{}", field)
    }

    /// Dialog text the page shows for an outcome, if the outcome is known.
    pub fn expected_dialog(self, outcome: OutcomeClass) -> Option<&'static str> {
        match (self, outcome) {
            (_, OutcomeClass::Unspecified) => None,
            (FormTarget::Login, OutcomeClass::Success) => Some("Login successful!"),
            (FormTarget::Login, _) => Some("Invalid credentials"),
            (FormTarget::Contact, OutcomeClass::Success) => Some("Message sent!"),
            (FormTarget::Contact, _) => Some("Something went wrong."),
        }
    }
}

/// One row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub description: String,

    /// Field name to value, in fill order. Values are used verbatim.
    #[serde(serialize_with = "serialize_fields", deserialize_with = "deserialize_fields")]
    pub fields: Vec<(String, String)>,

    pub expected: OutcomeClass,
}

impl Scenario {
    pub fn new(description: impl Into<String>, fields: &[(&str, &str)], expected: OutcomeClass) -> Self {
        Self {
            description: description.into(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            expected,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The JSON request body the form would submit.
    pub fn body(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }

    /// Stable identifier for artifacts and reports.
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.description.len());
        for c in self.description.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        slug.trim_matches('-').to_string()
    }
}

/// All rows for one form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTable {
    pub name: String,
    pub form: FormTarget,
    pub scenarios: Vec<Scenario>,
}

impl ScenarioTable {
    /// Login rows. Every configured account gets a success row.
    pub fn login(accounts: &[Account]) -> Self {
        use OutcomeClass::*;

        let mut scenarios: Vec<Scenario> = accounts
            .iter()
            .map(|a| {
                Scenario::new(
                    format!("Valid {} credentials", a.username),
                    &[("username", a.username.as_str()), ("password", a.password.as_str())],
                    Success,
                )
            })
            .collect();

        let long_user = "a".repeat(25);
        let long_pass = "p".repeat(35);
        let rows: &[(&str, &str, &str, OutcomeClass)] = &[
            ("admin", "wrongpass", "Wrong password", AuthFailure),
            ("notfound", "1234", "Non-existent user", AuthFailure),
            ("", "", "Empty fields", ValidationFailure),
            ("ab", "1234", "Username too short", ValidationFailure),
            ("admin", "123", "Password too short", ValidationFailure),
            (long_user.as_str(), "1234", "Username too long", ValidationFailure),
            ("admin", long_pass.as_str(), "Password too long", ValidationFailure),
            ("admin<script>", "1234@#$%", "XSS and special chars", AuthFailure),
            (" admin ", " 1234 ", "Leading and trailing spaces", AuthFailure),
            ("ADMIN", "1234", "Uppercase username", AuthFailure),
            ("admin", "' OR '1'='1", "SQL injection password", AuthFailure),
            ("user<script>alert()</script>", "pass", "Script in username", ValidationFailure),
            ("<img src=x onerror=alert(1)>", "password", "XSS vector in username", ValidationFailure),
            ("user", "pass\n", "Password with newline", AuthFailure),
            ("user", "pass\t", "Password with tab", AuthFailure),
        ];
        scenarios.extend(rows.iter().map(|(user, pass, desc, expected)| {
            Scenario::new(*desc, &[("username", *user), ("password", *pass)], *expected)
        }));

        Self {
            name: "login".to_string(),
            form: FormTarget::Login,
            scenarios,
        }
    }

    /// Contact rows.
    pub fn contact() -> Self {
        use OutcomeClass::*;

        let long_message = "A".repeat(501);
        let long_name = "a".repeat(255);
        let long_domain = format!("test@{}.com", "a".repeat(240));
        let rows: &[(&str, &str, &str, &str, OutcomeClass)] = &[
            ("Eddie", "eddie@mail.com", "This is a valid message.", "Valid input", Success),
            ("Eddie", "eddie@mail.com", "Hi", "Two character message", Success),
            ("Eddie", "eddie[at]mail", "Hi there", "Invalid email format", ValidationFailure),
            ("E", "eddie@mail.com", "Hi there", "Too short name", ValidationFailure),
            ("Eddie", "eddie@mail.com", "H", "Too short message", ValidationFailure),
            ("", "", "", "All fields empty", ValidationFailure),
            ("Eddie", "eddie@mail.com", long_message.as_str(), "Message too long", ValidationFailure),
            ("Eddie", "EDDIE@GMAIL.COM", "Hello there.", "Email uppercase", Success),
            ("Eddie", "eddie@mail.com", "<b>Hello</b>", "Message with HTML tags", Success),
            ("Édgar Núñez", "edgar@mail.com", "Hola desde México.", "Name with accents", Success),
            ("<script>alert(1)</script>", "xss@mail.com", "Trying XSS", "XSS in name", Success),
            ("Eddie", "eddie@mail.com", "' OR '1'='1", "SQL injection in message", Success),
            ("<img src=x onerror=alert(1)>", "hack@hack.com", "Image XSS", "Markup name with plain email", Success),
            (long_name.as_str(), "test@test.com", "Normal message", "Name over max length", ValidationFailure),
            ("Eddie", long_domain.as_str(), "Hi", "Email long domain", ValidationFailure),
            ("Eddie", "eddie@mail.com", "\n\t\r", "Message with escape characters", Success),
            ("   Eddie   ", "   eddie@mail.com   ", "   trimmed?   ", "Inputs with extra spaces", ValidationFailure),
            ("Eddie", "éd.dié@mail.com", "Hola", "Email with special unicode", Success),
            ("Eddie", "contact+qa@mail.com", "Testing plus alias", "Email with plus alias", Success),
        ];

        Self {
            name: "contact".to_string(),
            form: FormTarget::Contact,
            scenarios: rows
                .iter()
                .map(|(name, email, message, desc, expected)| {
                    Scenario::new(
                        *desc,
                        &[("name", *name), ("email", *email), ("message", *message)],
                        *expected,
                    )
                })
                .collect(),
        }
    }

    /// The built-in login and contact tables.
    pub fn builtin(accounts: &[Account]) -> Vec<Self> {
        vec![Self::login(accounts), Self::contact()]
    }

    /// Tables from `dir` when given, the built-ins otherwise.
    pub fn load_or_builtin(dir: Option<&Path>, accounts: &[Account]) -> HarnessResult<Vec<Self>> {
        match dir {
            Some(dir) => {
                let tables = Self::load_all(dir)?;
                if tables.is_empty() {
                    return Err(HarnessError::Config(format!(
                        "no scenario tables found in {}",
                        dir.display()
                    )));
                }
                Ok(tables)
            }
            None => Ok(Self::builtin(accounts)),
        }
    }

    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        serde_yaml::from_str(yaml).map_err(HarnessError::from)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load every `.yaml`/`.yml` table under `dir`, sorted by path.
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut tables = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            debug!("Loading scenario table {}", entry.path().display());
            tables.push(Self::from_file(entry.path())?);
        }

        Ok(tables)
    }

    /// The operation this table's form submits to.
    pub fn operation<'c>(&self, contract: &'c Contract) -> HarnessResult<&'c Operation> {
        contract.operation(self.form.method(), self.form.path()).ok_or_else(|| {
            HarnessError::ScenarioDrift(format!(
                "table '{}' targets {} {}, which the contract does not declare",
                self.name,
                self.form.method(),
                self.form.path()
            ))
        })
    }

    /// Fail when a row's outcome class has no declared status on the target
    /// operation, or a row fills a field the request schema does not know.
    pub fn check_against(&self, contract: &Contract) -> HarnessResult<()> {
        let op = self.operation(contract)?;
        let known_fields = op
            .request_schema
            .as_ref()
            .and_then(|s| s.get("properties"))
            .and_then(Value::as_object);

        for scenario in &self.scenarios {
            if scenario.expected.declared_keys(op).is_empty() {
                return Err(HarnessError::ScenarioDrift(format!(
                    "row '{}' expects {} but {} declares only {}",
                    scenario.description,
                    scenario.expected,
                    op.label(),
                    op.declared_keys()
                )));
            }
            if let Some(known) = known_fields {
                if let Some((field, _)) = scenario.fields.iter().find(|(k, _)| !known.contains_key(k)) {
                    return Err(HarnessError::ScenarioDrift(format!(
                        "row '{}' fills '{}', which {} does not accept",
                        scenario.description,
                        field,
                        op.label()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn serialize_fields<S: Serializer>(fields: &[(String, String)], s: S) -> Result<S::Ok, S::Error> {
    let mut map = s.serialize_map(Some(fields.len()))?;
    for (k, v) in fields {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

fn deserialize_fields<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<(String, String)>, D::Error> {
    let mapping = serde_yaml::Mapping::deserialize(d)?;
    mapping
        .into_iter()
        .map(|(k, v)| {
            let key = match k {
                serde_yaml::Value::String(s) => s,
                other => return Err(D::Error::custom(format!("field name {:?} is not a string", other))),
            };
            let value = match v {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                other => {
                    return Err(D::Error::custom(format!(
                        "field '{}' has non-scalar value {:?}",
                        key, other
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn contract() -> Contract {
        Contract::from_value(&qa_api::openapi::document()).unwrap()
    }

    #[test]
    fn test_builtin_tables_resolve_against_contract() {
        let contract = contract();
        for table in ScenarioTable::builtin(&[Account::new("admin", "1234")]) {
            table.check_against(&contract).unwrap();
        }
    }

    #[test]
    fn test_login_table_has_row_per_account() {
        let table = ScenarioTable::login(&[Account::new("admin", "1234"), Account::new("bob", "hunter22")]);
        let successes: Vec<_> = table
            .scenarios
            .iter()
            .filter(|s| s.expected == OutcomeClass::Success)
            .collect();
        assert_eq!(successes.len(), 2);
        assert_eq!(successes[1].field("username"), Some("bob"));
    }

    #[test]
    fn test_values_kept_verbatim() {
        let table = ScenarioTable::login(&[]);
        let row = table
            .scenarios
            .iter()
            .find(|s| s.description == "Leading and trailing spaces")
            .unwrap();
        assert_eq!(row.field("username"), Some(" admin "));
        assert_eq!(row.body()["password"], " 1234 ");
    }

    #[test]
    fn test_drift_is_detected() {
        let mut doc = qa_api::openapi::document();
        doc["paths"]["/api/login"]["post"]["responses"]
            .as_object_mut()
            .unwrap()
            .remove("401");
        let contract = Contract::from_value(&doc).unwrap();

        let err = ScenarioTable::login(&[]).check_against(&contract).unwrap_err();
        assert!(matches!(err, HarnessError::ScenarioDrift(_)));
        assert!(err.to_string().contains("POST /api/login"));
    }

    #[test]
    fn test_unknown_field_is_drift() {
        let table = ScenarioTable {
            name: "bad".into(),
            form: FormTarget::Contact,
            scenarios: vec![Scenario::new("phone", &[("phone", "555")], OutcomeClass::Unspecified)],
        };
        assert!(matches!(
            table.check_against(&contract()),
            Err(HarnessError::ScenarioDrift(_))
        ));
    }

    #[test_case(OutcomeClass::Success, 200, true)]
    #[test_case(OutcomeClass::Success, 401, false)]
    #[test_case(OutcomeClass::ValidationFailure, 422, true)]
    #[test_case(OutcomeClass::ValidationFailure, 400, false ; "400 is in class but undeclared")]
    #[test_case(OutcomeClass::AuthFailure, 401, true)]
    #[test_case(OutcomeClass::Unspecified, 500, false)]
    fn test_outcome_acceptance(class: OutcomeClass, status: u16, accepted: bool) {
        let contract = contract();
        let op = contract.require("POST", "/api/login").unwrap();
        assert_eq!(class.accepts(op, status), accepted);
    }

    #[test]
    fn test_parse_yaml_table_keeps_field_order() {
        let yaml = r#"
name: login-extra
form: login
scenarios:
  - description: Numeric password
    expected: auth_failure
    fields:
      username: admin
      password: 12345
"#;
        let table = ScenarioTable::from_yaml(yaml).unwrap();
        assert_eq!(table.form, FormTarget::Login);
        let row = &table.scenarios[0];
        assert_eq!(row.fields[0], ("username".to_string(), "admin".to_string()));
        assert_eq!(row.field("password"), Some("12345"));
    }

    #[test]
    fn test_load_all_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = serde_yaml::to_string(&ScenarioTable::contact()).unwrap();
        std::fs::write(dir.path().join("contact.yaml"), yaml).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let tables = ScenarioTable::load_all(dir.path()).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].scenarios.len(), ScenarioTable::contact().scenarios.len());
    }

    #[test]
    fn test_empty_directory_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScenarioTable::load_or_builtin(Some(dir.path()), &[]).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_slug() {
        let s = Scenario::new("XSS & special chars!", &[], OutcomeClass::Unspecified);
        assert_eq!(s.slug(), "xss-special-chars");
    }
}
