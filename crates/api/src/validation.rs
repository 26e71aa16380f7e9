//! Request body validation
//!
//! Bodies are parsed by hand instead of through the `Json` extractor so that
//! every malformed input, including broken JSON and wrong content types,
//! is answered with the documented 422 shape rather than an undeclared 400
//! or 415.

use std::ops::RangeInclusive;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult, FieldError};

pub const USERNAME_LEN: RangeInclusive<usize> = 3..=20;
pub const PASSWORD_LEN: RangeInclusive<usize> = 4..=30;
pub const NAME_LEN: RangeInclusive<usize> = 2..=50;
pub const MESSAGE_LEN: RangeInclusive<usize> = 2..=500;
pub const EMAIL_MAX_LEN: usize = 254;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}$")
        .expect("email pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub message: String,
}

pub fn parse_login(body: &[u8]) -> ApiResult<LoginRequest> {
    let obj = parse_object(body)?;
    let mut errors = Vec::new();
    let username = string_field(&obj, "username", USERNAME_LEN, &mut errors);
    let password = string_field(&obj, "password", PASSWORD_LEN, &mut errors);

    match (username, password) {
        (Some(username), Some(password)) if errors.is_empty() => Ok(LoginRequest { username, password }),
        _ => Err(ApiError::Validation(errors)),
    }
}

pub fn parse_contact(body: &[u8]) -> ApiResult<ContactRequest> {
    let obj = parse_object(body)?;
    let mut errors = Vec::new();
    let name = string_field(&obj, "name", NAME_LEN, &mut errors);
    let email = string_field(&obj, "email", 1..=EMAIL_MAX_LEN, &mut errors);
    let message = string_field(&obj, "message", MESSAGE_LEN, &mut errors);

    if let Some(email) = email.as_deref() {
        if !is_valid_email(email) {
            errors.push(FieldError::new(
                &["body", "email"],
                "value is not a valid email address",
                "value_error",
            ));
        }
    }

    match (name, email, message) {
        (Some(name), Some(email), Some(message)) if errors.is_empty() => {
            Ok(ContactRequest { name, email, message })
        }
        _ => Err(ApiError::Validation(errors)),
    }
}

/// Syntactic address check. Unicode is allowed in the local part,
/// whitespace is not, and every domain label must fit in 63 characters.
pub fn is_valid_email(email: &str) -> bool {
    email.chars().count() <= EMAIL_MAX_LEN && EMAIL_RE.is_match(email)
}

fn parse_object(body: &[u8]) -> ApiResult<Map<String, Value>> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        ApiError::Validation(vec![FieldError::new(
            &["body"],
            format!("JSON decode error: {}", e),
            "json_invalid",
        )])
    })?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::Validation(vec![FieldError::new(
            &["body"],
            "Input should be a valid object",
            "model_attributes_type",
        )])),
    }
}

fn string_field(
    obj: &Map<String, Value>,
    name: &str,
    len: RangeInclusive<usize>,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    let loc = ["body", name];
    let value = match obj.get(name) {
        None => {
            errors.push(FieldError::new(&loc, "Field required", "missing"));
            return None;
        }
        Some(Value::String(s)) => s,
        Some(_) => {
            errors.push(FieldError::new(&loc, "Input should be a valid string", "string_type"));
            return None;
        }
    };

    let count = value.chars().count();
    if count < *len.start() {
        errors.push(FieldError::new(
            &loc,
            format!("String should have at least {} characters", len.start()),
            "string_too_short",
        ));
        return None;
    }
    if count > *len.end() {
        errors.push(FieldError::new(
            &loc,
            format!("String should have at most {} characters", len.end()),
            "string_too_long",
        ));
        return None;
    }

    Some(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("eddie@mail.com", true ; "plain")]
    #[test_case("EDDIE@GMAIL.COM", true ; "uppercase")]
    #[test_case("contact+qa@mail.com", true ; "plus alias")]
    #[test_case("éd.dié@mail.com", true ; "unicode local part")]
    #[test_case("eddie[at]mail", false ; "no at sign")]
    #[test_case("   eddie@mail.com   ", false ; "surrounding spaces")]
    #[test_case("<img src=x onerror=alert(1)>", false ; "markup")]
    #[test_case("x@x", false ; "no tld")]
    fn test_email_syntax(email: &str, valid: bool) {
        assert_eq!(is_valid_email(email), valid);
    }

    #[test]
    fn test_email_rejects_overlong_label() {
        let email = format!("test@{}.com", "a".repeat(240));
        assert!(!is_valid_email(&email));
    }

    #[test]
    fn test_login_lengths_count_chars_not_bytes() {
        let body = serde_json::json!({ "username": "ñññ", "password": "1234" });
        let req = parse_login(body.to_string().as_bytes()).unwrap();
        assert_eq!(req.username, "ñññ");
    }

    #[test]
    fn test_login_reports_every_bad_field() {
        let body = serde_json::json!({ "username": "ab", "password": 7 });
        match parse_login(body.to_string().as_bytes()) {
            Err(ApiError::Validation(errors)) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].kind, "string_too_short");
                assert_eq!(errors[1].kind, "string_type");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_broken_json_is_a_validation_error() {
        match parse_contact(b"{not json") {
            Err(ApiError::Validation(errors)) => assert_eq!(errors[0].kind, "json_invalid"),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(matches!(parse_contact(b"[1,2]"), Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_contact_keeps_whitespace_verbatim() {
        let body = serde_json::json!({
            "name": "Eddie",
            "email": "eddie@mail.com",
            "message": "\n\t\r",
        });
        let req = parse_contact(body.to_string().as_bytes()).unwrap();
        assert_eq!(req.message, "\n\t\r");
    }
}
