//! The single declared contract for the demo API
//!
//! Served at `/openapi.json`. Length limits come from [`crate::validation`]
//! so the document cannot drift from what the handlers enforce.

use serde_json::{json, Value};

use crate::validation::{EMAIL_MAX_LEN, MESSAGE_LEN, NAME_LEN, PASSWORD_LEN, USERNAME_LEN};

pub const OPENAPI_PATH: &str = "/openapi.json";

/// Build the OpenAPI 3.0.3 document.
pub fn document() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "QA Automation API",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": {
            "/health": {
                "get": {
                    "operationId": "health",
                    "summary": "Health",
                    "responses": {
                        "200": json_response("Service is up", "Health"),
                    },
                },
            },
            "/api/login": {
                "post": {
                    "operationId": "login",
                    "summary": "Login",
                    "tags": ["API"],
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": { "schema": schema_ref("LoginRequest") },
                        },
                    },
                    "responses": {
                        "200": json_response("Successful Response", "LoginResponse"),
                        "401": json_response("Unauthorized - Invalid credentials", "ErrorMessage"),
                        "422": json_response("Validation Error", "HTTPValidationError"),
                    },
                },
            },
            "/api/contact": {
                "post": {
                    "operationId": "contact",
                    "summary": "Contact",
                    "tags": ["API"],
                    "requestBody": {
                        "required": true,
                        "content": {
                            "application/json": { "schema": schema_ref("ContactRequest") },
                        },
                    },
                    "responses": {
                        "200": json_response("Successful Response", "ContactResponse"),
                        "422": json_response("Validation Error", "HTTPValidationError"),
                    },
                },
            },
        },
        "components": {
            "schemas": {
                "Health": {
                    "type": "object",
                    "required": ["status"],
                    "properties": {
                        "status": { "type": "string", "enum": ["ok"] },
                    },
                },
                "LoginRequest": {
                    "type": "object",
                    "required": ["username", "password"],
                    "properties": {
                        "username": string_schema(*USERNAME_LEN.start(), *USERNAME_LEN.end()),
                        "password": string_schema(*PASSWORD_LEN.start(), *PASSWORD_LEN.end()),
                    },
                },
                "LoginResponse": {
                    "type": "object",
                    "required": ["access_token", "token_type", "message"],
                    "properties": {
                        "access_token": { "type": "string", "minLength": 1 },
                        "token_type": { "type": "string", "enum": ["bearer"] },
                        "message": { "type": "string" },
                    },
                },
                "ErrorMessage": {
                    "type": "object",
                    "required": ["detail"],
                    "properties": {
                        "detail": { "type": "string" },
                    },
                },
                "ContactRequest": {
                    "type": "object",
                    "required": ["name", "email", "message"],
                    "properties": {
                        "name": string_schema(*NAME_LEN.start(), *NAME_LEN.end()),
                        "email": {
                            "type": "string",
                            "format": "email",
                            "maxLength": EMAIL_MAX_LEN,
                        },
                        "message": string_schema(*MESSAGE_LEN.start(), *MESSAGE_LEN.end()),
                    },
                },
                "ContactResponse": {
                    "type": "object",
                    "required": ["status", "message"],
                    "properties": {
                        "status": { "type": "string", "enum": ["ok"] },
                        "message": { "type": "string" },
                    },
                },
                "ValidationError": {
                    "type": "object",
                    "required": ["loc", "msg", "type"],
                    "properties": {
                        "loc": { "type": "array", "items": { "type": "string" } },
                        "msg": { "type": "string" },
                        "type": { "type": "string" },
                    },
                },
                "HTTPValidationError": {
                    "type": "object",
                    "required": ["detail"],
                    "properties": {
                        "detail": { "type": "array", "items": schema_ref("ValidationError") },
                    },
                },
            },
        },
    })
}

fn schema_ref(name: &str) -> Value {
    json!({ "$ref": format!("#/components/schemas/{}", name) })
}

fn json_response(description: &str, schema: &str) -> Value {
    json!({
        "description": description,
        "content": {
            "application/json": { "schema": schema_ref(schema) },
        },
    })
}

fn string_schema(min: usize, max: usize) -> Value {
    json!({ "type": "string", "minLength": min, "maxLength": max })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_declares_every_route() {
        let doc = document();
        let paths = doc["paths"].as_object().unwrap();
        assert!(paths.contains_key("/health"));
        assert!(paths.contains_key("/api/login"));
        assert!(paths.contains_key("/api/contact"));
        assert!(doc["paths"]["/api/login"]["post"]["responses"]["401"].is_object());
    }

    #[test]
    fn test_every_ref_resolves() {
        let doc = document();
        let text = doc.to_string();
        let schemas = doc["components"]["schemas"].as_object().unwrap();
        for part in text.split("#/components/schemas/").skip(1) {
            let name: String = part.chars().take_while(|c| c.is_alphanumeric()).collect();
            assert!(schemas.contains_key(&name), "dangling $ref to {}", name);
        }
    }
}
