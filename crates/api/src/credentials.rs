//! Credential lookup behind a swappable trait
//!
//! The login handler only ever asks "does this pair match?". Any backing
//! store that answers that question can be injected into [`crate::AppState`].

use std::collections::HashMap;

use crate::error::{ApiError, ApiResult};

/// A source of username/password pairs.
pub trait CredentialStore: Send + Sync {
    /// Returns true when `username` exists and `password` matches exactly.
    fn verify(&self, username: &str, password: &str) -> bool;
}

/// Fixed in-memory accounts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentials {
    users: HashMap<String, String>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// The demo accounts the stock frontend and scenario tables expect.
    pub fn demo() -> Self {
        Self::new()
            .with_user("admin", "1234")
            .with_user("testuser", "password123")
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// Parse `user:pass,user:pass`. Empty entries are skipped.
    pub fn parse(spec: &str) -> ApiResult<Self> {
        let mut store = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (user, pass) = entry
                .split_once(':')
                .ok_or_else(|| ApiError::Config(format!("account entry '{}' is not user:pass", entry)))?;
            if user.is_empty() {
                return Err(ApiError::Config(format!("account entry '{}' has an empty username", entry)));
            }
            store = store.with_user(user, pass);
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl CredentialStore for InMemoryCredentials {
    fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .map(|expected| expected == password)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_accounts() {
        let store = InMemoryCredentials::demo();
        assert!(store.verify("admin", "1234"));
        assert!(store.verify("testuser", "password123"));
        assert!(!store.verify("admin", "wrong"));
        assert!(!store.verify("ADMIN", "1234"));
        assert!(!store.verify(" admin ", "1234"));
    }

    #[test]
    fn test_parse_accounts() {
        let store = InMemoryCredentials::parse("alice:secret, bob:hunter2,").unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.verify("bob", "hunter2"));
    }

    #[test]
    fn test_parse_rejects_malformed_entry() {
        assert!(InMemoryCredentials::parse("alice").is_err());
        assert!(InMemoryCredentials::parse(":nopass").is_err());
    }
}
