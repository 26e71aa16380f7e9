//! Readiness checks against the live service and frontend
//!
//! Nothing in the harness assumes the target is up. Every component's setup
//! phase polls here first, with a bounded deadline, so an unreachable
//! service surfaces as an environment failure instead of a wall of
//! verification errors.

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Polls a URL until it answers with a 2xx or the deadline passes.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    url: String,
    timeout: Duration,
    interval: Duration,
    expect_status_ok: bool,
}

impl ReadinessProbe {
    /// Probe `{base_url}/health` and require `{"status":"ok"}`.
    pub fn health(base_url: &str, timeout: Duration) -> Self {
        Self {
            url: format!("{}/health", base_url.trim_end_matches('/')),
            timeout,
            interval: Duration::from_millis(100),
            expect_status_ok: true,
        }
    }

    /// Probe an arbitrary page, any 2xx counts.
    pub fn page(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            interval: Duration::from_millis(100),
            expect_status_ok: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait for the target to respond
    pub async fn wait_until_ready(&self) -> HarnessResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match client.get(&self.url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    if !self.expect_status_ok {
                        debug!("{} ready after {} attempt(s)", self.url, attempts);
                        return Ok(());
                    }
                    match resp.json::<serde_json::Value>().await {
                        Ok(body) if body.get("status").and_then(|s| s.as_str()) == Some("ok") => {
                            info!("Service ready at {} ({} attempt(s))", self.url, attempts);
                            return Ok(());
                        }
                        Ok(body) => warn!("Health check answered {} without status ok", body),
                        Err(e) => warn!("Health check body unreadable: {}", e),
                    }
                }
                Ok(resp) => {
                    warn!("Readiness check returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for {} ...", self.url);
                    }
                    // Connection refused is expected while the service is starting
                    if !e.is_connect() {
                        warn!("Readiness check error: {}", e);
                    }
                }
            }

            if start.elapsed() + self.interval >= self.timeout {
                break;
            }
            sleep(self.interval).await;
        }

        Err(HarnessError::ServiceUnavailable {
            url: self.url.clone(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_url_joins_cleanly() {
        let probe = ReadinessProbe::health("http://127.0.0.1:8000/", Duration::from_secs(1));
        assert_eq!(probe.url(), "http://127.0.0.1:8000/health");
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_within_deadline() {
        // Port 9 (discard) on loopback is essentially never served.
        let probe = ReadinessProbe::health("http://127.0.0.1:9", Duration::from_millis(300))
            .with_interval(Duration::from_millis(50));

        let start = Instant::now();
        let err = probe.wait_until_ready().await.unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        match err {
            HarnessError::ServiceUnavailable { attempts, .. } => assert!(attempts >= 1),
            other => panic!("unexpected error: {}", other),
        }
    }
}
