//! Shared fixtures: the service under test started in-process

#![allow(dead_code)]

use qa_api::{ApiConfig, RunningServer};
use qa_harness::HarnessConfig;

pub async fn start_service() -> RunningServer {
    RunningServer::start("127.0.0.1:0".parse().unwrap(), ApiConfig::default())
        .await
        .expect("start in-process service")
}

/// Defaults pointed at `server`, with short readiness and request bounds.
pub fn config_for(server: &RunningServer) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.target.base_url = server.base_url();
    config.target.readiness_timeout_secs = 5;
    config.target.request_timeout_ms = 5_000;
    config.fuzz.seed = Some(7);
    config
}
