use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use qa_api::{ApiConfig, AppState, InMemoryCredentials};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let addr: SocketAddr = std::env::var("QA_API_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
        .parse()?;

    // QA_ACCOUNTS=user:pass,user:pass replaces the demo accounts entirely.
    let credentials = match std::env::var("QA_ACCOUNTS") {
        Ok(list) if !list.trim().is_empty() => InMemoryCredentials::parse(&list)?,
        _ => InMemoryCredentials::demo(),
    };

    let frontend_dir = std::env::var("QA_FRONTEND_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);

    info!(
        "Starting QA API on http://{} ({} accounts)",
        addr,
        credentials.len()
    );

    let config = ApiConfig {
        state: AppState::new(Arc::new(credentials)),
        frontend_dir,
    };

    qa_api::serve(addr, config).await
}
