//! QA demo API
//!
//! The one canonical login/contact service the harness targets. Handlers are
//! deliberately thin: validation, a credential lookup and a canned reply.
//!
//! Routes:
//! - `GET  /health`        liveness, `{"status":"ok"}`
//! - `GET  /openapi.json`  the declared contract
//! - `POST /api/login`     200 | 401 | 422
//! - `POST /api/contact`   200 | 422
//!
//! Every response carries the security headers in [`SECURITY_HEADERS`]
//! unless a handler already set them.

pub mod credentials;
pub mod error;
pub mod openapi;
pub mod validation;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use credentials::{CredentialStore, InMemoryCredentials};
pub use error::{ApiError, ApiResult};

/// Headers added to every response when absent.
pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-embedder-policy", "require-corp"),
    ("cross-origin-resource-policy", "same-origin"),
    ("cache-control", "no-store"),
];

pub const SESSION_COOKIE: &str = "qa_session";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    credentials: Arc<dyn CredentialStore>,
}

impl AppState {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryCredentials::demo()))
    }
}

/// Service configuration
#[derive(Clone, Default)]
pub struct ApiConfig {
    pub state: AppState,

    /// Serve the static frontend pages from this directory as a fallback.
    pub frontend_dir: Option<PathBuf>,
}

/// Build the router.
pub fn router(config: ApiConfig) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route(openapi::OPENAPI_PATH, get(openapi_handler))
        .route("/api/login", post(login_handler))
        .route("/api/contact", post(contact_handler))
        .with_state(config.state);

    if let Some(dir) = config.frontend_dir {
        info!("Serving frontend pages from {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(middleware::from_fn(security_headers))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the process exits.
pub async fn serve(addr: SocketAddr, config: ApiConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("QA API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(config)).await?;
    Ok(())
}

/// A server running on a background task, stopped on drop.
pub struct RunningServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl RunningServer {
    /// Bind `addr` (port 0 picks a free port) and serve in the background.
    pub async fn start(addr: SocketAddr, config: ApiConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();

        let app = router(config);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
        });

        debug!("QA API started on {}", addr);
        Ok(Self {
            addr,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await??;
        }
        Ok(())
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn security_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    for &(name, value) in SECURITY_HEADERS {
        headers
            .entry(HeaderName::from_static(name))
            .or_insert_with(|| HeaderValue::from_static(value));
    }
    resp
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn openapi_handler() -> impl IntoResponse {
    Json(openapi::document())
}

async fn login_handler(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let req = validation::parse_login(&body)?;

    if !state.credentials.verify(&req.username, &req.password) {
        debug!("Rejected login for '{}'", req.username);
        return Err(ApiError::InvalidCredentials);
    }

    let token = Uuid::new_v4().simple().to_string();
    let cookie = format!("{}={}; HttpOnly; SameSite=Strict; Path=/", SESSION_COOKIE, token);
    let cookie = HeaderValue::from_str(&cookie).map_err(|e| {
        warn!("Session cookie rejected: {}", e);
        ApiError::Config(format!("session cookie: {}", e))
    })?;

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({
            "access_token": token,
            "token_type": "bearer",
            "message": "Login successful",
        })),
    )
        .into_response())
}

async fn contact_handler(body: Bytes) -> ApiResult<Json<serde_json::Value>> {
    let req = validation::parse_contact(&body)?;
    info!(
        name = %req.name,
        email = %req.email,
        message_len = req.message.chars().count(),
        "Contact message received"
    );
    Ok(Json(serde_json::json!({
        "status": "ok",
        "message": "Message received",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use test_case::test_case;
    use tower::ServiceExt;

    async fn call(method: Method, uri: &str, body: serde_json::Value) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        let app = router(ApiConfig::default());
        let req = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, headers, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, _, body) = call(Method::GET, "/health", serde_json::Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_login_success_sets_session_cookie() {
        let (status, headers, body) = call(
            Method::POST,
            "/api/login",
            serde_json::json!({ "username": "admin", "password": "1234" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
        assert!(headers[header::SET_COOKIE].to_str().unwrap().starts_with("qa_session="));
    }

    #[test_case("admin", "wrong", 401 ; "wrong password")]
    #[test_case("notfound", "1234", 401 ; "unknown user")]
    #[test_case("ab", "1234", 422 ; "username too short")]
    #[test_case("admin", "123", 422 ; "password too short")]
    #[tokio::test]
    async fn test_login_rejections(username: &str, password: &str, expected: u16) {
        let (status, _, body) = call(
            Method::POST,
            "/api/login",
            serde_json::json!({ "username": username, "password": password }),
        )
        .await;
        assert_eq!(status.as_u16(), expected);
        assert!(body.get("detail").is_some());
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let (_, headers, _) = call(Method::GET, "/openapi.json", serde_json::Value::Null).await;
        for (name, value) in SECURITY_HEADERS {
            assert_eq!(headers[*name], *value, "header {}", name);
        }
    }

    #[tokio::test]
    async fn test_contact_accepts_short_message() {
        let (status, _, body) = call(
            Method::POST,
            "/api/contact",
            serde_json::json!({ "name": "Eddie", "email": "eddie@mail.com", "message": "Hi" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
