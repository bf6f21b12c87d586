//! # Meridian REST Control Plane
//!
//! HTTP(S) API for managing zones, RRSets, templates and replication.
//!
//! Every mutating endpoint commits through the store, bumps the zone's
//! SOA serial, and publishes a zones-changed event so the DNS plane
//! drops its caches. Authentication is bearer-token based (bcrypt hash
//! preferred, plaintext deprecated, permissive when unconfigured), with
//! an optional CIDR allow-list in front.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use meridian_cache::ZoneEvents;
use meridian_config::Config;
use meridian_store::{SoaPolicy, Store, StoreError};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

mod handlers;
pub mod tls;

/// REST layer error, translated to a status code at the boundary.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("rrset already exists")]
    Conflict { existing_id: i64 },

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::Conflict { existing_id } => Self::Conflict { existing_id },
            StoreError::InvalidName(msg) => Self::BadRequest(msg),
            StoreError::Sqlx(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<meridian_zone::ZoneIoError> for ApiError {
    fn from(err: meridian_zone::ZoneIoError) -> Self {
        match err {
            meridian_zone::ZoneIoError::Store(e) => e.into(),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not found" })),
            )
                .into_response(),
            Self::Conflict { existing_id } => (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "rrset already exists",
                    "existing_id": existing_id,
                })),
            )
                .into_response(),
            Self::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
            Self::Internal(msg) => {
                warn!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": msg })),
                )
                    .into_response()
            }
        }
    }
}

/// Result type for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Shared control-plane state.
pub struct AppState {
    /// The zone catalog.
    pub store: Store,
    /// Server configuration.
    pub config: Arc<Config>,
    /// Zones-changed publisher.
    pub events: ZoneEvents,
}

impl AppState {
    /// SOA synthesis policy from the configuration.
    pub fn soa_policy(&self) -> SoaPolicy {
        SoaPolicy {
            auto_on_missing: self.config.soa.auto_on_missing,
            primary: self.config.soa.primary.clone(),
            hostmaster: self.config.soa.hostmaster.clone(),
        }
    }
}

/// Builds the control-plane router.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/zones", post(handlers::create_zone).get(handlers::list_zones))
        .route(
            "/zones/:id",
            get(handlers::get_zone).delete(handlers::delete_zone),
        )
        .route(
            "/zones/:id/rrsets",
            post(handlers::create_rrset).get(handlers::list_rrsets),
        )
        .route(
            "/zones/:id/rrsets/:rid",
            axum::routing::put(handlers::update_rrset)
                .patch(handlers::update_rrset)
                .delete(handlers::delete_rrset),
        )
        .route("/zones/:id/export", get(handlers::export_zone))
        .route("/zones/:id/import", post(handlers::import_zone))
        .route(
            "/templates",
            post(handlers::create_template).get(handlers::list_templates),
        )
        .route(
            "/templates/:id",
            get(handlers::get_template).delete(handlers::delete_template),
        )
        .route(
            "/zones/:id/templates/:tid/apply",
            post(handlers::apply_template),
        )
        .route("/sync/export", get(handlers::sync_export))
        .route("/sync/import", post(handlers::sync_import))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .merge(api);

    if state.config.has_ip_acl() {
        app = app.layer(middleware::from_fn_with_state(state.clone(), acl_middleware));
    }

    app.layer(middleware::from_fn(log_middleware))
        .with_state(state)
}

/// Request logging in the API log format.
async fn log_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client = client_ip_of(&req)
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    let start = Instant::now();

    let response = next.run(req).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        client = %client,
        "api request"
    );
    response
}

/// Bearer-token authentication.
///
/// Order of precedence: bcrypt hash, plaintext token, then permissive
/// when neither credential is configured.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    let config = &state.config;
    let authenticated = if !config.api_token_hash.is_empty() {
        bcrypt::verify(token, &config.api_token_hash).unwrap_or(false)
    } else if !config.api_token.is_empty() {
        token == config.api_token
    } else {
        true
    };

    if !authenticated {
        return ApiError::Unauthorized.into_response();
    }
    next.run(req).await
}

/// IP allow-list. Active only when `allowed_cidrs` is non-empty.
async fn acl_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let networks = state.config.acl_networks();
    let allowed = client_ip_of(&req)
        .map(|ip| networks.iter().any(|n| n.contains(ip)))
        .unwrap_or(false);

    if !allowed {
        return StatusCode::FORBIDDEN.into_response();
    }
    next.run(req).await
}

fn client_ip_of(req: &Request) -> Option<std::net::IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
}

/// Runs the control plane until the shutdown signal fires. Uses TLS
/// when both certificate files are configured.
pub async fn serve(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let addr = state
        .config
        .rest_addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;

    if let Some((cert, key)) = state.config.tls_paths() {
        let reloader = tls::CertReloader::new(&cert, &key)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        let reloader = Arc::new(reloader);
        if state.config.tls_reload_sec > 0 {
            reloader.spawn_reload_task(
                std::time::Duration::from_secs(state.config.tls_reload_sec),
                shutdown.resubscribe(),
            );
            info!(
                addr = %addr,
                reload_sec = state.config.tls_reload_sec,
                "REST API listening with HTTPS"
            );
        } else {
            info!(addr = %addr, "REST API listening with HTTPS (cert reload disabled)");
        }
        return tls::serve_tls(listener, reloader, app, shutdown).await;
    }

    info!(addr = %addr, "REST API listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    })
    .await
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    pub async fn state_with(config: Config) -> Arc<AppState> {
        let store = Store::connect("sqlite", "sqlite::memory:").await.unwrap();
        store.migrate().await.unwrap();
        Arc::new(AppState {
            store,
            config: Arc::new(config),
            events: ZoneEvents::new(),
        })
    }

    pub fn base_config() -> Config {
        Config::from_yaml("db:\n  driver: sqlite\n  dsn: \"sqlite::memory:\"\n").unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_permissive_without_credentials() {
        let state = state_with(base_config()).await;
        let app = router(state);
        let (status, _) = send(
            app,
            "POST",
            "/zones",
            None,
            Some(serde_json::json!({"name": "example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_plaintext_token_enforced() {
        let mut config = base_config();
        config.api_token = "sekrit".to_string();
        let state = state_with(config).await;
        let app = router(state);

        let (status, _) = send(app.clone(), "GET", "/zones", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(app.clone(), "GET", "/zones", Some("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(app, "GET", "/zones", Some("sekrit"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bcrypt_token_verified() {
        let hash = bcrypt::hash("topsecret", 4).unwrap();
        let mut config = base_config();
        config.api_token_hash = hash;
        let state = state_with(config).await;
        let app = router(state);

        let (status, _) = send(app.clone(), "GET", "/zones", Some("nope"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(app, "GET", "/zones", Some("topsecret"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let mut config = base_config();
        config.api_token = "sekrit".to_string();
        let state = state_with(config).await;
        let app = router(state);

        let (status, body) = send(app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_acl_rejects_unknown_client() {
        let mut config = base_config();
        config.allowed_cidrs = vec!["10.0.0.0/8".to_string()];
        let state = state_with(config).await;
        let app = router(state);

        // No ConnectInfo on the request: the ACL cannot place the client
        // inside an allowed network, so it refuses.
        let (status, _) = send(app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
