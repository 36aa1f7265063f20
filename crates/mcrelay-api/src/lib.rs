//! Dashboard gateway
//!
//! Serves the wrapper listing, manual retry and game status endpoints plus the
//! WebSocket console relay. Everything except `/api/health` and `/api/openapi.json`
//! sits behind the shared-key [`middleware::require_auth`] layer.

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod relay;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use mcrelay_control::ConnectionRegistry;
use mcrelay_http_auth::AuthError;
use mcrelay_status::StatusProbe;
use std::future::Future;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;

use crate::middleware::AuthState;

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub probe: Arc<dyn StatusProbe>,
    /// Game port used when a wrapper has no explicit status address
    pub default_status_port: u16,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "mcrelay API",
        version = "0.1.0",
        description = "Supervise remote game server consoles through one authenticated gateway"
    ),
    paths(
        handlers::list_wrappers,
        handlers::retry_wrapper,
        handlers::server_status,
        handlers::health_check,
    ),
    components(
        schemas(
            models::WrapperStatus,
            models::WrapperStats,
            models::Wrapper,
            models::ServerStatusResponse,
            models::RetryResponse,
            models::HealthResponse,
            models::ErrorResponse,
        )
    ),
    tags(
        (name = "wrappers", description = "Wrapper connection endpoints"),
        (name = "system", description = "System health and info endpoints")
    )
)]
pub struct ApiDoc;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Pre-shared key required on every protected route
    pub auth_key: String,
    /// Enable CORS (for development)
    pub enable_cors: bool,
    pub default_status_port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            auth_key: String::new(),
            enable_cors: false,
            default_status_port: mcrelay_connection::DEFAULT_STATUS_PORT,
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
    auth: Arc<AuthState>,
}

impl ApiServer {
    /// Create a new API server
    ///
    /// # Errors
    /// Fails if the configured auth key is empty.
    pub fn new(
        config: ApiServerConfig,
        registry: Arc<ConnectionRegistry>,
        probe: Arc<dyn StatusProbe>,
    ) -> Result<Self, AuthError> {
        let auth = Arc::new(AuthState::new(config.auth_key.clone())?);
        let state = Arc::new(AppState {
            registry,
            probe,
            default_status_port: config.default_status_port,
        });

        Ok(Self {
            config,
            state,
            auth,
        })
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        // Build PUBLIC routes (no authentication required)
        let public_router = Router::new()
            .route("/api/health", get(handlers::health_check))
            .route("/api/openapi.json", get(handlers::openapi_json))
            .with_state(self.state.clone());

        // Build PROTECTED routes (require the shared key)
        let protected_router = Router::new()
            .route("/api/wrappers", get(handlers::list_wrappers))
            .route("/api/retry", post(handlers::retry_wrapper))
            .route("/api/serverstatus", get(handlers::server_status))
            .route("/ws", get(relay::relay_socket))
            .with_state(self.state.clone())
            .layer(axum_middleware::from_fn_with_state(
                self.auth.clone(),
                middleware::require_auth,
            ));

        let mut router = public_router
            .merge(protected_router)
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            use tower_http::cors::AllowOrigin;

            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::AUTHORIZATION,
                    HeaderName::from_static("x-auth-key"),
                ])
                .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }));

            router = router.layer(cors);
        }

        router
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!("Starting API server on {}", listener.local_addr()?);
        info!(
            "OpenAPI spec: http://{}/api/openapi.json",
            self.config.bind_addr
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/wrappers"));
        assert!(doc.paths.paths.contains_key("/api/serverstatus"));
    }
}
