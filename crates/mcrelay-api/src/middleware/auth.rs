//! Shared-key Authentication Middleware
//!
//! Wraps every protected route. The wrapped handler only runs when the request carries
//! the configured key via `Authorization: Bearer`, `X-Auth-Key` or `?auth=`.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use mcrelay_http_auth::{AuthError, AuthResult, SharedKeyAuthenticator};
use std::sync::Arc;
use tracing::warn;

use crate::models::ErrorResponse;

/// Authenticator shared across middleware instances
#[derive(Debug, Clone)]
pub struct AuthState {
    pub authenticator: Arc<SharedKeyAuthenticator>,
}

impl AuthState {
    pub fn new(key: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Self {
            authenticator: Arc::new(SharedKeyAuthenticator::new(key)?),
        })
    }
}

/// Reject requests that do not carry the shared key
///
/// # Errors
/// Returns 401 Unauthorized if no credential is present or it does not match.
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let result = state
        .authenticator
        .authenticate(request.headers(), request.uri().query());

    match result {
        AuthResult::Authenticated(_) => Ok(next.run(request).await),
        AuthResult::Missing => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Missing authentication key", "MISSING_AUTH")),
        )),
        AuthResult::Invalid(channel) => {
            warn!(
                path = %request.uri().path(),
                %channel,
                "Rejected request with invalid authentication key"
            );
            Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse::new("Invalid authentication key", "INVALID_AUTH")),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        let state = Arc::new(AuthState::new("k3y").unwrap());
        Router::new()
            .route("/protected", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state, require_auth))
    }

    async fn status_of(request: axum::http::Request<Body>) -> StatusCode {
        app().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_missing_key() {
        let request = axum::http::Request::get("/protected")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_key_via_header() {
        let request = axum::http::Request::get("/protected")
            .header("X-Auth-Key", "k3y")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_key_via_query() {
        let request = axum::http::Request::get("/protected?auth=nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status_of(request).await, StatusCode::UNAUTHORIZED);
    }
}
