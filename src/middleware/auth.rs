//! Gateway-edge authentication middleware.
//!
//! Validates a shared-secret bearer token against the configured API
//! secrets. Tokens are accepted from the `Authorization` header or, for
//! WebSocket clients that cannot set headers, a `?token=` query parameter.
//! When authentication is disabled an empty [`Auth`] context is still
//! injected so handlers can rely on its presence.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use thiserror::Error;

use crate::state::AppState;

/// Authenticated client identity attached to request extensions.
#[derive(Clone, Debug, Default)]
pub struct Auth {
    /// Configured id of the matched API secret, when auth ran
    pub client_id: Option<String>,
}

impl Auth {
    /// Context for requests that did not go through authentication.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Authentication failures, rendered as 401 responses.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token in the Authorization header or query string
    #[error("Missing authentication token")]
    MissingToken,

    /// Authorization header present but not a bearer token
    #[error("Invalid Authorization header")]
    InvalidAuthHeader,

    /// Token did not match any configured API secret
    #[error("Invalid authentication token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Extract the authentication token from a request.
///
/// Priority: `Authorization: Bearer <token>` header, then `?token=<token>`
/// query parameter (browser WebSocket clients cannot set headers).
fn extract_token(request: &Request) -> Result<String, AuthError> {
    if let Some(auth_header) = request.headers().get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;
        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            return Ok(token.to_string());
        }
        return Err(AuthError::InvalidAuthHeader);
    }

    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "token" {
                return Ok(value.to_string());
            }
        }
    }

    Err(AuthError::MissingToken)
}

/// Middleware validating bearer tokens against the configured API secrets.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    if !state.config.auth_required {
        request.extensions_mut().insert(Auth::empty());
        return Ok(next.run(request).await);
    }

    let token = extract_token(&request)?;
    match state.config.find_api_secret_id(&token) {
        Some(client_id) => {
            tracing::debug!(client_id, "Request authenticated");
            request.extensions_mut().insert(Auth {
                client_id: Some(client_id.to_string()),
            });
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "Rejected request with unknown token");
            Err(AuthError::InvalidToken)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, auth_header: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(value) = auth_header {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_token_from_bearer_header() {
        let req = request("/media-stream", Some("Bearer s3cret"));
        assert_eq!(extract_token(&req).unwrap(), "s3cret");
    }

    #[test]
    fn test_token_from_query_parameter() {
        let req = request("/media-stream?token=s3cret&x=1", None);
        assert_eq!(extract_token(&req).unwrap(), "s3cret");
    }

    #[test]
    fn test_header_takes_precedence_over_query() {
        let req = request("/media-stream?token=from-query", Some("Bearer from-header"));
        assert_eq!(extract_token(&req).unwrap(), "from-header");
    }

    #[test]
    fn test_non_bearer_header_rejected() {
        let req = request("/media-stream", Some("Basic dXNlcjpwdw=="));
        assert!(matches!(
            extract_token(&req),
            Err(AuthError::InvalidAuthHeader)
        ));
    }

    #[test]
    fn test_missing_token() {
        let req = request("/media-stream", None);
        assert!(matches!(extract_token(&req), Err(AuthError::MissingToken)));
    }

    #[test]
    fn test_auth_error_maps_to_401() {
        let response = AuthError::InvalidToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
