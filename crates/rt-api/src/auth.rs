use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;
use crate::state::AppState;

/// Middleware that validates `Authorization: Bearer <key>` against the
/// configured `ADMIN_API_KEY`.
pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match validate_bearer(req.headers(), &state.config.admin_api_key) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

fn validate_bearer(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    if expected.is_empty() || token != expected {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_must_match() {
        assert!(validate_bearer(&headers("Bearer admin-key"), "admin-key").is_ok());
        assert!(validate_bearer(&headers("Bearer wrong"), "admin-key").is_err());
        assert!(validate_bearer(&headers("Basic admin-key"), "admin-key").is_err());
        assert!(validate_bearer(&HeaderMap::new(), "admin-key").is_err());
        assert!(validate_bearer(&headers("Bearer "), "").is_err());
    }
}
