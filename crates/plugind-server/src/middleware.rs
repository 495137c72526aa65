//! Authentication middleware.
//!
//! Protected routes require a bearer token validated against the identity
//! service, and the caller's tenant must be the master tenant. Until the
//! master tenant has been learned the API answers 503 `not-initialized`.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use plugind_core::PlugindError;

use crate::error::ApiErrorResponse;
use crate::state::AppState;

const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Reject requests without a valid master-tenant token.
pub async fn verify_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiErrorResponse> {
    let token = extract_token(req.headers()).ok_or_else(ApiErrorResponse::unauthorized)?;

    let master_tenant = state
        .master_tenant()
        .ok_or_else(|| ApiErrorResponse::from(PlugindError::NotInitialized))?;

    let info = state
        .auth
        .check_token(&token)
        .await
        .map_err(|_| ApiErrorResponse::unauthorized())?;

    if info.tenant_uuid.as_deref() != Some(master_tenant.as_str()) {
        return Err(ApiErrorResponse::unauthorized());
    }

    Ok(next.run(req).await)
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers.get(AUTH_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
