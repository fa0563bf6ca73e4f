use crate::server::router::AppState;
use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde_json::json;
use subtle::ConstantTimeEq;

fn extract_header_token(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(k) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(k.to_string());
    }
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Key guard for the raw-SQL endpoint. Accepts `x-api-key` or a bearer token
/// and compares in constant time against `basic.service_key`; an empty
/// configured key keeps the endpoint disabled.
#[derive(Debug, Clone, Copy)]
pub struct RequireKeyAuth;

impl FromRequestParts<AppState> for RequireKeyAuth {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let expected = state.service_key.as_ref();
        if expected.is_empty() {
            return Err(AuthError::KeyNotConfigured);
        }

        match extract_header_token(&parts.headers) {
            Some(key) => {
                if key.as_bytes().ct_eq(expected.as_bytes()).into() {
                    Ok(RequireKeyAuth)
                } else {
                    Err(AuthError::InvalidKey)
                }
            }
            None => Err(AuthError::MissingKey),
        }
    }
}

pub enum AuthError {
    MissingKey,
    InvalidKey,
    KeyNotConfigured,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, reason) = match self {
            AuthError::MissingKey => (StatusCode::UNAUTHORIZED, "Missing API key"),
            AuthError::InvalidKey => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            AuthError::KeyNotConfigured => (
                StatusCode::FORBIDDEN,
                "Raw SQL execution is disabled: no service key configured",
            ),
        };
        (
            status,
            Json(json!({ "status": "error", "message": reason })),
        )
            .into_response()
    }
}
