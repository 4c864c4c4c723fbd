//! Request context resolved from the `Authorization` header.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use std::sync::Arc;
use tracing::error;

use super::{error::ApiError, state::AppState};
use crate::identity::{Principal, RequestIdentity};

/// Bearer token from `Authorization`, if present and non-empty.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(state) = parts.extensions.get::<Arc<AppState>>().cloned() else {
            error!("AppState extension missing from router");
            return Err(ApiError::Internal);
        };
        let token = extract_bearer_token(&parts.headers);
        Ok(state.sessions().authenticate(token.as_deref()).await?)
    }
}

/// Extractor that rejects requests without a principal with 401.
///
/// The code is `UNAUTHORIZED` when no usable token was sent, or the token
/// rejection reason (`TOKEN_EXPIRED`, `INVALID_TOKEN`, `MALFORMED_TOKEN`).
#[derive(Clone, Debug)]
pub struct RequireAuth(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match RequestIdentity::from_request_parts(parts, state).await? {
            RequestIdentity::Authenticated(principal) => Ok(Self(principal)),
            RequestIdentity::Rejected(reason) => Err(ApiError::Auth(reason.into())),
            RequestIdentity::Anonymous => Err(ApiError::Unauthorized),
        }
    }
}
