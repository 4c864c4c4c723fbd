//! Session endpoints: register, login, refresh, logout.
//!
//! The refresh token only ever travels in the refresh cookie; response bodies
//! carry the access token.

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::{MessageResponse, UserResponse};
use crate::api::{
    error::{ApiError, ErrorBody},
    extract::RequireAuth,
    state::AppState,
};
use crate::identity::{Identity, Registration};

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email.
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub user: UserResponse,
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Missing or malformed field", body = ErrorBody),
        (status = 409, description = "Username or email already in use", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn register(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let user = state
        .sessions()
        .register(Registration {
            username: request.username,
            email: request.email,
            password: request.password,
            name: request.name,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session started; refresh token set as cookie", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let outcome = state
        .sessions()
        .login(&request.login, &request.password)
        .await?;

    let cookie = state
        .cookies()
        .refresh_cookie(&outcome.refresh_token)
        .map_err(|err| {
            error!("Failed to build refresh cookie: {err}");
            ApiError::Internal
        })?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);

    let user = UserResponse::from(outcome.user());
    let body = TokenResponse {
        access_token: outcome.access_token,
        user,
    };
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    responses(
        (status = 200, description = "New access token", body = TokenResponse),
        (status = 401, description = "Missing, invalid, expired or invalidated refresh token", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn refresh(headers: HeaderMap, Extension(state): Extension<Arc<AppState>>) -> Response {
    let Some(token) = state.cookies().extract(&headers) else {
        return with_cleared_cookie(&state, ApiError::NoRefreshToken);
    };

    match state.sessions().refresh(&token).await {
        Ok(outcome) => {
            let body = TokenResponse {
                access_token: outcome.access_token,
                user: UserResponse::from(&outcome.user),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) if err.clears_refresh_credential() => {
            with_cleared_cookie(&state, ApiError::from(err))
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Refresh token revoked and cookie cleared", body = MessageResponse),
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, Extension(state): Extension<Arc<AppState>>) -> Response {
    let token = state.cookies().extract(&headers);
    // Always clear the cookie, even if revocation failed.
    if let Err(err) = state.sessions().logout(token.as_deref()).await {
        error!("Failed to revoke refresh token: {err}");
    }
    with_cleared_cookie(&state, Json(MessageResponse::new("logged out")))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    responses(
        (status = 200, description = "Every session of the caller invalidated", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn logout_all(
    Extension(state): Extension<Arc<AppState>>,
    RequireAuth(principal): RequireAuth,
) -> Result<Response, ApiError> {
    state
        .sessions()
        .sign_out_everywhere(principal.user_id())
        .await?;
    Ok(with_cleared_cookie(
        &state,
        Json(MessageResponse::new("signed out of every session")),
    ))
}

fn with_cleared_cookie(state: &AppState, response: impl IntoResponse) -> Response {
    let mut headers = HeaderMap::new();
    match state.cookies().clear_cookie() {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build clearing cookie: {err}"),
    }
    (headers, response).into_response()
}
