//! Map identity failures onto HTTP responses.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::identity::AuthError;

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
}

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    /// Refresh was called without the refresh cookie.
    NoRefreshToken,
    /// An authenticated principal was required.
    Unauthorized,
    InvalidBody(String),
    Internal,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(err) => auth_status(err),
            Self::NoRefreshToken | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        let (message, code) = match self {
            Self::Auth(err) => (err.client_message(), err.code()),
            Self::NoRefreshToken => ("no refresh token provided".to_string(), "NO_REFRESH_TOKEN"),
            Self::Unauthorized => ("authentication required".to_string(), "UNAUTHORIZED"),
            Self::InvalidBody(message) => (message.clone(), "INPUT_FORMAT_ERROR"),
            Self::Internal => ("internal server error".to_string(), "INTERNAL_SERVER_ERROR"),
        };
        ErrorBody {
            message,
            code: code.to_string(),
        }
    }
}

fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials
        | AuthError::InvalidRefreshToken
        | AuthError::RefreshTokenExpired
        | AuthError::SessionInvalidated
        | AuthError::UserNotFound
        | AuthError::TokenExpired
        | AuthError::InvalidToken
        | AuthError::MalformedToken => StatusCode::UNAUTHORIZED,
        AuthError::AccountLinkConflict | AuthError::UserAlreadyExists => StatusCode::CONFLICT,
        AuthError::InvalidInput(_) | AuthError::ProviderIdentityMissing => StatusCode::BAD_REQUEST,
        AuthError::TokenCreation(_) | AuthError::PasswordHashing(_) | AuthError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            match &self {
                Self::Auth(err) => error!("request failed: {err:#}"),
                _ => error!("request failed: {status}"),
            }
        } else if let Self::Auth(err) = &self {
            warn!(code = err.code(), "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StoreError;

    #[test]
    fn credential_failures_are_unauthorized() {
        for err in [
            AuthError::InvalidCredentials,
            AuthError::RefreshTokenExpired,
            AuthError::SessionInvalidated,
            AuthError::TokenExpired,
            AuthError::MalformedToken,
        ] {
            assert_eq!(ApiError::from(err).status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn conflicts_and_input_errors() {
        assert_eq!(
            ApiError::from(AuthError::UserAlreadyExists).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(AuthError::AccountLinkConflict).status(),
            StatusCode::CONFLICT
        );
        let err = ApiError::from(AuthError::InvalidInput("email is required".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.body(),
            ErrorBody {
                message: "email is required".to_string(),
                code: "INPUT_FORMAT_ERROR".to_string(),
            }
        );
    }

    #[test]
    fn internal_details_are_hidden() {
        let err = ApiError::from(AuthError::Store(StoreError::backend(anyhow::anyhow!(
            "connection refused to 10.0.0.5"
        ))));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = err.body();
        assert_eq!(body.code, "INTERNAL_SERVER_ERROR");
        assert!(!body.message.contains("10.0.0.5"));

        let err = ApiError::from(AuthError::PasswordHashing(anyhow::anyhow!("argon2: bad params")));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body().message, "internal server error");
    }

    #[test]
    fn transport_only_codes() {
        assert_eq!(ApiError::NoRefreshToken.body().code, "NO_REFRESH_TOKEN");
        assert_eq!(ApiError::Unauthorized.body().code, "UNAUTHORIZED");
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }
}
