use axum::response::Json;

use super::UserResponse;
use crate::api::{error::ErrorBody, extract::RequireAuth};
use crate::identity::Identity;

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Return the authenticated user profile.", body = UserResponse),
        (status = 401, description = "Missing, expired or invalidated access token.", body = ErrorBody),
    ),
    tag = "me"
)]
pub async fn get_me(RequireAuth(principal): RequireAuth) -> Json<UserResponse> {
    Json(UserResponse::from(principal.user()))
}
