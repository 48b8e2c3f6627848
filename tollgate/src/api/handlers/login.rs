use axum::{debug_handler, extract::State, response::IntoResponse, Json};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::api::error::AppError;
use crate::app_state::SharedAppState;

#[derive(serde::Deserialize)]
pub struct FormData {
    pub username: String,
    pub password: String,
}

#[debug_handler]
pub async fn login_handler(
    State(state): State<SharedAppState>,
    Json(form): Json<FormData>,
) -> Result<impl IntoResponse, AppError> {
    debug!("Login attempt for {}", form.username);

    let valid = state
        .settings
        .api
        .users
        .get(&form.username)
        .map(|password| bool::from(form.password.as_bytes().ct_eq(password.as_bytes())))
        .unwrap_or(false);

    if !valid {
        return Err(AppError::InvalidCredentials);
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "user": form.username,
        "token": state.settings.api.bearer_tokens.get(&form.username),
    })))
}

/// Shares the login budget through a forced tier.
#[debug_handler]
pub async fn password_reset_handler(Json(form): Json<serde_json::Value>) -> impl IntoResponse {
    debug!("Password reset requested for {:?}", form.get("username"));
    // Same answer whether or not the user exists.
    Json(serde_json::json!({
        "success": true,
        "message": "If the account exists, a reset link has been sent.",
    }))
}
