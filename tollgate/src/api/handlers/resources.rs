use axum::{debug_handler, extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::api::auth::MaybeUser;
use crate::api::error::AppError;
use crate::app_state::SharedAppState;

#[debug_handler]
pub async fn list_items_handler(MaybeUser(user): MaybeUser) -> impl IntoResponse {
    Json(serde_json::json!({
        "owner": user.map(|user| user.id),
        "items": ["alpha", "beta", "gamma"],
    }))
}

#[derive(Debug, Deserialize)]
pub struct NewItem {
    pub name: String,
}

#[debug_handler]
pub async fn create_item_handler(Json(item): Json<NewItem>) -> Result<impl IntoResponse, AppError> {
    if item.name.trim().is_empty() {
        return Err(AppError::InvalidInput("name must not be empty".to_string()));
    }
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": Uuid::new_v4(), "name": item.name })),
    ))
}

#[debug_handler]
pub async fn security_report_handler(Json(report): Json<serde_json::Value>) -> impl IntoResponse {
    let id = Uuid::new_v4();
    info!("Security report {} received: {}", id, report);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "success": true, "id": id })),
    )
}

#[debug_handler]
pub async fn public_info_handler(State(state): State<SharedAppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "tollgate",
        "version": env!("CARGO_PKG_VERSION"),
        "rate_limiting": state.settings.rate_limiting.enabled,
    }))
}
