use axum::{debug_handler, response::IntoResponse, Json};

#[debug_handler]
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
