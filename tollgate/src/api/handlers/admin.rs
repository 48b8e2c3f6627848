use axum::{
    debug_handler,
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use tollgate_core::settings::rate_limiting::ViolationAction;

use crate::api::auth::CurrentUser;
use crate::api::error::AppError;
use crate::app_state::SharedAppState;

#[debug_handler]
pub async fn limits_handler(
    State(state): State<SharedAppState>,
    CurrentUser(_user): CurrentUser,
) -> impl IntoResponse {
    let registry = state.engine.registry();
    let mut tiers: Vec<_> = registry
        .tiers()
        .map(|tier| {
            serde_json::json!({
                "name": tier.name(),
                "capacity": tier.capacity(),
                "refill_tokens": tier.refill_tokens(),
                "refill_interval_ms": tier.refill_interval_ms(),
                "report_violations": tier.on_violation() == ViolationAction::Report,
            })
        })
        .collect();
    tiers.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    Json(serde_json::json!({
        "enabled": state.settings.rate_limiting.enabled,
        "global_tier": registry.global_tier().name(),
        "default_tier": registry.default_tier().name(),
        "tiers": tiers,
        "active_buckets": state.engine.store().len(),
    }))
}

#[debug_handler]
pub async fn bucket_handler(
    State(state): State<SharedAppState>,
    CurrentUser(_user): CurrentUser,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state
        .engine
        .store()
        .get(&key)
        .ok_or_else(|| AppError::BucketNotFound(key.clone()))?;
    let idle = state
        .engine
        .clock()
        .now()
        .saturating_duration_since(snapshot.last_refill_at);

    Ok(Json(serde_json::json!({
        "key": key,
        "tokens": snapshot.tokens,
        "idle_ms": idle.as_millis() as u64,
    })))
}
