use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};

use crate::api::auth::attach_authenticated_user;
use crate::api::handlers::admin::{bucket_handler, limits_handler};
use crate::api::handlers::health::health_handler;
use crate::api::handlers::login::{login_handler, password_reset_handler};
use crate::api::handlers::resources::{
    create_item_handler, list_items_handler, public_info_handler, security_report_handler,
};
use crate::api::rate_limiting::{rate_limit_middleware, ForcedTier};
use crate::app_state::SharedAppState;
use tracing::warn;

pub const PASSWORD_RESET_TIER: &str = "auth";

pub struct ApiRoutes;

/// Forced tier for a route, if the registry knows it. Checked once while
/// building the router; unknown tiers fall back to the route table.
fn forced_tier(state: &SharedAppState, tier: &str) -> Option<ForcedTier> {
    if state.engine.registry().get(tier).is_some() {
        return Some(ForcedTier::new(tier));
    }
    warn!(
        tier,
        "Forced rate limit tier is not configured, using the route table instead"
    );
    None
}

impl ApiRoutes {
    pub fn create(state: SharedAppState) -> Router {
        let gated = Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/login", post(login_handler))
            .route("/api/admin/limits", get(limits_handler))
            .route("/api/admin/buckets/{key}", get(bucket_handler))
            .route("/api/security/report", post(security_report_handler))
            .route(
                "/api/items",
                get(list_items_handler).post(create_item_handler),
            )
            .route("/public/info", get(public_info_handler))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit_middleware,
            ));

        // Password resets draw from the login budget.
        let mut reset = Router::new()
            .route("/api/password-reset", post(password_reset_handler))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit_middleware,
            ));
        if let Some(tier) = forced_tier(&state, PASSWORD_RESET_TIER) {
            reset = reset.route_layer(Extension(tier));
        }

        gated
            .merge(reset)
            // Identity has to be known before the gate picks a bucket.
            .layer(middleware::from_fn_with_state(
                state.clone(),
                attach_authenticated_user,
            ))
            .with_state(state)
    }
}
