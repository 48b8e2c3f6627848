use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tollgate_core::settings::rate_limiting::ViolationAction;
use tracing::debug;

use super::response::{apply_headers, too_many_requests};
use super::ForcedTier;
use crate::app_state::SharedAppState;

const FALLBACK_MESSAGE: &str = "Too many requests, please try again later.";

fn is_exempt(exempt_paths: &[String], path: &str) -> bool {
    exempt_paths.iter().any(|exempt| {
        path == exempt
            || path
                .strip_prefix(exempt.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

pub async fn rate_limit_middleware(
    State(state): State<SharedAppState>,
    req: Request,
    next: Next,
) -> Response {
    let config = &state.settings.rate_limiting;
    if !config.enabled || is_exempt(&config.exempt_paths, req.uri().path()) {
        return next.run(req).await;
    }

    let ctx = state.context_builder.build(&req);
    let decision = match req.extensions().get::<ForcedTier>() {
        Some(ForcedTier(tier)) => state.engine.admit_as(&ctx, tier),
        None => state.engine.admit(&ctx),
    };
    crate::metrics::record_decision(&decision);

    if decision.allowed {
        let mut response = next.run(req).await;
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    let tier = decision
        .limiting_tier
        .as_deref()
        .and_then(|name| state.engine.registry().get(name));
    debug!(
        tier = ?decision.limiting_tier,
        identity = %ctx.identity,
        path = %ctx.path,
        retry_after_ms = decision.retry_after_ms,
        "Request denied"
    );

    let report = tier.is_none_or(|tier| tier.on_violation() == ViolationAction::Report);
    if report {
        state.reporter.report(&ctx, &decision);
    }

    let message = tier.map(|tier| tier.message()).unwrap_or(FALLBACK_MESSAGE);
    too_many_requests(&decision, message)
}
