use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tollgate_core::AuthenticatedUser;
use tracing::debug;

use crate::api::error::AppError;
use crate::app_state::SharedAppState;

/// Attach an [`AuthenticatedUser`] for known bearer tokens.
///
/// Never rejects: requests without a valid token continue anonymously and
/// are rate limited by client IP.
pub async fn attach_authenticated_user(
    State(state): State<SharedAppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "));

    if let Some(token) = token {
        match find_token_identifier(&state, token) {
            Some(user_id) => {
                debug!("Bearer token belongs to {}", user_id);
                req.extensions_mut()
                    .insert(AuthenticatedUser::new(user_id));
            }
            None => debug!("Unknown bearer token, continuing anonymously"),
        }
    }

    next.run(req).await
}

fn find_token_identifier(state: &SharedAppState, token: &str) -> Option<String> {
    for (identifier, configured_token) in &state.settings.api.bearer_tokens {
        if token.as_bytes().ct_eq(configured_token.as_bytes()).into() {
            return Some(identifier.clone());
        }
    }

    None
}

/// Extractor for handlers that require an authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}

/// Extractor for handlers that behave differently for known users.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<AuthenticatedUser>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<AuthenticatedUser>().cloned()))
    }
}
