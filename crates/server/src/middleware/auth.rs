use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::{
    error::{AppError, Result},
    policy::Actor,
    routes::auth::Claims,
    services::actors::load_actor,
    AppState,
};

/// Resolve the caller from a bearer token, if one is sent. Requests without
/// a token continue as anonymous; a bad token or a deactivated account is
/// rejected outright.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .map(|h| h.to_str().map_err(|_| AppError::Unauthorized))
        .transpose()?;

    if let Some(header) = header {
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized)?;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AppError::Unauthorized)?;

        let actor = load_actor(&state.db.pool, &token_data.claims.sub)
            .await?
            .ok_or(AppError::Unauthorized)?;

        request.extensions_mut().insert(actor);
    }

    Ok(next.run(request).await)
}

// Extractor for routes that need a signed-in caller
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Actor>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// The caller on routes that also serve anonymous readers.
#[derive(Debug, Clone)]
pub struct MaybeActor(pub Option<Actor>);

impl MaybeActor {
    pub fn actor(&self) -> Option<&Actor> {
        self.0.as_ref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        Ok(MaybeActor(parts.extensions.get::<Actor>().cloned()))
    }
}
