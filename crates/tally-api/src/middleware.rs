use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};
use std::convert::Infallible;
use uuid::Uuid;

use tally_types::TallyError;
use tally_types::api::Claims;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate the JWT from the Authorization header. Requests
/// without a valid token never reach the handler.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = bearer_claims(req.headers(), &state.jwt_secret).ok_or(TallyError::Unauthenticated)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// The caller on public read routes. A missing or invalid token makes the
/// viewer anonymous rather than failing the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Viewer(pub Option<Uuid>);

impl Viewer {
    pub fn id(&self) -> Option<Uuid> {
        self.0
    }
}

impl FromRequestParts<AppState> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(claims) = parts.extensions.get::<Claims>() {
            return Ok(Self(Some(claims.sub)));
        }
        Ok(Self(bearer_claims(&parts.headers, &state.jwt_secret).map(|c| c.sub)))
    }
}

fn bearer_claims(headers: &HeaderMap, secret: &str) -> Option<Claims> {
    let bearer = headers.typed_get::<Authorization<Bearer>>()?;

    decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}
