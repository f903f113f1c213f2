use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::warn;

use rollcall_types::api::Claims;

use crate::auth::{AppState, blocking};
use crate::error::ApiError;

/// Extract and validate the JWT, then load the caller from storage.
///
/// Handlers receive the current `User` as an extension. Role and group
/// membership come from the database, never from the token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?
    .claims;

    let user_id = claims.sub.to_string();
    let user = blocking(&state, move |db| Ok(db.load_user(&user_id)?)).await?;
    let Some(user) = user else {
        warn!("Token for deleted user {} ({})", claims.username, claims.sub);
        return Err(ApiError::Unauthorized);
    };

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
