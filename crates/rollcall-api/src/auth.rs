use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use chrono::{Duration, FixedOffset};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use rollcall_db::Database;
use rollcall_db::models::UserRow;
use rollcall_types::api::{Claims, LoginRequest, LoginResponse};
use rollcall_types::models::Role;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    /// Offset used for `HH:MM` and `server_time` strings.
    pub display_offset: FixedOffset,
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed"))
        })?
}

/// POST /login/
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(req) = payload?;
    let user = blocking(&state, move |db| {
        let user = db
            .get_user_by_username(&req.username)?
            .ok_or(ApiError::Unauthorized)?;

        // Verify password
        verify_password(&req.password, &user.password)?;
        Ok(user)
    })
    .await?;

    let user_id: Uuid = user.id.parse().map_err(anyhow::Error::from)?;
    let role: Role = user.role.parse().map_err(anyhow::Error::from)?;
    let access = create_token(&state.jwt_secret, state.token_ttl, user_id, &user.username)?;

    info!("User {} logged in", user.username);
    Ok(Json(LoginResponse {
        access,
        user_id,
        username: user.username,
        role,
    }))
}

/// Hash with Argon2id and a fresh salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

fn verify_password(password: &str, stored_hash: &str) -> Result<(), ApiError> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("stored password hash unreadable: {}", e))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| ApiError::Unauthorized)
}

pub fn create_token(
    secret: &str,
    ttl: Duration,
    user_id: Uuid,
    username: &str,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Create the first admin account if none exists. Returns true if one was
/// created.
pub fn bootstrap_admin(db: &Database, username: &str, password: &str) -> anyhow::Result<bool> {
    if db.has_admin()? {
        return Ok(false);
    }

    db.create_user(
        &UserRow {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password: hash_password(password)?,
            first_name: String::new(),
            last_name: String::new(),
            role: Role::Admin.as_str().to_string(),
        },
        &[],
    )?;
    info!("Bootstrapped admin account '{}'", username);
    Ok(true)
}
