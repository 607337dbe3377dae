use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use tally_types::TallyError;
use tally_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;
use crate::state::AppState;

const TOKEN_TTL_DAYS: i64 = 30;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username_len = req.username.chars().count();
    if !(3..=32).contains(&username_len) {
        return Err(TallyError::InvalidInput("username must be 3-32 characters".into()).into());
    }
    if req.password.len() < 8 {
        return Err(TallyError::InvalidInput("password must be at least 8 characters".into()).into());
    }

    let db = state.clone();
    let username = req.username.clone();
    let user_id = tokio::task::spawn_blocking(move || -> anyhow::Result<Uuid> {
        if db.db.get_user_by_username(&username)?.is_some() {
            return Err(TallyError::UsernameTaken.into());
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
            .to_string();

        let user_id = Uuid::new_v4();
        db.db.create_user(&user_id.to_string(), &username, &password_hash)?;
        Ok(user_id)
    })
    .await
    .map_err(anyhow::Error::from)??;

    info!(%user_id, username = %req.username, "user registered");
    let token = create_token(&state.jwt_secret, user_id, &req.username)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let user = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let user = db
            .db
            .get_user_by_username(&req.username)?
            .ok_or(TallyError::InvalidCredentials)?;

        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|e| anyhow::anyhow!("stored password hash is corrupt: {}", e))?;
        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .map_err(|_| TallyError::InvalidCredentials)?;

        Ok(user.into_user())
    })
    .await
    .map_err(anyhow::Error::from)??;

    let token = create_token(&state.jwt_secret, user.id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
