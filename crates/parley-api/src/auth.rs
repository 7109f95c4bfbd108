use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::{
    Claims, RegisterRequest, RegisterResponse, TokenPairResponse, TokenRefreshRequest,
    TokenRefreshResponse, TokenRequest,
};

use crate::error::ApiError;
use crate::observers::MessageObserver;
use crate::rate_limit::RateLimiter;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    /// Fired synchronously after message writes commit; each entry is
    /// individually best-effort.
    pub observers: Vec<Arc<dyn MessageObserver>>,
    pub limiter: RateLimiter,
}

const ACCESS_TTL_MINUTES: i64 = 60;
const REFRESH_TTL_DAYS: i64 = 30;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !req.email.contains('@') || req.email.len() < 3 || req.email.len() > 254 {
        return Err(ApiError::field("email", "Enter a valid email address."));
    }
    if req.password.len() < 8 {
        return Err(ApiError::field(
            "password",
            "Password must be at least 8 characters.",
        ));
    }
    if req.display_name.trim().is_empty() || req.display_name.len() > 100 {
        return Err(ApiError::field(
            "display_name",
            "Display name must be non-blank and at most 100 characters.",
        ));
    }

    if state.db.get_user_by_email(&req.email)?.is_some() {
        return Err(ApiError::Conflict("Email is already registered.".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();

    state.db.create_user(
        &user_id.to_string(),
        &req.email,
        &password_hash,
        req.display_name.trim(),
    )?;

    let access = create_token(&state.jwt_secret, user_id, &req.email, "access")?;
    let refresh = create_token(&state.jwt_secret, user_id, &req.email, "refresh")?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            access,
            refresh,
        }),
    ))
}

/// Exchange email + password for an access/refresh token pair.
pub async fn token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .get_user_by_email(&req.email)?
        .ok_or(ApiError::Unauthenticated)?;

    if !user.is_active {
        return Err(ApiError::Unauthenticated);
    }

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored password hash is corrupt: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthenticated)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;

    let access = create_token(&state.jwt_secret, user_id, &user.email, "access")?;
    let refresh = create_token(&state.jwt_secret, user_id, &user.email, "refresh")?;

    Ok(Json(TokenPairResponse { access, refresh }))
}

/// Exchange a refresh token for a fresh access token. The user must still
/// exist and be active.
pub async fn token_refresh(
    State(state): State<AppState>,
    Json(req): Json<TokenRefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let data = decode::<Claims>(
        &req.refresh,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthenticated)?;

    if data.claims.token_type != "refresh" {
        return Err(ApiError::Unauthenticated);
    }

    let user = state
        .db
        .get_user_by_id(&data.claims.sub.to_string())?
        .ok_or(ApiError::Unauthenticated)?;
    if !user.is_active {
        return Err(ApiError::Unauthenticated);
    }

    let access = create_token(&state.jwt_secret, data.claims.sub, &user.email, "access")?;

    Ok(Json(TokenRefreshResponse { access }))
}

fn create_token(
    secret: &str,
    user_id: Uuid,
    email: &str,
    token_type: &str,
) -> anyhow::Result<String> {
    let ttl = match token_type {
        "refresh" => chrono::Duration::days(REFRESH_TTL_DAYS),
        _ => chrono::Duration::minutes(ACCESS_TTL_MINUTES),
    };

    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
        token_type: token_type.to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
