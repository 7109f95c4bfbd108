use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::info;

use parley_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the bearer access token, inserting `Claims` into
/// the request extensions. Refresh tokens are not accepted here.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthenticated)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthenticated)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthenticated)?;

    if token_data.claims.token_type != "access" {
        return Err(ApiError::Unauthenticated);
    }

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

/// Log each request with its principal. Runs inside `require_auth`, so the
/// claims extension is populated on protected routes.
pub async fn request_log(req: Request, next: Next) -> Response {
    let principal = req
        .extensions()
        .get::<Claims>()
        .map(|c| c.email.clone())
        .unwrap_or_else(|| "anonymous".to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("{} {} {}", principal, method, path);

    next.run(req).await
}
