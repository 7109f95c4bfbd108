use axum::{Extension, Json, extract::State, response::IntoResponse};

use parley_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Delete the authenticated user. Foreign keys cascade: every message they
/// sent or received, their notifications, and their participant rows go in
/// one statement; conversations themselves persist. A partial failure
/// aborts the whole delete.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let principal = claims.sub.to_string();

    let deleted = tokio::task::spawn_blocking(move || db.delete_user(&principal)).await??;

    if !deleted {
        return Err(ApiError::not_found("User not found."));
    }

    Ok(Json(serde_json::json!({
        "message": format!("User {} deleted successfully.", claims.email),
    })))
}
