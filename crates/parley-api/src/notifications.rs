use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{Claims, NotificationResponse, UpdateNotificationRequest};
use parley_types::time::parse_db_timestamp;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::parse_row_uuid;

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let principal = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || db.list_notifications(&principal)).await??;

    let notifications: Vec<NotificationResponse> = rows
        .iter()
        .map(|row| NotificationResponse {
            notification_id: parse_row_uuid(&row.id, "notification id"),
            message_id: parse_row_uuid(&row.message_id, "message id"),
            is_read: row.is_read,
            created_at: parse_db_timestamp(&row.created_at),
        })
        .collect();

    Ok(Json(notifications))
}

/// Acknowledge a notification. Marks the notification and its message read
/// in one transaction. Hides foreign notifications behind 404.
pub async fn update_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateNotificationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !req.is_read {
        return Err(ApiError::field(
            "is_read",
            "Notifications can only be marked read.",
        ));
    }

    let db = state.db.clone();
    let nid = notification_id.to_string();
    let principal = claims.sub.to_string();

    let marked =
        tokio::task::spawn_blocking(move || db.mark_notification_read(&nid, &principal)).await??;

    if !marked {
        return Err(ApiError::not_found("Notification not found."));
    }

    Ok(Json(serde_json::json!({ "is_read": true })))
}
