pub mod access;
pub mod auth;
pub mod conversations;
pub mod error;
pub mod filters;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod observers;
pub mod rate_limit;
pub mod users;

use axum::Router;
use axum::routing::{delete, get, patch, post};
use tracing::warn;
use uuid::Uuid;

use crate::auth::AppState;

/// Stored ids are written by this service and should always parse; a row
/// that does not is corrupt, worth a warning but not a 500.
pub(crate) fn parse_row_uuid(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", context, raw, e);
        Uuid::default()
    })
}

/// Assemble the full route table. The server binary layers CORS and tracing
/// on top; tests drive this router directly.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/token", post(auth::token))
        .route("/token/refresh", post(auth::token_refresh))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::throttle,
        ))
        .with_state(state.clone());

    // Layer order is inside-out: require_auth runs first, then the
    // principal-keyed throttle, then the request log.
    let protected = Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation),
        )
        .route(
            "/conversations/{conversation_id}/participants",
            post(conversations::add_participants),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::list_conversation_messages).post(messages::send_message),
        )
        .route(
            "/conversations/{conversation_id}/messages/{message_id}",
            get(messages::get_message_nested)
                .patch(messages::update_message_nested)
                .delete(messages::delete_message_nested),
        )
        .route("/messages", get(messages::list_messages))
        .route("/messages/unread", get(messages::list_unread))
        .route(
            "/messages/{message_id}",
            get(messages::get_message)
                .patch(messages::update_message)
                .delete(messages::delete_message),
        )
        .route(
            "/messages/{message_id}/history",
            get(messages::get_message_history),
        )
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/{notification_id}",
            patch(notifications::update_notification),
        )
        .route("/users/me", delete(users::delete_me))
        .layer(axum::middleware::from_fn(middleware::request_log))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::throttle,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new().merge(public).merge(protected)
}
