use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use parley_db::StoreError;

/// Field name → list of problems, rendered under "errors" in 400 bodies.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("invalid input")]
    Validation(FieldErrors),
    #[error("request was throttled")]
    Throttled,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::Forbidden(detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(detail.into())
    }

    /// Single-field validation failure.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.into(), vec![message.into()]);
        Self::Validation(errors)
    }

    /// Map a store failure onto the API taxonomy. Call sites that hide
    /// existence (the conversation detail route) override the
    /// `NotParticipant` mapping themselves.
    pub fn from_store(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::ConversationNotFound) => {
                Self::not_found("Conversation not found.")
            }
            Some(StoreError::MessageNotFound) => Self::not_found("Message not found."),
            Some(StoreError::NotParticipant) => {
                Self::forbidden("You are not a participant of this conversation.")
            }
            Some(StoreError::ReceiverNotParticipant) => Self::field(
                "receiver",
                "Receiver must be a participant of the conversation.",
            ),
            Some(StoreError::InvalidParent) => Self::field(
                "parent_message",
                "Parent message must belong to the conversation.",
            ),
            _ => Self::Internal(err),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": "Authentication credentials were not provided or are invalid." })),
            )
                .into_response(),
            Self::Forbidden(detail) => {
                (StatusCode::FORBIDDEN, Json(json!({ "detail": detail }))).into_response()
            }
            Self::NotFound(detail) => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": detail }))).into_response()
            }
            Self::Conflict(detail) => {
                (StatusCode::CONFLICT, Json(json!({ "detail": detail }))).into_response()
            }
            Self::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": "Invalid input.", "errors": errors })),
            )
                .into_response(),
            Self::Throttled => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "detail": "Request was throttled." })),
            )
                .into_response(),
            Self::Internal(err) => {
                error!("internal error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "Internal server error." })),
                )
                    .into_response()
            }
        }
    }
}
