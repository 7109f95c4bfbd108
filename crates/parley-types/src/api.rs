use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared between token issuance and the auth middleware.
/// Canonical definition lives here in parley-types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
    pub token_type: String,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPairResponse {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenRefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Serialize)]
pub struct TokenRefreshResponse {
    pub access: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddParticipantsRequest {
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantResponse {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation_id: Uuid,
    pub participants: Vec<ParticipantResponse>,
    pub created_at: DateTime<Utc>,
}

/// Detail route nests a page of messages alongside the participants.
#[derive(Debug, Serialize)]
pub struct ConversationDetailResponse {
    pub conversation_id: Uuid,
    pub participants: Vec<ParticipantResponse>,
    pub messages: Vec<MessageResponse>,
    pub created_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    pub receiver: Uuid,
    #[serde(default)]
    pub parent_message: Option<Uuid>,
    /// Accepted and ignored: the sender is always the authenticated
    /// principal, never client-supplied.
    #[serde(default)]
    pub sender: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_email: String,
    pub receiver_id: Uuid,
    pub receiver_email: String,
    pub content: String,
    pub parent_message: Option<Uuid>,
    pub edited: bool,
    pub is_read: bool,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MessageHistoryResponse {
    pub history_id: Uuid,
    pub message_id: Uuid,
    pub prior_content: String,
    pub edited_by: Uuid,
    pub edited_at: DateTime<Utc>,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateNotificationRequest {
    pub is_read: bool,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub notification_id: Uuid,
    pub message_id: Uuid,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
