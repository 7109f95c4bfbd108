use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::models::{ConversationRow, MessageRow, UserRow};
use parley_types::api::{
    AddParticipantsRequest, Claims, ConversationDetailResponse, ConversationResponse,
    CreateConversationRequest, ParticipantResponse,
};
use parley_types::filters::{MessageFilters, Page};
use parley_types::time::parse_db_timestamp;

use crate::access::{OnMiss, require_participation};
use crate::auth::AppState;
use crate::error::ApiError;
use crate::filters::parse_conversation_filters;
use crate::messages::message_response;
use crate::parse_row_uuid;

fn participant_response(user: &UserRow) -> ParticipantResponse {
    ParticipantResponse {
        user_id: parse_row_uuid(&user.id, "user id"),
        email: user.email.clone(),
        display_name: user.display_name.clone(),
    }
}

fn conversation_response(row: &ConversationRow, participants: &[UserRow]) -> ConversationResponse {
    ConversationResponse {
        conversation_id: parse_row_uuid(&row.id, "conversation id"),
        participants: participants.iter().map(participant_response).collect(),
        created_at: parse_db_timestamp(&row.created_at),
    }
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = parse_conversation_filters(&params)?;

    let db = state.db.clone();
    let principal = claims.sub.to_string();

    let (rows, participant_rows) = tokio::task::spawn_blocking(
        move || -> anyhow::Result<(Vec<ConversationRow>, Vec<(String, UserRow)>)> {
            let rows = db.list_conversations(&principal, &filters)?;
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let participant_rows = db.participants_for_conversations(&ids)?;
            Ok((rows, participant_rows))
        },
    )
    .await??;

    // Group participants by conversation id
    let mut by_conversation: HashMap<String, Vec<UserRow>> = HashMap::new();
    for (conversation_id, user) in participant_rows {
        by_conversation.entry(conversation_id).or_default().push(user);
    }

    let conversations: Vec<ConversationResponse> = rows
        .iter()
        .map(|row| {
            let participants = by_conversation.get(&row.id).map(Vec::as_slice).unwrap_or(&[]);
            conversation_response(row, participants)
        })
        .collect();

    Ok(Json(conversations))
}

/// The principal is not auto-included; they join only by listing
/// themselves. Unresolvable ids are skipped, not an error: conversation
/// creation is best-effort.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = Uuid::new_v4();

    let db = state.db.clone();
    let requested: Vec<String> = req.participant_ids.iter().map(Uuid::to_string).collect();

    let (row, participants) = tokio::task::spawn_blocking(
        move || -> anyhow::Result<(ConversationRow, Vec<UserRow>)> {
            let existing = db.existing_user_ids(&requested)?;
            let cid = conversation_id.to_string();
            db.create_conversation(&cid, &existing)?;
            let row = db
                .get_conversation(&cid)?
                .ok_or_else(|| anyhow::anyhow!("created conversation not found: {}", cid))?;
            let participants = db.get_participants(&cid)?;
            Ok((row, participants))
        },
    )
    .await??;

    Ok((
        StatusCode::CREATED,
        Json(conversation_response(&row, &participants)),
    ))
}

/// Detail route: hides existence from non-participants (404, not 403),
/// deliberately different from the nested message routes. See DESIGN.md.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let principal = claims.sub.to_string();

    type Detail = (ConversationRow, Vec<UserRow>, Vec<MessageRow>);
    let (row, participants, message_rows) =
        tokio::task::spawn_blocking(move || -> Result<Detail, ApiError> {
            let Some(row) = db.get_conversation(&cid)? else {
                return Err(ApiError::not_found("Conversation not found."));
            };
            require_participation(db.is_participant(&cid, &principal)?, OnMiss::Hide)?;

            let participants = db.get_participants(&cid)?;
            let message_rows =
                db.list_conversation_messages(&cid, &MessageFilters::default(), Page::default())?;
            Ok((row, participants, message_rows))
        })
        .await??;

    Ok(Json(ConversationDetailResponse {
        conversation_id: parse_row_uuid(&row.id, "conversation id"),
        participants: participants.iter().map(participant_response).collect(),
        messages: message_rows.iter().map(message_response).collect(),
        created_at: parse_db_timestamp(&row.created_at),
    }))
}

/// Membership is add-only; unresolvable ids are skipped like on create.
pub async fn add_participants(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddParticipantsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let principal = claims.sub.to_string();
    let requested: Vec<String> = req.participant_ids.iter().map(Uuid::to_string).collect();

    let (row, participants) = tokio::task::spawn_blocking(
        move || -> Result<(ConversationRow, Vec<UserRow>), ApiError> {
            let Some(row) = db.get_conversation(&cid)? else {
                return Err(ApiError::not_found("Conversation not found."));
            };
            require_participation(db.is_participant(&cid, &principal)?, OnMiss::Hide)?;

            let existing = db.existing_user_ids(&requested)?;
            db.add_participants(&cid, &existing)?;
            let participants = db.get_participants(&cid)?;
            Ok((row, participants))
        },
    )
    .await??;

    Ok(Json(conversation_response(&row, &participants)))
}
