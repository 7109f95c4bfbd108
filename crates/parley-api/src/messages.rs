use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{MessageHistoryRow, MessageRow, NewMessage};
use parley_types::api::{
    Claims, MessageHistoryResponse, MessageResponse, SendMessageRequest, UpdateMessageRequest,
};
use parley_types::time::parse_db_timestamp;

use crate::access::{self, OnMiss, require_participation};
use crate::auth::AppState;
use crate::error::ApiError;
use crate::filters::{parse_message_filters, parse_page};
use crate::observers;
use crate::parse_row_uuid;

pub(crate) fn message_response(row: &MessageRow) -> MessageResponse {
    MessageResponse {
        message_id: parse_row_uuid(&row.id, "message id"),
        conversation_id: parse_row_uuid(&row.conversation_id, "conversation id"),
        sender_id: parse_row_uuid(&row.sender_id, "sender id"),
        sender_email: row.sender_email.clone(),
        receiver_id: parse_row_uuid(&row.receiver_id, "receiver id"),
        receiver_email: row.receiver_email.clone(),
        content: row.body.clone(),
        parent_message: row.parent_id.as_deref().map(|p| parse_row_uuid(p, "parent id")),
        edited: row.edited,
        is_read: row.is_read,
        sent_at: parse_db_timestamp(&row.sent_at),
    }
}

/// Resolve a message the principal may see.
///
/// Nested routes (`conversation_id` present) gate on the conversation
/// first: absent conversation → 404, non-participant → 403, message outside
/// the conversation → 404. The direct route gates on the message's own
/// conversation.
fn load_scoped_message(
    db: &Database,
    conversation_id: Option<&str>,
    message_id: &str,
    principal: &str,
) -> Result<MessageRow, ApiError> {
    if let Some(cid) = conversation_id {
        if db.get_conversation(cid)?.is_none() {
            return Err(ApiError::not_found("Conversation not found."));
        }
        require_participation(db.is_participant(cid, principal)?, OnMiss::Forbid)?;
    }

    let Some(row) = db.get_message(message_id)? else {
        return Err(ApiError::not_found("Message not found."));
    };

    match conversation_id {
        Some(cid) if row.conversation_id != cid => {
            Err(ApiError::not_found("Message not found."))
        }
        Some(_) => Ok(row),
        None => {
            require_participation(
                db.is_participant(&row.conversation_id, principal)?,
                OnMiss::Forbid,
            )?;
            Ok(row)
        }
    }
}

pub async fn list_conversation_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = parse_message_filters(&params)?;
    let page = parse_page(&params)?;

    let db = state.db.clone();
    let cid = conversation_id.to_string();
    let principal = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<MessageRow>, ApiError> {
        if db.get_conversation(&cid)?.is_none() {
            return Err(ApiError::not_found("Conversation not found."));
        }
        require_participation(db.is_participant(&cid, &principal)?, OnMiss::Forbid)?;
        Ok(db.list_conversation_messages(&cid, &filters, page)?)
    })
    .await??;

    let messages: Vec<MessageResponse> = rows.iter().map(message_response).collect();
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message_id = Uuid::new_v4();

    let db = state.db.clone();
    let observer_list = state.observers.clone();
    let cid = conversation_id.to_string();
    let sender = claims.sub;

    // Run blocking DB work off the async runtime; observers fire inside the
    // same closure, after the insert has committed.
    let row = tokio::task::spawn_blocking(move || -> Result<MessageRow, ApiError> {
        // Ordered gate: existence, then participation, then input
        // validation. The store re-checks membership inside the insert
        // transaction, so these pre-checks only fix error precedence.
        if db.get_conversation(&cid)?.is_none() {
            return Err(ApiError::not_found("Conversation not found."));
        }
        require_participation(db.is_participant(&cid, &sender.to_string())?, OnMiss::Forbid)?;

        access::validate_body(&req.content)?;
        // The sender is always the principal; a client-supplied sender field
        // is accepted and ignored.
        access::validate_receiver(sender, req.receiver)?;

        let sender_id = sender.to_string();
        let receiver_id = req.receiver.to_string();
        let parent_id = req.parent_message.map(|p| p.to_string());

        let row = db
            .create_message(&NewMessage {
                id: &message_id.to_string(),
                conversation_id: &cid,
                sender_id: &sender_id,
                receiver_id: &receiver_id,
                body: &req.content,
                parent_id: parent_id.as_deref(),
            })
            .map_err(ApiError::from_store)?;

        observers::notify_created(&observer_list, &row);
        Ok(row)
    })
    .await??;

    Ok((StatusCode::CREATED, Json(message_response(&row))))
}

pub async fn get_message_nested(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    read_message(state, Some(conversation_id), message_id, claims).await
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    read_message(state, None, message_id, claims).await
}

async fn read_message(
    state: AppState,
    conversation_id: Option<Uuid>,
    message_id: Uuid,
    claims: Claims,
) -> Result<Json<MessageResponse>, ApiError> {
    let db = state.db.clone();
    let cid = conversation_id.map(|c| c.to_string());
    let mid = message_id.to_string();
    let principal = claims.sub.to_string();

    let row = tokio::task::spawn_blocking(move || {
        load_scoped_message(&db, cid.as_deref(), &mid, &principal)
    })
    .await??;

    Ok(Json(message_response(&row)))
}

pub async fn update_message_nested(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    update_message_inner(state, Some(conversation_id), message_id, claims, req).await
}

pub async fn update_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    update_message_inner(state, None, message_id, claims, req).await
}

async fn update_message_inner(
    state: AppState,
    conversation_id: Option<Uuid>,
    message_id: Uuid,
    claims: Claims,
    req: UpdateMessageRequest,
) -> Result<Json<MessageResponse>, ApiError> {
    let db = state.db.clone();
    let observer_list = state.observers.clone();
    let cid = conversation_id.map(|c| c.to_string());
    let mid = message_id.to_string();
    let principal = claims.sub;

    let row = tokio::task::spawn_blocking(move || -> Result<MessageRow, ApiError> {
        let row = load_scoped_message(&db, cid.as_deref(), &mid, &principal.to_string())?;
        access::require_sender(parse_row_uuid(&row.sender_id, "sender id"), principal)?;
        access::validate_body(&req.content)?;

        match db
            .update_message_body(&mid, &req.content)
            .map_err(ApiError::from_store)?
        {
            Some(prior) => {
                let updated = db
                    .get_message(&mid)?
                    .ok_or_else(|| anyhow::anyhow!("updated message vanished: {}", mid))?;
                observers::notify_edited(&observer_list, &updated, &prior);
                Ok(updated)
            }
            // Writing identical content is a no-op: no history, no edited flag.
            None => Ok(row),
        }
    })
    .await??;

    Ok(Json(message_response(&row)))
}

pub async fn delete_message_nested(
    State(state): State<AppState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    delete_message_inner(state, Some(conversation_id), message_id, claims).await
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    delete_message_inner(state, None, message_id, claims).await
}

async fn delete_message_inner(
    state: AppState,
    conversation_id: Option<Uuid>,
    message_id: Uuid,
    claims: Claims,
) -> Result<StatusCode, ApiError> {
    let db = state.db.clone();
    let cid = conversation_id.map(|c| c.to_string());
    let mid = message_id.to_string();
    let principal = claims.sub;

    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        let row = load_scoped_message(&db, cid.as_deref(), &mid, &principal.to_string())?;
        access::require_sender(parse_row_uuid(&row.sender_id, "sender id"), principal)?;
        db.delete_message(&mid)?;
        Ok(())
    })
    .await??;

    Ok(StatusCode::NO_CONTENT)
}

/// Union of messages across every conversation the principal participates
/// in, equivalent to concatenating each conversation's list, deduplicated.
pub async fn list_messages(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let filters = parse_message_filters(&params)?;
    let page = parse_page(&params)?;

    let db = state.db.clone();
    let principal = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || {
        db.list_participating_messages(&principal, &filters, page)
    })
    .await??;

    let messages: Vec<MessageResponse> = rows.iter().map(message_response).collect();
    Ok(Json(messages))
}

pub async fn list_unread(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let page = parse_page(&params)?;

    let db = state.db.clone();
    let principal = claims.sub.to_string();

    let rows =
        tokio::task::spawn_blocking(move || db.list_unread_messages(&principal, page)).await??;

    let messages: Vec<MessageResponse> = rows.iter().map(message_response).collect();
    Ok(Json(messages))
}

pub async fn get_message_history(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let mid = message_id.to_string();
    let principal = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<MessageHistoryRow>, ApiError> {
        load_scoped_message(&db, None, &mid, &principal)?;
        Ok(db.list_message_history(&mid)?)
    })
    .await??;

    let history: Vec<MessageHistoryResponse> = rows
        .iter()
        .map(|row| MessageHistoryResponse {
            history_id: parse_row_uuid(&row.id, "history id"),
            message_id: parse_row_uuid(&row.message_id, "message id"),
            prior_content: row.prior_body.clone(),
            edited_by: parse_row_uuid(&row.edited_by, "editor id"),
            edited_at: parse_db_timestamp(&row.edited_at),
        })
        .collect();

    Ok(Json(history))
}
