/// Database row types — these map directly to SQLite rows.
/// Distinct from parley-types API models to keep the DB layer independent.
/// Ids and timestamps stay as TEXT here; the API edge parses them.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_admin: bool,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub created_at: String,
}

/// Sender/receiver identity comes from a JOIN against users so list
/// responses never need a second lookup.
#[derive(Debug)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_email: String,
    pub receiver_id: String,
    pub receiver_email: String,
    pub body: String,
    pub parent_id: Option<String>,
    pub edited: bool,
    pub is_read: bool,
    pub sent_at: String,
    pub created_at: String,
}

pub struct MessageHistoryRow {
    pub id: String,
    pub message_id: String,
    pub prior_body: String,
    pub edited_by: String,
    pub edited_at: String,
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub is_read: bool,
    pub created_at: String,
}

/// Input for the transactional message insert.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub body: &'a str,
    pub parent_id: Option<&'a str>,
}
