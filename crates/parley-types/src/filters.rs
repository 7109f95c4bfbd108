use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Filter criteria for message lists. Every field is independently optional;
/// present fields AND-combine. Applied only after the authorized set has been
/// narrowed by participation.
#[derive(Debug, Default, Clone)]
pub struct MessageFilters {
    /// Inclusive lower bound on `sent_at`.
    pub sent_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `sent_at`.
    pub sent_before: Option<DateTime<Utc>>,
    pub sender: Option<Uuid>,
    pub receiver: Option<Uuid>,
    /// The message's conversation must contain this user.
    pub participant: Option<Uuid>,
    /// Case-insensitive substring match against the body.
    pub content: Option<String>,
    /// Free-text OR match across body and sender/receiver identity fields.
    pub search: Option<String>,
}

impl MessageFilters {
    pub fn is_empty(&self) -> bool {
        self.sent_after.is_none()
            && self.sent_before.is_none()
            && self.sender.is_none()
            && self.receiver.is_none()
            && self.participant.is_none()
            && self.content.is_none()
            && self.search.is_none()
    }
}

/// Filter criteria for conversation lists.
#[derive(Debug, Default, Clone)]
pub struct ConversationFilters {
    pub participant: Option<Uuid>,
    /// The conversation must contain ALL of these users (AND, not ANY).
    pub specific_participants: Vec<Uuid>,
    /// Bounds on the conversation's messages' timestamps, used as an
    /// activity-window proxy.
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// Pagination for message lists: newest first, `before` excludes anything at
/// or after the cursor timestamp.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: u32,
    pub before: Option<DateTime<Utc>>,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 50, before: None }
    }
}
