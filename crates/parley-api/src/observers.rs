use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::MessageRow;

/// Side effects of message writes. Implementations are registered on the
/// application state and invoked synchronously after the triggering write
/// commits; a failing observer is logged and never rolls back the write.
pub trait MessageObserver: Send + Sync {
    fn message_created(&self, message: &MessageRow) -> anyhow::Result<()>;
    fn message_edited(&self, message: &MessageRow, prior_body: &str) -> anyhow::Result<()>;
}

/// Creates one notification per message, addressed to the receiver.
pub struct NotificationObserver {
    db: Arc<Database>,
}

impl NotificationObserver {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl MessageObserver for NotificationObserver {
    fn message_created(&self, message: &MessageRow) -> anyhow::Result<()> {
        self.db.insert_notification(
            &Uuid::new_v4().to_string(),
            &message.receiver_id,
            &message.id,
        )
    }

    fn message_edited(&self, _message: &MessageRow, _prior_body: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Appends one history row per content-changing edit. The editor is the
/// sender, since only the sender passes the mutation gate.
pub struct HistoryObserver {
    db: Arc<Database>,
}

impl HistoryObserver {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl MessageObserver for HistoryObserver {
    fn message_created(&self, _message: &MessageRow) -> anyhow::Result<()> {
        Ok(())
    }

    fn message_edited(&self, message: &MessageRow, prior_body: &str) -> anyhow::Result<()> {
        self.db.insert_message_history(
            &Uuid::new_v4().to_string(),
            &message.id,
            prior_body,
            &message.sender_id,
        )
    }
}

/// Fan a creation event out to every observer; failures are non-fatal.
pub fn notify_created(observers: &[Arc<dyn MessageObserver>], message: &MessageRow) {
    for observer in observers {
        if let Err(e) = observer.message_created(message) {
            warn!("message-created observer failed for {}: {:#}", message.id, e);
        }
    }
}

/// Fan an edit event out to every observer; failures are non-fatal.
pub fn notify_edited(
    observers: &[Arc<dyn MessageObserver>],
    message: &MessageRow,
    prior_body: &str,
) {
    for observer in observers {
        if let Err(e) = observer.message_edited(message, prior_body) {
            warn!("message-edited observer failed for {}: {:#}", message.id, e);
        }
    }
}
