use crate::models::{
    ConversationRow, MessageHistoryRow, MessageRow, NewMessage, NotificationRow, UserRow,
};
use crate::{Database, StoreError};
use anyhow::{Result, anyhow};
use parley_types::filters::{ConversationFilters, MessageFilters, Page};
use parley_types::time::to_db_timestamp;
use rusqlite::Connection;

const MESSAGE_COLS: &str = "m.id, m.conversation_id, m.sender_id, su.email, \
     m.receiver_id, ru.email, m.body, m.parent_id, m.edited, m.is_read, \
     m.sent_at, m.created_at";

const MESSAGE_JOINS: &str = "FROM messages m \
     LEFT JOIN users su ON su.id = m.sender_id \
     LEFT JOIN users ru ON ru.id = m.receiver_id";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        display_name: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, password, display_name) VALUES (?1, ?2, ?3, ?4)",
                (id, email, password_hash, display_name),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Which of the given ids resolve to existing users. Used to silently
    /// skip unresolvable participant ids on conversation create/add.
    pub fn existing_user_ids(&self, ids: &[String]) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Delete a user. Foreign keys cascade: their messages (as sender or
    /// receiver), notifications, participant rows, and history/notification
    /// rows hanging off deleted messages all go in the same statement.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(affected > 0)
        })
    }

    // -- Conversations --

    pub fn create_conversation(&self, id: &str, participant_ids: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("INSERT INTO conversations (id) VALUES (?1)", [id])?;
            for user_id in participant_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id) \
                     VALUES (?1, ?2)",
                    (id, user_id),
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, created_at FROM conversations WHERE id = ?1")?;
            let row = stmt
                .query_row([id], |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    /// Membership is add-only; there is no removal counterpart.
    pub fn add_participants(&self, conversation_id: &str, user_ids: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for user_id in user_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id) \
                     VALUES (?1, ?2)",
                    (conversation_id, user_id),
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| participant_exists(conn, conversation_id, user_id))
    }

    pub fn get_participants(&self, conversation_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.email, u.password, u.display_name, u.is_active, u.is_staff, \
                        u.is_admin, u.created_at \
                 FROM conversation_participants cp \
                 JOIN users u ON u.id = cp.user_id \
                 WHERE cp.conversation_id = ?1 \
                 ORDER BY u.email",
            )?;
            let rows = stmt
                .query_map([conversation_id], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch participants for a set of conversation ids.
    pub fn participants_for_conversations(
        &self,
        conversation_ids: &[String],
    ) -> Result<Vec<(String, UserRow)>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=conversation_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT cp.conversation_id, u.id, u.email, u.password, u.display_name, \
                        u.is_active, u.is_staff, u.is_admin, u.created_at \
                 FROM conversation_participants cp \
                 JOIN users u ON u.id = cp.user_id \
                 WHERE cp.conversation_id IN ({}) \
                 ORDER BY u.email",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = conversation_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        UserRow {
                            id: row.get(1)?,
                            email: row.get(2)?,
                            password: row.get(3)?,
                            display_name: row.get(4)?,
                            is_active: row.get(5)?,
                            is_staff: row.get(6)?,
                            is_admin: row.get(7)?,
                            created_at: row.get(8)?,
                        },
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Conversations where the principal participates, further narrowed by
    /// the filter criteria. The participation clause comes first; filters
    /// only ever narrow it.
    pub fn list_conversations(
        &self,
        principal: &str,
        filters: &ConversationFilters,
    ) -> Result<Vec<ConversationRow>> {
        let mut sql = String::from(
            "SELECT c.id, c.created_at FROM conversations c \
             WHERE EXISTS (SELECT 1 FROM conversation_participants cp \
                           WHERE cp.conversation_id = c.id AND cp.user_id = ?1)",
        );
        let mut params: Vec<String> = vec![principal.to_string()];

        if let Some(participant) = filters.participant {
            params.push(participant.to_string());
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM conversation_participants cp \
                  WHERE cp.conversation_id = c.id AND cp.user_id = ?{})",
                params.len()
            ));
        }

        // AND semantics: one membership clause per listed id.
        for user_id in &filters.specific_participants {
            params.push(user_id.to_string());
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM conversation_participants cp \
                  WHERE cp.conversation_id = c.id AND cp.user_id = ?{})",
                params.len()
            ));
        }

        // Activity window: bounds on the conversation's messages' timestamps.
        if let Some(after) = filters.created_after {
            params.push(to_db_timestamp(after));
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM messages m \
                  WHERE m.conversation_id = c.id AND m.sent_at >= ?{})",
                params.len()
            ));
        }
        if let Some(before) = filters.created_before {
            params.push(to_db_timestamp(before));
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM messages m \
                  WHERE m.conversation_id = c.id AND m.sent_at <= ?{})",
                params.len()
            ));
        }

        sql.push_str(" ORDER BY c.created_at DESC, c.id");

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message. Conversation existence and both participation
    /// checks run inside the same transaction as the insert, so the checked
    /// state cannot shift under it. Domain failures surface as `StoreError`.
    pub fn create_message(&self, new: &NewMessage) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let conversation_exists: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM conversations WHERE id = ?1)",
                [new.conversation_id],
                |row| row.get(0),
            )?;
            if !conversation_exists {
                return Err(StoreError::ConversationNotFound.into());
            }

            if !participant_exists(&tx, new.conversation_id, new.sender_id)? {
                return Err(StoreError::NotParticipant.into());
            }
            if !participant_exists(&tx, new.conversation_id, new.receiver_id)? {
                return Err(StoreError::ReceiverNotParticipant.into());
            }

            if let Some(parent_id) = new.parent_id {
                let parent_ok: bool = tx.query_row(
                    "SELECT EXISTS (SELECT 1 FROM messages \
                     WHERE id = ?1 AND conversation_id = ?2)",
                    (parent_id, new.conversation_id),
                    |row| row.get(0),
                )?;
                if !parent_ok {
                    return Err(StoreError::InvalidParent.into());
                }
            }

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, body, parent_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    new.id,
                    new.conversation_id,
                    new.sender_id,
                    new.receiver_id,
                    new.body,
                    new.parent_id,
                ],
            )?;

            let row = query_message(&tx, new.id)?
                .ok_or_else(|| anyhow!("inserted message not found: {}", new.id))?;

            tx.commit()?;
            Ok(row)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    pub fn list_conversation_messages(
        &self,
        conversation_id: &str,
        filters: &MessageFilters,
        page: Page,
    ) -> Result<Vec<MessageRow>> {
        let mut params: Vec<String> = vec![conversation_id.to_string()];
        let mut sql = format!(
            "SELECT {} {} WHERE m.conversation_id = ?1",
            MESSAGE_COLS, MESSAGE_JOINS
        );
        push_message_filters(filters, &mut sql, &mut params);
        push_page(page, &mut sql, &mut params);
        self.query_messages(&sql, &params)
    }

    /// Union of messages across every conversation the principal
    /// participates in; the global `/messages` set.
    pub fn list_participating_messages(
        &self,
        principal: &str,
        filters: &MessageFilters,
        page: Page,
    ) -> Result<Vec<MessageRow>> {
        let mut params: Vec<String> = vec![principal.to_string()];
        let mut sql = format!(
            "SELECT {} {} WHERE EXISTS (SELECT 1 FROM conversation_participants cp \
             WHERE cp.conversation_id = m.conversation_id AND cp.user_id = ?1)",
            MESSAGE_COLS, MESSAGE_JOINS
        );
        push_message_filters(filters, &mut sql, &mut params);
        push_page(page, &mut sql, &mut params);
        self.query_messages(&sql, &params)
    }

    pub fn list_unread_messages(&self, receiver: &str, page: Page) -> Result<Vec<MessageRow>> {
        let mut params: Vec<String> = vec![receiver.to_string()];
        let mut sql = format!(
            "SELECT {} {} WHERE m.receiver_id = ?1 AND m.is_read = 0",
            MESSAGE_COLS, MESSAGE_JOINS
        );
        push_page(page, &mut sql, &mut params);
        self.query_messages(&sql, &params)
    }

    /// Replace a message body. Returns the prior body when the content
    /// actually changed (and marks the message edited), `None` for a no-op
    /// write of identical content.
    pub fn update_message_body(&self, id: &str, new_body: &str) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let prior: Option<String> = tx
                .query_row("SELECT body FROM messages WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(prior) = prior else {
                return Err(StoreError::MessageNotFound.into());
            };

            if prior == new_body {
                return Ok(None);
            }

            tx.execute(
                "UPDATE messages SET body = ?1, edited = 1 WHERE id = ?2",
                (new_body, id),
            )?;
            tx.commit()?;
            Ok(Some(prior))
        })
    }

    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let affected = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(affected > 0)
        })
    }

    fn query_messages(&self, sql: &str, params: &[String]) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Message history --

    pub fn insert_message_history(
        &self,
        id: &str,
        message_id: &str,
        prior_body: &str,
        edited_by: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO message_history (id, message_id, prior_body, edited_by) \
                 VALUES (?1, ?2, ?3, ?4)",
                (id, message_id, prior_body, edited_by),
            )?;
            Ok(())
        })
    }

    pub fn list_message_history(&self, message_id: &str) -> Result<Vec<MessageHistoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, prior_body, edited_by, edited_at \
                 FROM message_history WHERE message_id = ?1 \
                 ORDER BY edited_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([message_id], |row| {
                    Ok(MessageHistoryRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        prior_body: row.get(2)?,
                        edited_by: row.get(3)?,
                        edited_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, id: &str, user_id: &str, message_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, message_id) VALUES (?1, ?2, ?3)",
                (id, user_id, message_id),
            )?;
            Ok(())
        })
    }

    pub fn list_notifications(&self, user_id: &str) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, message_id, is_read, created_at \
                 FROM notifications WHERE user_id = ?1 \
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        message_id: row.get(2)?,
                        is_read: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark a notification read and acknowledge its message in one
    /// transaction. Returns false when the notification does not exist or
    /// is addressed to someone else; the caller hides existence either way.
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let message_id: Option<String> = tx
                .query_row(
                    "SELECT message_id FROM notifications WHERE id = ?1 AND user_id = ?2",
                    (id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            let Some(message_id) = message_id else {
                return Ok(false);
            };

            tx.execute("UPDATE notifications SET is_read = 1 WHERE id = ?1", [id])?;
            tx.execute("UPDATE messages SET is_read = 1 WHERE id = ?1", [&message_id])?;
            tx.commit()?;
            Ok(true)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, email, password, display_name, is_active, is_staff, is_admin, created_at \
         FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([value], map_user_row).optional()?;
    Ok(row)
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        display_name: row.get(3)?,
        is_active: row.get(4)?,
        is_staff: row.get(5)?,
        is_admin: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {} {} WHERE m.id = ?1", MESSAGE_COLS, MESSAGE_JOINS);
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([id], map_message_row).optional()?;
    Ok(row)
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_email: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        receiver_id: row.get(4)?,
        receiver_email: row
            .get::<_, Option<String>>(5)?
            .unwrap_or_else(|| "unknown".to_string()),
        body: row.get(6)?,
        parent_id: row.get(7)?,
        edited: row.get(8)?,
        is_read: row.get(9)?,
        sent_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn participant_exists(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM conversation_participants \
         WHERE conversation_id = ?1 AND user_id = ?2)",
        (conversation_id, user_id),
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Append WHERE fragments for the message filter criteria. Fragments only
/// ever AND onto the scope clause, so filtering never widens the
/// authorized set.
fn push_message_filters(filters: &MessageFilters, sql: &mut String, params: &mut Vec<String>) {
    if let Some(after) = filters.sent_after {
        params.push(to_db_timestamp(after));
        sql.push_str(&format!(" AND m.sent_at >= ?{}", params.len()));
    }
    if let Some(before) = filters.sent_before {
        params.push(to_db_timestamp(before));
        sql.push_str(&format!(" AND m.sent_at <= ?{}", params.len()));
    }
    if let Some(sender) = filters.sender {
        params.push(sender.to_string());
        sql.push_str(&format!(" AND m.sender_id = ?{}", params.len()));
    }
    if let Some(receiver) = filters.receiver {
        params.push(receiver.to_string());
        sql.push_str(&format!(" AND m.receiver_id = ?{}", params.len()));
    }
    if let Some(participant) = filters.participant {
        params.push(participant.to_string());
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM conversation_participants cp \
              WHERE cp.conversation_id = m.conversation_id AND cp.user_id = ?{})",
            params.len()
        ));
    }
    if let Some(content) = &filters.content {
        params.push(like_pattern(content));
        sql.push_str(&format!(" AND m.body LIKE ?{} ESCAPE '\\'", params.len()));
    }
    if let Some(search) = &filters.search {
        params.push(like_pattern(search));
        let n = params.len();
        sql.push_str(&format!(
            " AND (m.body LIKE ?{n} ESCAPE '\\' \
              OR su.email LIKE ?{n} ESCAPE '\\' \
              OR su.display_name LIKE ?{n} ESCAPE '\\' \
              OR ru.email LIKE ?{n} ESCAPE '\\' \
              OR ru.display_name LIKE ?{n} ESCAPE '\\')",
        ));
    }
}

fn push_page(page: Page, sql: &mut String, params: &mut Vec<String>) {
    if let Some(before) = page.before {
        params.push(to_db_timestamp(before));
        sql.push_str(&format!(" AND m.sent_at < ?{}", params.len()));
    }
    sql.push_str(&format!(
        " ORDER BY m.sent_at DESC, m.id DESC LIMIT {}",
        page.limit
    ));
}

/// Substring LIKE pattern with the wildcard characters escaped, so a filter
/// value containing `%` or `_` matches literally.
fn like_pattern(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, email: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, email, "hash", email.split('@').next().unwrap())
            .unwrap();
        id
    }

    fn add_conversation(db: &Database, participants: &[&String]) -> String {
        let id = Uuid::new_v4().to_string();
        let ids: Vec<String> = participants.iter().map(|p| p.to_string()).collect();
        db.create_conversation(&id, &ids).unwrap();
        id
    }

    fn post(db: &Database, conv: &str, sender: &str, receiver: &str, body: &str) -> MessageRow {
        db.create_message(&NewMessage {
            id: &Uuid::new_v4().to_string(),
            conversation_id: conv,
            sender_id: sender,
            receiver_id: receiver,
            body,
            parent_id: None,
        })
        .unwrap()
    }

    fn backdate(db: &Database, message_id: &str, sent_at: &str) {
        db.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE messages SET sent_at = ?1 WHERE id = ?2",
                (sent_at, message_id),
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn create_and_fetch_user() {
        let db = db();
        let id = add_user(&db, "alice@example.com");

        let by_email = db.get_user_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, id);
        assert_eq!(by_email.display_name, "alice");
        assert!(by_email.is_active);
        assert!(!by_email.is_staff);

        assert!(db.get_user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn existing_user_ids_filters_unknown() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let ghost = Uuid::new_v4().to_string();

        let found = db.existing_user_ids(&[a.clone(), ghost]).unwrap();
        assert_eq!(found, vec![a]);
        assert!(db.existing_user_ids(&[]).unwrap().is_empty());
    }

    #[test]
    fn create_message_enforces_membership() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let c = add_user(&db, "c@example.com");
        let conv = add_conversation(&db, &[&a, &b]);

        // sender outside the conversation
        let err = db
            .create_message(&NewMessage {
                id: &Uuid::new_v4().to_string(),
                conversation_id: &conv,
                sender_id: &c,
                receiver_id: &a,
                body: "hi",
                parent_id: None,
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotParticipant)
        ));

        // receiver outside the conversation
        let err = db
            .create_message(&NewMessage {
                id: &Uuid::new_v4().to_string(),
                conversation_id: &conv,
                sender_id: &a,
                receiver_id: &c,
                body: "hi",
                parent_id: None,
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::ReceiverNotParticipant)
        ));

        // unknown conversation
        let err = db
            .create_message(&NewMessage {
                id: &Uuid::new_v4().to_string(),
                conversation_id: &Uuid::new_v4().to_string(),
                sender_id: &a,
                receiver_id: &b,
                body: "hi",
                parent_id: None,
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::ConversationNotFound)
        ));
    }

    #[test]
    fn parent_must_share_the_conversation() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let conv1 = add_conversation(&db, &[&a, &b]);
        let conv2 = add_conversation(&db, &[&a, &b]);
        let root = post(&db, &conv1, &a, &b, "root");

        let err = db
            .create_message(&NewMessage {
                id: &Uuid::new_v4().to_string(),
                conversation_id: &conv2,
                sender_id: &a,
                receiver_id: &b,
                body: "reply",
                parent_id: Some(&root.id),
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::InvalidParent)
        ));

        let reply = db
            .create_message(&NewMessage {
                id: &Uuid::new_v4().to_string(),
                conversation_id: &conv1,
                sender_id: &a,
                receiver_id: &b,
                body: "reply",
                parent_id: Some(&root.id),
            })
            .unwrap();
        assert_eq!(reply.parent_id.as_deref(), Some(root.id.as_str()));
    }

    #[test]
    fn no_filters_returns_full_authorized_set() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let conv = add_conversation(&db, &[&a, &b]);
        post(&db, &conv, &a, &b, "one");
        post(&db, &conv, &b, &a, "two");

        let rows = db
            .list_conversation_messages(&conv, &MessageFilters::default(), Page::default())
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn time_range_filter_is_inclusive_conjunction() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let conv = add_conversation(&db, &[&a, &b]);

        let m1 = post(&db, &conv, &a, &b, "old");
        let m2 = post(&db, &conv, &a, &b, "mid");
        let m3 = post(&db, &conv, &a, &b, "new");
        backdate(&db, &m1.id, "2026-01-01 00:00:00");
        backdate(&db, &m2.id, "2026-01-15 12:00:00");
        backdate(&db, &m3.id, "2026-02-01 00:00:00");

        let filters = MessageFilters {
            sent_after: Some("2026-01-15T12:00:00Z".parse().unwrap()),
            sent_before: Some("2026-02-01T00:00:00Z".parse().unwrap()),
            ..Default::default()
        };
        let rows = db
            .list_conversation_messages(&conv, &filters, Page::default())
            .unwrap();
        let bodies: Vec<&str> = rows.iter().map(|r| r.body.as_str()).collect();
        assert_eq!(bodies, vec!["new", "mid"]);
    }

    #[test]
    fn content_filter_is_case_insensitive_and_literal() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let conv = add_conversation(&db, &[&a, &b]);
        post(&db, &conv, &a, &b, "Deploy at 100% tonight");
        post(&db, &conv, &a, &b, "all clear");

        let filters = MessageFilters {
            content: Some("deploy".into()),
            ..Default::default()
        };
        let rows = db
            .list_conversation_messages(&conv, &filters, Page::default())
            .unwrap();
        assert_eq!(rows.len(), 1);

        // '%' in the filter value must match literally, not as a wildcard
        let filters = MessageFilters {
            content: Some("100%".into()),
            ..Default::default()
        };
        let rows = db
            .list_conversation_messages(&conv, &filters, Page::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].body, "Deploy at 100% tonight");

        // and '_' must not behave as a single-character wildcard
        let filters = MessageFilters {
            content: Some("100_".into()),
            ..Default::default()
        };
        assert!(db
            .list_conversation_messages(&conv, &filters, Page::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn search_matches_identity_fields() {
        let db = db();
        let a = add_user(&db, "alice@example.com");
        let b = add_user(&db, "bob@example.com");
        let conv = add_conversation(&db, &[&a, &b]);
        post(&db, &conv, &a, &b, "morning");
        post(&db, &conv, &b, &a, "evening");

        let filters = MessageFilters {
            search: Some("alice".into()),
            ..Default::default()
        };
        // alice appears as sender of one and receiver of the other
        let rows = db
            .list_conversation_messages(&conv, &filters, Page::default())
            .unwrap();
        assert_eq!(rows.len(), 2);

        let filters = MessageFilters {
            search: Some("evening".into()),
            ..Default::default()
        };
        let rows = db
            .list_conversation_messages(&conv, &filters, Page::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn global_list_is_scoped_to_participation() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let c = add_user(&db, "c@example.com");
        let conv_ab = add_conversation(&db, &[&a, &b]);
        let conv_bc = add_conversation(&db, &[&b, &c]);
        post(&db, &conv_ab, &a, &b, "for b");
        post(&db, &conv_bc, &c, &b, "also for b");

        let all_for_b = db
            .list_participating_messages(&b, &MessageFilters::default(), Page::default())
            .unwrap();
        assert_eq!(all_for_b.len(), 2);

        let all_for_a = db
            .list_participating_messages(&a, &MessageFilters::default(), Page::default())
            .unwrap();
        assert_eq!(all_for_a.len(), 1);
        assert_eq!(all_for_a[0].body, "for b");
    }

    #[test]
    fn specific_participants_requires_all() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let c = add_user(&db, "c@example.com");
        let conv_ab = add_conversation(&db, &[&a, &b]);
        let conv_abc = add_conversation(&db, &[&a, &b, &c]);
        let _conv_ac = add_conversation(&db, &[&a, &c]);

        let filters = ConversationFilters {
            specific_participants: vec![b.parse().unwrap(), c.parse().unwrap()],
            ..Default::default()
        };
        let rows = db.list_conversations(&a, &filters).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, conv_abc);

        let filters = ConversationFilters {
            participant: Some(b.parse().unwrap()),
            ..Default::default()
        };
        let rows = db.list_conversations(&a, &filters).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&conv_ab.as_str()));
        assert!(ids.contains(&conv_abc.as_str()));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn conversation_listing_requires_membership() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let c = add_user(&db, "c@example.com");
        add_conversation(&db, &[&a, &b]);

        assert_eq!(
            db.list_conversations(&a, &ConversationFilters::default())
                .unwrap()
                .len(),
            1
        );
        assert!(db
            .list_conversations(&c, &ConversationFilters::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn update_message_body_records_prior_once() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let conv = add_conversation(&db, &[&a, &b]);
        let msg = post(&db, &conv, &a, &b, "hi");

        let prior = db.update_message_body(&msg.id, "hi there").unwrap();
        assert_eq!(prior.as_deref(), Some("hi"));

        let updated = db.get_message(&msg.id).unwrap().unwrap();
        assert!(updated.edited);
        assert_eq!(updated.body, "hi there");

        // identical content is a no-op
        assert!(db.update_message_body(&msg.id, "hi there").unwrap().is_none());

        let err = db
            .update_message_body(&Uuid::new_v4().to_string(), "x")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::MessageNotFound)
        ));
    }

    #[test]
    fn cascade_on_user_delete() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let c = add_user(&db, "c@example.com");
        let conv = add_conversation(&db, &[&a, &b, &c]);

        let from_a = post(&db, &conv, &a, &b, "from a");
        let to_a = post(&db, &conv, &c, &a, "to a");
        let unrelated = post(&db, &conv, &c, &b, "c to b");

        db.insert_notification(&Uuid::new_v4().to_string(), &a, &to_a.id)
            .unwrap();
        db.insert_notification(&Uuid::new_v4().to_string(), &b, &from_a.id)
            .unwrap();

        assert!(db.delete_user(&a).unwrap());

        // messages where the user was sender or receiver are gone
        assert!(db.get_message(&from_a.id).unwrap().is_none());
        assert!(db.get_message(&to_a.id).unwrap().is_none());
        assert!(db.get_message(&unrelated.id).unwrap().is_some());

        // their notifications are gone; the notification for b pointed at a
        // deleted message, so it cascades too
        assert!(db.list_notifications(&a).unwrap().is_empty());
        assert!(db.list_notifications(&b).unwrap().is_empty());

        // the conversation persists with a shrunken participant set
        assert!(db.get_conversation(&conv).unwrap().is_some());
        let remaining = db.get_participants(&conv).unwrap();
        let emails: Vec<&str> = remaining.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, vec!["b@example.com", "c@example.com"]);
    }

    #[test]
    fn unread_flow_through_notifications() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let conv = add_conversation(&db, &[&a, &b]);
        let msg = post(&db, &conv, &a, &b, "ping");

        let nid = Uuid::new_v4().to_string();
        db.insert_notification(&nid, &b, &msg.id).unwrap();

        let unread = db.list_unread_messages(&b, Page::default()).unwrap();
        assert_eq!(unread.len(), 1);

        // someone else cannot acknowledge b's notification
        assert!(!db.mark_notification_read(&nid, &a).unwrap());

        assert!(db.mark_notification_read(&nid, &b).unwrap());
        assert!(db.list_unread_messages(&b, Page::default()).unwrap().is_empty());
        let notes = db.list_notifications(&b).unwrap();
        assert!(notes[0].is_read);
    }

    #[test]
    fn before_cursor_pages_backwards() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let conv = add_conversation(&db, &[&a, &b]);

        let m1 = post(&db, &conv, &a, &b, "first");
        let m2 = post(&db, &conv, &a, &b, "second");
        let m3 = post(&db, &conv, &a, &b, "third");
        backdate(&db, &m1.id, "2026-01-01 00:00:00");
        backdate(&db, &m2.id, "2026-01-02 00:00:00");
        backdate(&db, &m3.id, "2026-01-03 00:00:00");

        let page = Page {
            limit: 2,
            before: None,
        };
        let rows = db
            .list_conversation_messages(&conv, &MessageFilters::default(), page)
            .unwrap();
        let bodies: Vec<&str> = rows.iter().map(|r| r.body.as_str()).collect();
        assert_eq!(bodies, vec!["third", "second"]);

        let page = Page {
            limit: 2,
            before: Some("2026-01-02T00:00:00Z".parse().unwrap()),
        };
        let rows = db
            .list_conversation_messages(&conv, &MessageFilters::default(), page)
            .unwrap();
        let bodies: Vec<&str> = rows.iter().map(|r| r.body.as_str()).collect();
        assert_eq!(bodies, vec!["first"]);
    }

    #[test]
    fn add_participants_is_idempotent() {
        let db = db();
        let a = add_user(&db, "a@example.com");
        let b = add_user(&db, "b@example.com");
        let c = add_user(&db, "c@example.com");
        let conv = add_conversation(&db, &[&a, &b]);

        db.add_participants(&conv, &[c.clone(), b.clone()]).unwrap();
        db.add_participants(&conv, &[c.clone()]).unwrap();

        assert_eq!(db.get_participants(&conv).unwrap().len(), 3);
        assert!(db.is_participant(&conv, &c).unwrap());
    }
}
