use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use parley_types::filters::{ConversationFilters, MessageFilters, Page};

use crate::error::{ApiError, FieldErrors};

const MAX_PAGE_SIZE: u32 = 200;

/// Parse message-list query parameters into typed criteria. Unknown
/// parameters impose no constraint; malformed values accumulate into a
/// field-level error map rather than silently emptying the result.
pub fn parse_message_filters(params: &HashMap<String, String>) -> Result<MessageFilters, ApiError> {
    let mut errors = FieldErrors::new();

    let filters = MessageFilters {
        sent_after: parse_timestamp_param(params, "sent_after", &mut errors),
        sent_before: parse_timestamp_param(params, "sent_before", &mut errors),
        sender: parse_uuid_param(params, "sender", &mut errors),
        receiver: parse_uuid_param(params, "receiver", &mut errors),
        participant: parse_uuid_param(params, "participant", &mut errors),
        content: non_empty(params.get("content")),
        search: non_empty(params.get("search")),
    };

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    Ok(filters)
}

pub fn parse_conversation_filters(
    params: &HashMap<String, String>,
) -> Result<ConversationFilters, ApiError> {
    let mut errors = FieldErrors::new();

    let mut specific_participants = Vec::new();
    if let Some(raw) = non_empty(params.get("specific_participants")) {
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.parse::<Uuid>() {
                Ok(id) => specific_participants.push(id),
                Err(_) => push_error(
                    &mut errors,
                    "specific_participants",
                    format!("'{}' is not a valid uuid.", part),
                ),
            }
        }
    }

    let filters = ConversationFilters {
        participant: parse_uuid_param(params, "participant", &mut errors),
        specific_participants,
        created_after: parse_timestamp_param(params, "created_after", &mut errors),
        created_before: parse_timestamp_param(params, "created_before", &mut errors),
    };

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    Ok(filters)
}

/// Pagination: `limit` (1..=200, default 50) and a `before` cursor.
pub fn parse_page(params: &HashMap<String, String>) -> Result<Page, ApiError> {
    let mut errors = FieldErrors::new();
    let mut page = Page::default();

    if let Some(raw) = non_empty(params.get("limit")) {
        match raw.parse::<u32>() {
            Ok(n) if n >= 1 => page.limit = n.min(MAX_PAGE_SIZE),
            _ => push_error(
                &mut errors,
                "limit",
                format!("'{}' is not a valid page size.", raw),
            ),
        }
    }

    page.before = parse_timestamp_param(params, "before", &mut errors);

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    Ok(page)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

fn parse_uuid_param(
    params: &HashMap<String, String>,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<Uuid> {
    let raw = non_empty(params.get(field))?;
    match raw.parse::<Uuid>() {
        Ok(id) => Some(id),
        Err(_) => {
            push_error(errors, field, format!("'{}' is not a valid uuid.", raw));
            None
        }
    }
}

fn parse_timestamp_param(
    params: &HashMap<String, String>,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<DateTime<Utc>> {
    let raw = non_empty(params.get(field))?;
    match parse_timestamp(&raw) {
        Some(ts) => Some(ts),
        None => {
            push_error(
                errors,
                field,
                format!("'{}' is not a valid timestamp.", raw),
            );
            None
        }
    }
}

/// Accept RFC 3339 or a naive "YYYY-MM-DD HH:MM:SS" / "YYYY-MM-DDTHH:MM:SS"
/// (interpreted as UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = raw.parse::<DateTime<Utc>>() {
        return Some(ts);
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn push_error(errors: &mut FieldErrors, field: &str, message: String) {
    errors.entry(field.to_string()).or_default().push(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn absent_fields_impose_no_constraint() {
        let filters = parse_message_filters(&params(&[])).unwrap();
        assert!(filters.is_empty());

        // unknown parameters are ignored
        let filters = parse_message_filters(&params(&[("page_size_wrong", "zzz")])).unwrap();
        assert!(filters.is_empty());
    }

    #[test]
    fn parses_a_full_criteria_set() {
        let sender = Uuid::new_v4();
        let raw = params(&[
            ("sent_after", "2026-01-01 00:00:00"),
            ("sent_before", "2026-02-01T00:00:00Z"),
            ("sender", &sender.to_string()),
            ("content", "deploy"),
            ("search", "alice"),
        ]);

        let filters = parse_message_filters(&raw).unwrap();
        assert_eq!(
            filters.sent_after,
            Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            filters.sent_before,
            Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(filters.sender, Some(sender));
        assert_eq!(filters.content.as_deref(), Some("deploy"));
        assert_eq!(filters.search.as_deref(), Some("alice"));
    }

    #[test]
    fn malformed_values_name_their_field() {
        let raw = params(&[("sender", "not-a-uuid"), ("sent_after", "yesterday")]);
        match parse_message_filters(&raw) {
            Err(ApiError::Validation(errors)) => {
                assert!(errors.contains_key("sender"));
                assert!(errors.contains_key("sent_after"));
            }
            other => panic!("expected a validation error, got {:?}", other.err()),
        }
    }

    #[test]
    fn specific_participants_splits_on_commas() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let raw = params(&[(
            "specific_participants",
            &format!("{}, {}", a, b),
        )]);

        let filters = parse_conversation_filters(&raw).unwrap();
        assert_eq!(filters.specific_participants, vec![a, b]);

        let raw = params(&[("specific_participants", "x,y")]);
        assert!(matches!(
            parse_conversation_filters(&raw),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn page_defaults_clamps_and_rejects_garbage() {
        let page = parse_page(&params(&[])).unwrap();
        assert_eq!(page.limit, 50);
        assert!(page.before.is_none());

        let page = parse_page(&params(&[("limit", "1000")])).unwrap();
        assert_eq!(page.limit, 200);

        assert!(parse_page(&params(&[("limit", "0")])).is_err());
        assert!(parse_page(&params(&[("limit", "many")])).is_err());
        assert!(parse_page(&params(&[("before", "not-a-time")])).is_err());
    }
}
