use uuid::Uuid;

use crate::error::ApiError;

pub const MAX_BODY_CHARS: usize = 500;

/// How a route answers a principal who is not a participant. The
/// conversation detail route hides existence (404); message routes state
/// the refusal (403). Deliberately not unified; see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMiss {
    Hide,
    Forbid,
}

/// Gate an operation on conversation membership.
pub fn require_participation(is_participant: bool, on_miss: OnMiss) -> Result<(), ApiError> {
    if is_participant {
        return Ok(());
    }
    match on_miss {
        OnMiss::Hide => Err(ApiError::not_found("Conversation not found.")),
        OnMiss::Forbid => Err(ApiError::forbidden(
            "You are not a participant of this conversation.",
        )),
    }
}

/// Unsafe methods on a message require authorship on top of participation.
pub fn require_sender(message_sender: Uuid, principal: Uuid) -> Result<(), ApiError> {
    if message_sender == principal {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "Only the sender may modify this message.",
        ))
    }
}

/// Message bodies must be non-blank and bounded.
pub fn validate_body(content: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::field("content", "Content must not be blank."));
    }
    if content.chars().count() > MAX_BODY_CHARS {
        return Err(ApiError::field(
            "content",
            "Content must be at most 500 characters.",
        ));
    }
    Ok(())
}

/// Self-messaging always fails validation, regardless of participation.
pub fn validate_receiver(sender: Uuid, receiver: Uuid) -> Result<(), ApiError> {
    if sender == receiver {
        return Err(ApiError::field(
            "receiver",
            "Sender and receiver must differ.",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participation_gate_maps_to_the_route_policy() {
        assert!(require_participation(true, OnMiss::Hide).is_ok());
        assert!(matches!(
            require_participation(false, OnMiss::Hide),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            require_participation(false, OnMiss::Forbid),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn only_the_sender_passes_the_authorship_gate() {
        let sender = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(require_sender(sender, sender).is_ok());
        assert!(matches!(
            require_sender(sender, other),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn blank_and_overlong_bodies_fail() {
        assert!(validate_body("hi").is_ok());
        assert!(validate_body("   ").is_err());
        assert!(validate_body("").is_err());

        let exactly_max = "x".repeat(MAX_BODY_CHARS);
        assert!(validate_body(&exactly_max).is_ok());
        let too_long = "x".repeat(MAX_BODY_CHARS + 1);
        assert!(validate_body(&too_long).is_err());
    }

    #[test]
    fn self_messaging_is_rejected() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(validate_receiver(a, b).is_ok());
        assert!(matches!(
            validate_receiver(a, a),
            Err(ApiError::Validation(_))
        ));
    }
}
