use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events sent FROM client TO server over the gateway socket.
///
/// Frames are JSON `{"event": ..., "data": ...}`. Unknown event names or
/// malformed payloads fail to parse; the session answers with an `error`
/// event and keeps the connection open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Authenticate the connection. Only honored during the handshake;
    /// ignored once the session is active.
    Identify { token: String },

    /// Join room `conversation:<id>`. Membership was authorized by whatever
    /// handed the client the conversation id; only well-formedness is
    /// checked here.
    JoinConversation { conversation_id: String },

    /// Leave room `conversation:<id>`. No-op if not joined.
    LeaveConversation { conversation_id: String },

    /// Write a message and announce it on the cross-process channel.
    SendMessage {
        conversation_id: String,
        content: String,
        #[serde(rename = "type", default)]
        kind: Option<String>,
    },

    /// Add or remove a reaction. The reacting user's identity is taken from
    /// the authenticated session, never from the payload.
    SendReaction {
        message_id: String,
        conversation_id: String,
        emoji: String,
        action: ReactionAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

/// Events sent FROM server TO client over the gateway socket.
///
/// Message lifecycle events carry ids only; clients re-fetch full content
/// over the query path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A new message exists in a conversation the client has joined.
    MessageNotification {
        message_id: String,
        conversation_id: String,
    },

    /// A message was soft-deleted.
    MessageDeleted {
        message_id: String,
        conversation_id: String,
    },

    /// A message was hidden by moderation.
    MessageHidden {
        message_id: String,
        conversation_id: String,
    },

    /// A reaction was added or removed. Delivered to the conversation room
    /// and to every participant's personal room.
    Reaction {
        message_id: String,
        conversation_id: String,
        emoji: String,
        action: ReactionAction,
        user_id: String,
        user_name: String,
        message_author_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A client-visible failure. Always a generic message; internals stay in
    /// the server log.
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_kebab_case_names() {
        let ev: ClientEvent = serde_json::from_str(
            r#"{"event":"send-message","data":{"conversation_id":"42","content":"hi"}}"#,
        )
        .unwrap();
        match ev {
            ClientEvent::SendMessage {
                conversation_id,
                content,
                kind,
            } => {
                assert_eq!(conversation_id, "42");
                assert_eq!(content, "hi");
                assert_eq!(kind, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let ev: ClientEvent = serde_json::from_str(
            r#"{"event":"send-reaction","data":{"message_id":"m1","conversation_id":"42","emoji":"👍","action":"add"}}"#,
        )
        .unwrap();
        assert!(matches!(
            ev,
            ClientEvent::SendReaction {
                action: ReactionAction::Add,
                ..
            }
        ));
    }

    #[test]
    fn message_kind_rides_the_type_field() {
        let ev: ClientEvent = serde_json::from_str(
            r#"{"event":"send-message","data":{"conversation_id":"42","content":"hi","type":"photo"}}"#,
        )
        .unwrap();
        match ev {
            ClientEvent::SendMessage { kind, .. } => assert_eq!(kind.as_deref(), Some("photo")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_names_fail_to_parse() {
        let res: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"event":"start-typing","data":{"conversation_id":"42"}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn server_events_use_snake_case_names() {
        let json = serde_json::to_value(ServerEvent::MessageNotification {
            message_id: "m1".into(),
            conversation_id: "42".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "message_notification");
        assert_eq!(json["data"]["message_id"], "m1");

        let json = serde_json::to_value(ServerEvent::error("failed to send message")).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["message"], "failed to send message");
    }
}
