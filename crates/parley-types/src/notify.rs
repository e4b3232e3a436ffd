use serde::{Deserialize, Serialize};

/// Topics announced on the cross-process channel. One topic per message
/// lifecycle transition; every server process listens to all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    NewMessage,
    MessageDeleted,
    MessageHidden,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::NewMessage, Topic::MessageDeleted, Topic::MessageHidden];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewMessage => "new_message",
            Self::MessageDeleted => "message_deleted",
            Self::MessageHidden => "message_hidden",
        }
    }

    /// Topic names arriving from the channel are untrusted text; anything
    /// unrecognized is dropped by the notifier.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "new_message" => Some(Self::NewMessage),
            "message_deleted" => Some(Self::MessageDeleted),
            "message_hidden" => Some(Self::MessageHidden),
            _ => None,
        }
    }
}

/// Pointer-only payload carried on the cross-process channel. Clients
/// re-fetch full content over the query path, which keeps authorization out
/// of the real-time path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationEvent {
    pub message_id: String,
    pub conversation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_roundtrip() {
        for topic in Topic::ALL {
            assert_eq!(Topic::parse(topic.as_str()), Some(topic));
        }
        assert_eq!(Topic::parse("presence_update"), None);
    }

    #[test]
    fn payload_decodes_pointer_shape() {
        let ev: NotificationEvent =
            serde_json::from_str(r#"{"message_id":"m1","conversation_id":"42"}"#).unwrap();
        assert_eq!(ev.message_id, "m1");
        assert_eq!(ev.conversation_id, "42");
    }

    #[test]
    fn payload_rejects_unknown_fields() {
        let res: Result<NotificationEvent, _> =
            serde_json::from_str(r#"{"message_id":"m1","conversation_id":"42","extra":1}"#);
        assert!(res.is_err());
    }
}
