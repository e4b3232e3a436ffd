use std::fmt;
use std::str::FromStr;

/// A logical broadcast scope. Every live connection is addressed through
/// room keys only: a conversation room shared by its viewers, or a user's
/// personal notification room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomKey {
    Conversation(String),
    User(String),
}

impl RoomKey {
    pub fn conversation(id: impl Into<String>) -> Self {
        Self::Conversation(id.into())
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid room key: {0}")]
pub struct InvalidRoomKey(String);

impl FromStr for RoomKey {
    type Err = InvalidRoomKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("conversation", id)) if !id.is_empty() => {
                Ok(Self::Conversation(id.to_string()))
            }
            Some(("user", id)) if !id.is_empty() => Ok(Self::User(id.to_string())),
            _ => Err(InvalidRoomKey(s.to_string())),
        }
    }
}
