use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verified user identity, resolved once per connection from the bearer
/// token. Immutable for the connection's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl Identity {
    /// Display name if the token carried one, otherwise the email, otherwise
    /// the bare id. Used for reaction broadcasts.
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// A stored chat message. The relay writes these and afterwards treats them
/// as opaque payload; clients fetch full content over the query path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub author_id: String,
    pub content: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub hidden_at: Option<DateTime<Utc>>,
}
