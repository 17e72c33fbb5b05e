use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Transcript entry identity. Allocated from a per-session counter, so ids also
/// sort in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Agent,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn agent(id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::Agent,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Connecting,
    Active,
    Error,
}

impl SessionStatus {
    // Stable labels for UI display; not derived from `Debug`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Error => "error",
        }
    }
}

/// Payload of the agent's `completeSession` tool call, shown on the summary screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub quote: String,
    pub theme: String,
}

/// Live read model for the UI shell.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionView {
    pub status: SessionStatus,
    pub messages: Vec<Message>,
    pub is_speaking: bool,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_as_snake_case() {
        let s = serde_json::to_string(&SessionStatus::Connecting).unwrap();
        assert_eq!(s, "\"connecting\"");
        assert_eq!(SessionStatus::Error.label(), "error");
    }

    #[test]
    fn default_view_is_connecting_and_silent() {
        let v = SessionView::default();
        assert_eq!(v.status, SessionStatus::Connecting);
        assert!(v.messages.is_empty());
        assert!(!v.is_speaking);
        assert!(v.error_message.is_none());
    }
}
