use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one request's output stream from start to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0.simple())
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.strip_prefix("msg-").unwrap_or(s)).map(Self)
    }
}

/// A non-empty piece of generated text, in generation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFragment {
    pub message_id: MessageId,
    pub index: u64,
    pub text: String,
}

impl ResponseFragment {
    pub fn new<S: Into<String>>(message_id: MessageId, index: u64, text: S) -> Self {
        Self {
            message_id,
            index,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_display_parses_back() {
        let id = MessageId::new();
        let shown = id.to_string();
        assert!(shown.starts_with("msg-"));
        assert_eq!(shown.parse::<MessageId>().unwrap(), id);
    }

    #[test]
    fn test_message_ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }
}
