use serde::{ Serialize, Deserialize };
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Ordered turns of one open chat session. Only grows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Replaces the content of the turn at `index`. Used while an assistant
    /// turn is being streamed in.
    pub(crate) fn set_content(&mut self, index: usize, content: String) {
        if let Some(turn) = self.turns.get_mut(index) {
            turn.content = content;
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequestBody {
    pub messages: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathname: Option<String>,
}

impl ChatRequestBody {
    pub fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages must contain at least one turn".to_string());
        }
        for (i, turn) in self.messages.iter().enumerate() {
            if turn.content.trim().is_empty() {
                return Err(format!("messages[{}].content must be a non-empty string", i));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_parses_roles() {
        let body: ChatRequestBody = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"hi"},{"role":"assistant","content":"hello"}]}"#
        ).unwrap();
        assert_eq!(body.messages[0].role, Role::User);
        assert_eq!(body.messages[1].role, Role::Assistant);
        assert!(body.pathname.is_none());
        assert!(body.validate().is_ok());
    }

    #[test]
    fn unknown_role_is_rejected() {
        let parsed = serde_json::from_str::<ChatRequestBody>(
            r#"{"messages":[{"role":"system","content":"hi"}]}"#
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn blank_content_fails_validation() {
        let body = ChatRequestBody {
            messages: vec![Turn::user("find keys"), Turn::assistant("   ")],
            pathname: None,
        };
        let err = body.validate().unwrap_err();
        assert!(err.contains("messages[1]"));

        let empty = ChatRequestBody { messages: vec![], pathname: None };
        assert!(empty.validate().is_err());
    }
}
