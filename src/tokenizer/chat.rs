//! Multi-turn chat prompt formatting.
//!
//! A conversation is an ordered list of [`ChatMessage`] values. Formatting is
//! deterministic and order-preserving: each turn becomes
//! `<role-marker>\n{content}<|end|>\n`, and the prompt closes with an open
//! assistant marker to prime generation.

use super::{ASSISTANT_MARKER, END_OF_TURN_MARKER, SYSTEM_MARKER, USER_MARKER};

/// The speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Parse a role name. Unrecognized names yield `None`, letting callers
    /// skip such messages silently.
    pub fn parse(name: &str) -> Option<Role> {
        match name {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }

    /// The literal role marker emitted into the prompt.
    pub fn marker(&self) -> &'static str {
        match self {
            Role::System => SYSTEM_MARKER,
            Role::User => USER_MARKER,
            Role::Assistant => ASSISTANT_MARKER,
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Render a conversation into a single prompt string.
pub fn format_chat(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str(message.role.marker());
        prompt.push('\n');
        prompt.push_str(&message.content);
        prompt.push_str(END_OF_TURN_MARKER);
        prompt.push('\n');
    }
    prompt.push_str(ASSISTANT_MARKER);
    prompt.push('\n');
    prompt
}
