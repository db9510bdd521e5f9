//! Neutral request and response types for the relay

use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role
{   System
  , User
  , Assistant
}

impl Role
{   pub fn as_str(&self) -> &'static str
    {   match self
        {   Role::System => "system"
          , Role::User => "user"
          , Role::Assistant => "assistant"
        }
    }
}

/// One turn of the conversation history handed to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message
{   pub role: Role
  , pub content: String
}

impl Message
{   pub fn new(role: Role, content: impl Into<String>) -> Self
    {   Message
        {   role
          , content: content.into()
        }
    }

    pub fn system(content: impl Into<String>) -> Self
    {   Message::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self
    {   Message::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self
    {   Message::new(Role::Assistant, content)
    }
}

/// How a successful stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish
{   /// Provider sent the `[DONE]` sentinel
    Sentinel
  , /// Body ended without a sentinel
    EndOfStream
}

/// Outcome of a successful `generate` call
#[derive(Debug, Clone, PartialEq)]
pub struct Completion
{   /// Provider that produced the response
    pub provider: crate::ProviderName
  , /// Model that produced it
    pub model: String
  , /// Number of deltas delivered to the sink
    pub deltas: usize
  , pub finish: Finish
}
