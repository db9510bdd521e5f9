use log::trace;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

use super::WireProtocol;
use crate::config::ProviderConfig;
use crate::error::Error;
use crate::request::{Message, Role};

// ===== Request Types =====

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage<'a>
{   pub role: &'static str
  , pub content: &'a str
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a>
{   pub model: &'a str
  , pub messages: Vec<ChatMessage<'a>>
  , pub stream: bool
  , pub temperature: f32
  , pub max_tokens: u32
}

// ===== Stream Types =====

#[derive(Debug, Clone, Deserialize)]
pub struct ChatStreamChunk
{   #[serde(default)]
    pub choices: Vec<ChunkChoice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice
{   #[serde(default)]
    pub delta: Option<ChunkDelta>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkDelta
{   #[serde(default)]
    pub content: Option<String>
}

/// Chat-array schema (OpenAI chat completions and compatibles).
/// Bearer auth, `choices[0].delta.content` deltas.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatArray;

impl ChatArray
{   /// History as sent on the wire; one persona message is put in
    /// front when the caller supplied no system message
    pub fn build_messages<'a>(
      persona: &'a str
    , messages: &'a [Message]
    ) -> Vec<ChatMessage<'a>>
    {   let has_system = messages.iter()
          .any(|m| m.role == Role::System);

        let mut out = Vec::with_capacity(messages.len() + 1);
        if !has_system
        {   out.push(ChatMessage
            {   role: Role::System.as_str()
              , content: persona
            });
        }
        out.extend(messages.iter().map(|m| ChatMessage
        {   role: m.role.as_str()
          , content: m.content.as_str()
        }));
        out
    }
}

impl WireProtocol for ChatArray
{   fn schema(&self) -> &'static str
    {   "chat-array"
    }

    fn format_request(
      &self
    , provider: &ProviderConfig
    , persona: &str
    , messages: &[Message]
    ) -> Result<serde_json::Value, Error>
    {   let request = ChatRequest
        {   model: &provider.model
          , messages: Self::build_messages(persona, messages)
          , stream: true
          , temperature: provider.temperature
          , max_tokens: provider.max_tokens
        };
        trace!("{} request: {:?}", provider.name, request);
        serde_json::to_value(&request)
          .map_err(|e| Error::InvalidRequest(e.to_string()))
    }

    fn authorize(
      &self
    , request: RequestBuilder
    , credential: &str
    ) -> RequestBuilder
    {   request.bearer_auth(credential)
    }

    fn parse_delta(&self, payload: &str) -> Option<String>
    {   let chunk: ChatStreamChunk = serde_json::from_str(payload).ok()?;
        chunk.choices
          .into_iter()
          .next()?
          .delta?
          .content
    }
}
