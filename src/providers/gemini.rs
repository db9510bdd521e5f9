use log::trace;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};

use super::WireProtocol;
use crate::config::ProviderConfig;
use crate::error::Error;
use crate::request::{Message, Role};

// --- Request types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest<'a>
{   pub contents: Vec<GeminiContent<'a>>
  , pub system_instruction: GeminiInstruction
}

#[derive(Debug, Serialize)]
pub struct GeminiContent<'a>
{   pub role: &'static str
  , pub parts: [GeminiPart<'a>; 1]
}

#[derive(Debug, Serialize)]
pub struct GeminiPart<'a>
{   pub text: &'a str
}

#[derive(Debug, Serialize)]
pub struct GeminiInstruction
{   pub parts: Vec<GeminiInstructionPart>
}

#[derive(Debug, Serialize)]
pub struct GeminiInstructionPart
{   pub text: String
}

// --- Stream types ---

#[derive(Debug, Deserialize)]
pub struct GeminiStreamChunk
{   #[serde(default)]
    pub candidates: Vec<GeminiCandidate>
}

#[derive(Debug, Deserialize)]
pub struct GeminiCandidate
{   #[serde(default)]
    pub content: Option<GeminiCandidateContent>
}

#[derive(Debug, Deserialize)]
pub struct GeminiCandidateContent
{   #[serde(default)]
    pub parts: Vec<GeminiCandidatePart>
}

#[derive(Debug, Deserialize)]
pub struct GeminiCandidatePart
{   #[serde(default)]
    pub text: Option<String>
}

/// Contents/parts schema (Gemini streamGenerateContent).
/// Key and `alt=sse` go in the query string.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentsParts;

impl ContentsParts
{   fn translate_role(role: Role) -> Option<&'static str>
    {   match role
        {   Role::User => Some("user")
          , Role::Assistant => Some("model")
          , Role::System => None
        }
    }

    /// Non-system turns, in order, as Gemini contents
    pub fn build_contents(messages: &[Message]) -> Vec<GeminiContent<'_>>
    {   messages.iter()
          .filter_map(|m| {
            Self::translate_role(m.role).map(|role| GeminiContent
            {   role
              , parts: [GeminiPart { text: &m.content }]
            })
          })
          .collect()
    }

    /// Caller's system text when present, the persona otherwise
    pub fn build_instruction(
      persona: &str
    , messages: &[Message]
    ) -> GeminiInstruction
    {   let system: Vec<&str> = messages.iter()
          .filter(|m| m.role == Role::System)
          .map(|m| m.content.as_str())
          .collect();

        let text = if system.is_empty()
        {   persona.to_string()
        } else
        {   system.join("\n\n")
        };

        GeminiInstruction
        {   parts: vec![GeminiInstructionPart { text }]
        }
    }
}

impl WireProtocol for ContentsParts
{   fn schema(&self) -> &'static str
    {   "contents-parts"
    }

    fn format_request(
      &self
    , provider: &ProviderConfig
    , persona: &str
    , messages: &[Message]
    ) -> Result<serde_json::Value, Error>
    {   let request = GeminiRequest
        {   contents: Self::build_contents(messages)
          , system_instruction: Self::build_instruction(persona, messages)
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
    {   request.query(&[("key", credential), ("alt", "sse")])
    }

    fn parse_delta(&self, payload: &str) -> Option<String>
    {   let chunk: GeminiStreamChunk = serde_json::from_str(payload).ok()?;
        chunk.candidates
          .into_iter()
          .next()?
          .content?
          .parts
          .into_iter()
          .next()?
          .text
    }
}
