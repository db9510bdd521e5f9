//! Wire protocols spoken to LLM providers
//!
//! Every provider name maps to one `WireProtocol`. A protocol knows
//! how to shape the request body, where the credential goes, and
//! where the text lives in one streamed event. The fallback loop
//! only ever talks to this trait.

pub mod gemini;
pub mod openai;

use reqwest::RequestBuilder;

use crate::config::ProviderConfig;
use crate::error::Error;
use crate::request::Message;
use crate::ProviderName;

pub use gemini::ContentsParts;
pub use openai::ChatArray;

pub trait WireProtocol: Send + Sync
{   /// Short schema name for logs
    fn schema(&self) -> &'static str;

    /// Translate the neutral history into this provider's body.
    /// `messages` is never modified.
    fn format_request(
      &self
    , provider: &ProviderConfig
    , persona: &str
    , messages: &[Message]
    ) -> Result<serde_json::Value, Error>;

    /// Place the credential on the request
    fn authorize(
      &self
    , request: RequestBuilder
    , credential: &str
    ) -> RequestBuilder;

    /// Text carried by one `data:` payload, if any.
    /// Unparseable payloads and payloads without text yield `None`.
    fn parse_delta(&self, payload: &str) -> Option<String>;
}

/// Protocol table
pub fn protocol_for(name: ProviderName) -> &'static dyn WireProtocol
{   match name
    {   ProviderName::Groq
      | ProviderName::OpenAi
      | ProviderName::Mistral => &ChatArray
      , ProviderName::Gemini => &ContentsParts
    }
}
