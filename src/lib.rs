pub mod error;
pub mod config;
pub mod providers;
pub mod request;
pub mod sse;
pub mod sink;
pub mod failover;
pub mod relay;
pub mod client;
use serde::{Deserialize, Serialize};
use std::fmt;

/*

llm-relay streams a chat completion from the first LLM provider
that will take it. Providers are tried strictly in the configured
order; a rate-limited, unauthorized or broken provider hands the
call to the next one, a rejected request ends the call.

llm-relay/
├── Cargo.toml
├── src/
│   ├── lib.rs          # ProviderName, re-exports
│   ├── error.rs        # Error taxonomy
│   ├── config.rs       # Provider list, persona, timeouts
│   ├── request.rs      # Message / Completion types
│   ├── providers/      # One wire protocol per schema
│   │   ├── mod.rs      # WireProtocol trait + name -> protocol table
│   │   ├── openai.rs   # chat-array schema (Groq, OpenAI, Mistral)
│   │   └── gemini.rs   # contents/parts schema
│   ├── sse.rs          # line splitting + stream pump
│   ├── sink.rs         # DeltaSink and stock sinks
│   ├── failover.rs     # failure classification
│   ├── relay.rs        # the fallback loop
│   └── client.rs       # task-owning backend over channels
└── tests/

*/

pub use client::{ChatStream, RelayBackend};
pub use config::{ProviderConfig, RelayConfig};
pub use error::Error;
pub use relay::Relay;
pub use request::{Completion, Finish, Message, Role};
pub use sink::{BufferSink, ChannelSink, DeltaSink, StreamEvent};

/// Closed set of providers the relay knows how to talk to.
/// Each variant maps to exactly one wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName
{
  /// Groq (OpenAI-compatible chat completions)
  Groq
  ,
  /// OpenAI chat completions
  #[serde(rename = "openai")]
  OpenAi
  ,
  /// Mistral AI chat completions
  Mistral
  ,
  /// Google Gemini streamGenerateContent
  Gemini
}

impl ProviderName
{   /// Stable lowercase identifier, also used in config files
    pub fn as_str(&self) -> &'static str
    {   match self
        {   ProviderName::Groq => "groq"
          , ProviderName::OpenAi => "openai"
          , ProviderName::Mistral => "mistral"
          , ProviderName::Gemini => "gemini"
        }
    }

    pub fn from_name(s: &str) -> Option<Self>
    {   match s.trim().to_ascii_lowercase().as_str()
        {   "groq" => Some(ProviderName::Groq)
          , "openai" => Some(ProviderName::OpenAi)
          , "mistral" => Some(ProviderName::Mistral)
          , "gemini" => Some(ProviderName::Gemini)
          , _ => None
        }
    }

    /// Wire protocol used for this provider
    pub fn protocol(&self) -> &'static dyn providers::WireProtocol
    {   providers::protocol_for(*self)
    }
}

impl fmt::Display for ProviderName
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.write_str(self.as_str())
    }
}
