//! Configuration for relay providers and timeouts

use std::fmt;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ProviderName;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

pub const DEFAULT_PERSONA: &str
  = "You are the conversational assistant for a digital agency. \
     Answer questions about its web development, SEO, app development \
     and digital marketing services. Keep every answer to three or four \
     sentences, stay professional, and when asked for contact details \
     point the visitor to the contact page.";

const GEMINI_API_BASE: &str
  = "https://generativelanguage.googleapis.com/v1beta";

/// Fallback order used when none is configured
const DEFAULT_ORDER: [ProviderName; 2]
  = [ProviderName::Groq, ProviderName::Gemini];

/// One provider backend
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig
{   /// Which wire protocol to speak
    pub name: ProviderName
  , /// API key; absent or blank means the provider is skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>
  , /// Environment variable to read the key from when `credential` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>
  , /// Full URL of the streaming completion endpoint
    #[serde(default)]
    pub endpoint: String
  , /// Model identifier sent in the request
    #[serde(default)]
    pub model: String
  , #[serde(default = "default_temperature")]
    pub temperature: f32
  , #[serde(default = "default_max_tokens")]
    pub max_tokens: u32
}

fn default_temperature() -> f32
{   DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32
{   DEFAULT_MAX_TOKENS
}

impl fmt::Debug for ProviderConfig
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.debug_struct("ProviderConfig")
          .field("name", &self.name)
          .field("credential", &self.credential.as_ref().map(|_| "***"))
          .field("credential_env", &self.credential_env)
          .field("endpoint", &self.endpoint)
          .field("model", &self.model)
          .field("temperature", &self.temperature)
          .field("max_tokens", &self.max_tokens)
          .finish()
    }
}

impl ProviderConfig
{   /// Provider with its public endpoint and default model
    pub fn new(
      name: ProviderName
    , credential: Option<String>
    ) -> Self
    {   let model = default_model(name).to_string();
        ProviderConfig
        {   name
          , credential
          , credential_env: None
          , endpoint: default_endpoint(name, &model)
          , model
          , temperature: DEFAULT_TEMPERATURE
          , max_tokens: DEFAULT_MAX_TOKENS
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self
    {   self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self
    {   self.model = model.into();
        self
    }

    /// Usable credential, if any
    pub fn credential(&self) -> Option<&str>
    {   self.credential
          .as_deref()
          .map(str::trim)
          .filter(|key| !key.is_empty())
    }

    pub fn has_credential(&self) -> bool
    {   self.credential().is_some()
    }

    /// Fill blanks left by a config file: key from `credential_env`,
    /// model and endpoint from the provider defaults
    fn resolve<F>(&mut self, lookup: &F)
    where F: Fn(&str) -> Option<String>
    {   if self.credential().is_none()
        {   if let Some(var) = &self.credential_env
            {   self.credential = lookup(var);
            }
        }
        if self.model.trim().is_empty()
        {   self.model = default_model(self.name).to_string();
        }
        if self.endpoint.trim().is_empty()
        {   self.endpoint = default_endpoint(self.name, &self.model);
        }
    }
}

/// Relay configuration, built once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig
{   /// Providers in fallback order
    pub providers: Vec<ProviderConfig>
  , /// System prompt injected when the history carries none
    #[serde(default = "default_persona")]
    pub persona: String
  , /// Ceiling for response headers and for each chunk read
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64
  , #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64
}

fn default_persona() -> String
{   DEFAULT_PERSONA.to_string()
}

fn default_timeout_secs() -> u64
{   DEFAULT_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64
{   DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for RelayConfig
{   fn default() -> Self
    {   RelayConfig
        {   providers: vec![]
          , persona: default_persona()
          , timeout_secs: DEFAULT_TIMEOUT_SECS
          , connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS
        }
    }
}

impl RelayConfig
{   pub fn new(providers: Vec<ProviderConfig>) -> Self
    {   RelayConfig
        {   providers
          , ..RelayConfig::default()
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self
    {   self.persona = persona.into();
        self
    }

    pub fn timeout(&self) -> Duration
    {   Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration
    {   Duration::from_secs(self.connect_timeout_secs)
    }

    /// Build from the process environment
    pub fn from_env() -> Result<Self, Error>
    {   Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup.
    ///
    /// Reads `RELAY_PROVIDER_ORDER` (comma separated, default
    /// `groq,gemini`), then `<NAME>_API_KEY`, `<NAME>_MODEL` and
    /// `<NAME>_API_URL` per provider, plus `RELAY_PERSONA` and
    /// `RELAY_TIMEOUT_SECS`. Missing keys are not an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where F: Fn(&str) -> Option<String>
    {   let order = match lookup("RELAY_PROVIDER_ORDER")
        {   Some(raw) => parse_order(&raw)?
          , None => DEFAULT_ORDER.to_vec()
        };

        let providers = order.into_iter()
          .map(|name| {
            let prefix = name.as_str().to_ascii_uppercase();
            let mut provider = ProviderConfig::new(
              name,
              lookup(&format!("{}_API_KEY", prefix))
            );
            if let Some(model) = lookup(&format!("{}_MODEL", prefix))
            {   provider.model = model;
                provider.endpoint = default_endpoint(name, &provider.model);
            }
            if let Some(url) = lookup(&format!("{}_API_URL", prefix))
            {   provider.endpoint = url;
            }
            if !provider.has_credential()
            {   debug!("{} has no API key configured", name);
            }
            provider
          })
          .collect();

        let mut config = RelayConfig::new(providers);
        if let Some(persona) = lookup("RELAY_PERSONA")
        {   config.persona = persona;
        }
        if let Some(raw) = lookup("RELAY_TIMEOUT_SECS")
        {   config.timeout_secs = raw.trim().parse().map_err(|_| {
              Error::InvalidConfiguration(
                format!("RELAY_TIMEOUT_SECS is not a number: {}", raw)
              )
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file; `credential_env` entries are read
    /// from the process environment
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error>
    {   let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
          Error::InvalidConfiguration(
            format!("{}: {}", path.as_ref().display(), e)
          )
        })?;
        Self::from_json_str(&raw, |key| std::env::var(key).ok())
    }

    pub fn from_json_str<F>(raw: &str, lookup: F) -> Result<Self, Error>
    where F: Fn(&str) -> Option<String>
    {   let mut config: RelayConfig = serde_json::from_str(raw)?;
        for provider in config.providers.iter_mut()
        {   provider.resolve(&lookup);
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that could never produce a request.
    /// A missing credential is not checked here.
    pub fn validate(&self) -> Result<(), Error>
    {   if self.timeout_secs == 0
        {   return Err(Error::InvalidConfiguration(
              "timeout_secs must be greater than zero".to_string()
            ));
        }
        if self.connect_timeout_secs == 0
        {   return Err(Error::InvalidConfiguration(
              "connect_timeout_secs must be greater than zero".to_string()
            ));
        }
        for provider in &self.providers
        {   if !provider.endpoint.starts_with("http://")
              && !provider.endpoint.starts_with("https://")
            {   return Err(Error::InvalidConfiguration(
                  format!(
                    "{} endpoint is not an http(s) URL: {:?}",
                    provider.name, provider.endpoint
                  )
                ));
            }
            if provider.model.trim().is_empty()
            {   return Err(Error::InvalidConfiguration(
                  format!("{} has no model", provider.name)
                ));
            }
        }
        if !self.providers.iter().any(ProviderConfig::has_credential)
        {   warn!("No provider has an API key; every call will fail");
        }
        Ok(())
    }
}

fn parse_order(raw: &str) -> Result<Vec<ProviderName>, Error>
{   raw.split(',')
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(|s| {
        ProviderName::from_name(s).ok_or_else(|| {
          Error::InvalidConfiguration(format!("Unknown provider: {}", s))
        })
      })
      .collect()
}

pub fn default_model(name: ProviderName) -> &'static str
{   match name
    {   ProviderName::Groq => "llama-3.3-70b-versatile"
      , ProviderName::OpenAi => "gpt-4o-mini"
      , ProviderName::Mistral => "mistral-small-latest"
      , ProviderName::Gemini => "gemini-2.0-flash"
    }
}

pub fn default_endpoint(name: ProviderName, model: &str) -> String
{   match name
    {   ProviderName::Groq => {
          "https://api.groq.com/openai/v1/chat/completions".to_string()
        }
      , ProviderName::OpenAi => {
          "https://api.openai.com/v1/chat/completions".to_string()
        }
      , ProviderName::Mistral => {
          "https://api.mistral.ai/v1/chat/completions".to_string()
        }
      , ProviderName::Gemini => {
          format!("{}/models/{}:streamGenerateContent", GEMINI_API_BASE, model)
        }
    }
}
