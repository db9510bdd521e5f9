use std::fmt;

/// Custom error type for relay operations
/// Implements Clone so it can be handed to sinks and channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error
{   /// Provider answered with a non-success status before streaming
    Status
    {   provider: crate::ProviderName
      , status: u16
      , message: String
    }
  , /// No response headers (or no chunk) within the timeout
    Timeout
    {   provider: crate::ProviderName
    }
  , /// Connect/send failure before any response arrived
    HttpError
    {   provider: crate::ProviderName
      , detail: String
    }
  , /// The event stream broke after the response was accepted
    Stream
    {   provider: crate::ProviderName
      , delivered: usize
      , detail: String
    }
  , /// Request body could not be built
    InvalidRequest(String)
  , /// Caller cancelled the call
    Cancelled
  , /// Every provider was skipped or failed recoverably
    Exhausted
    {   last: Option<Box<Error>>
    }
  , /// Invalid configuration
    InvalidConfiguration(String)
  , /// Failed to parse configuration or payload
    ParseError(String)
  , /// Generic error
    Other(String)
}

impl Error
{   /// True when some deltas already reached the sink before the failure.
    /// Callers render this differently from a clean failure.
    pub fn is_partial(&self) -> bool
    {   matches!(self, Error::Stream { delivered, .. } if *delivered > 0)
    }

    /// Provider the error originated from, if any
    pub fn provider(&self) -> Option<crate::ProviderName>
    {   match self
        {   Error::Status { provider, .. }
          | Error::Timeout { provider }
          | Error::HttpError { provider, .. }
          | Error::Stream { provider, .. } => Some(*provider)
          , _ => None
        }
    }
}

impl fmt::Display for Error
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Error::Status { provider, status, message } => {
              write!(f,
                "API request to {} failed with HTTP {}: {}",
                provider, status, message
              )
            }
          , Error::Timeout { provider } => {
              write!(f, "Request to {} timed out", provider)
            }
          , Error::HttpError { provider, detail } => {
              write!(f, "HTTP error from {}: {}", provider, detail)
            }
          , Error::Stream { provider, delivered, detail } => {
              write!(f,
                "Stream from {} failed after {} deltas: {}",
                provider, delivered, detail
              )
            }
          , Error::InvalidRequest(msg) => {
              write!(f, "Invalid request: {}", msg)
            }
          , Error::Cancelled => {
              write!(f, "Request cancelled")
            }
          , Error::Exhausted { last: Some(last) } => {
              write!(f,
                "All AI providers exhausted or failed. Last error: {}",
                last
              )
            }
          , Error::Exhausted { last: None } => {
              write!(f,
                "All AI providers exhausted or failed. Last error: \
                 no providers configured"
              )
            }
          , Error::InvalidConfiguration(msg) => {
              write!(f, "Invalid configuration: {}", msg)
            }
          , Error::ParseError(msg) => {
              write!(f, "Parse error: {}", msg)
            }
          , Error::Other(msg) => {
              write!(f, "Error: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<String> for Error
{   fn from(s: String) -> Self
    {   Error::Other(s)
    }
}

impl From<&str> for Error
{   fn from(s: &str) -> Self
    {   Error::Other(s.to_string())
    }
}

impl From<serde_json::Error> for Error
{   fn from(e: serde_json::Error) -> Self
    {   Error::ParseError(e.to_string())
    }
}
