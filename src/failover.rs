//! Failure classification for provider fallbacks
//!
//! One place decides whether a failed attempt hands the call to the
//! next provider or ends it.

use log::debug;

use crate::error::Error;
use crate::request::Completion;

/// Statuses below 500 that still justify trying the next provider
pub const RECOVERABLE_STATUSES: [u16; 3] = [401, 403, 429];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass
{   /// Try the next provider
    Recoverable
  , /// End the whole call
    Fatal
}

/// 401, 403, 429 and every 5xx are recoverable; other statuses mean
/// the request itself was rejected and would fail the same way again
pub fn classify_status(status: u16) -> FailureClass
{   if RECOVERABLE_STATUSES.contains(&status) || status >= 500
    {   FailureClass::Recoverable
    } else
    {   FailureClass::Fatal
    }
}

/// Classification of any attempt error
pub fn classify(error: &Error) -> FailureClass
{   match error
    {   Error::Status { status, .. } => classify_status(*status)
      , Error::Timeout { .. }
      | Error::HttpError { .. } => FailureClass::Recoverable
      , Error::Stream { delivered: 0, .. } => FailureClass::Recoverable
      , Error::Stream { .. } => FailureClass::Fatal
      , _ => FailureClass::Fatal
    }
}

/// Outcome of one provider attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt
{   Success(Completion)
  , Recoverable(Error)
  , Fatal(Error)
}

impl Attempt
{   pub fn from_error(error: Error) -> Self
    {   match classify(&error)
        {   FailureClass::Recoverable => Attempt::Recoverable(error)
          , FailureClass::Fatal => Attempt::Fatal(error)
        }
    }
}

/// Record of recoverable failures within one call
#[derive(Debug, Default)]
pub struct FailoverTrail
{   failures: Vec<Error>
}

impl FailoverTrail
{   pub fn new() -> Self
    {   FailoverTrail::default()
    }

    pub fn record(&mut self, error: Error)
    {   debug!("Recording recoverable failure #{}: {}",
          self.failures.len() + 1, error);
        self.failures.push(error);
    }

    pub fn attempts(&self) -> usize
    {   self.failures.len()
    }

    /// Terminal error once every provider is used up
    pub fn exhausted(self) -> Error
    {   Error::Exhausted
        {   last: self.failures.into_iter().last().map(Box::new)
        }
    }
}
