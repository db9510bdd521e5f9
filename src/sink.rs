//! Where decoded deltas go
//!
//! The relay hands every text fragment to a `DeltaSink` in arrival
//! order. Sinks are owned by the caller; the relay never buffers or
//! reorders on their behalf.

use log::debug;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::request::Completion;

pub trait DeltaSink: Send
{   /// One non-empty text fragment. Must not panic.
    fn on_delta(&mut self, text: &str);

    /// Terminal failure of the call, reported once
    fn on_error(&mut self, _error: &Error) {}
}

impl<S: DeltaSink + ?Sized> DeltaSink for &mut S
{   fn on_delta(&mut self, text: &str)
    {   (**self).on_delta(text)
    }

    fn on_error(&mut self, error: &Error)
    {   (**self).on_error(error)
    }
}

impl<S: DeltaSink + ?Sized> DeltaSink for Box<S>
{   fn on_delta(&mut self, text: &str)
    {   (**self).on_delta(text)
    }

    fn on_error(&mut self, error: &Error)
    {   (**self).on_error(error)
    }
}

// ===== FnSink =====

/// Adapts a closure into a sink
pub struct FnSink<F>(pub F);

pub fn sink_fn<F>(f: F) -> FnSink<F>
where F: FnMut(&str) + Send
{   FnSink(f)
}

impl<F> DeltaSink for FnSink<F>
where F: FnMut(&str) + Send
{   fn on_delta(&mut self, text: &str)
    {   (self.0)(text)
    }
}

// ===== BufferSink =====

/// Keeps every delta plus the full reply text
#[derive(Debug, Default, Clone)]
pub struct BufferSink
{   pub deltas: Vec<String>
  , pub text: String
  , pub error: Option<Error>
}

impl BufferSink
{   pub fn new() -> Self
    {   BufferSink::default()
    }

    pub fn into_text(self) -> String
    {   self.text
    }
}

impl DeltaSink for BufferSink
{   fn on_delta(&mut self, text: &str)
    {   self.text.push_str(text);
        self.deltas.push(text.to_string());
    }

    fn on_error(&mut self, error: &Error)
    {   self.error = Some(error.clone());
    }
}

// ===== ChannelSink =====

/// What a `ChannelSink` emits
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent
{   Delta(String)
  , Done(Completion)
  , Error(Error)
}

/// Error text shown to end users instead of provider details
pub const PUBLIC_ERROR_MESSAGE: &str
  = "An error occurred while communicating with the AI.";

impl StreamEvent
{   /// Outbound SSE frame for browser clients:
    /// `{"text": ..}` per delta, `[DONE]` on success and a generic
    /// `{"error": ..}` on failure
    pub fn to_sse_frame(&self) -> String
    {   match self
        {   StreamEvent::Delta(text) => {
              format!("data: {}\n\n", serde_json::json!({ "text": text }))
            }
          , StreamEvent::Done(_) => "data: [DONE]\n\n".to_string()
          , StreamEvent::Error(_) => {
              format!(
                "data: {}\n\n",
                serde_json::json!({ "error": PUBLIC_ERROR_MESSAGE })
              )
            }
        }
    }
}

/// Forwards events over an unbounded channel.
/// A dropped receiver is logged once and ignored.
pub struct ChannelSink
{   tx: mpsc::UnboundedSender<StreamEvent>
  , closed: bool
}

impl ChannelSink
{   pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self
    {   ChannelSink
        {   tx
          , closed: false
        }
    }

    /// Report the outcome of the call. Errors were already sent
    /// through `on_error`, so only success produces an event here.
    pub fn finish(&mut self, result: &Result<Completion, Error>)
    {   if let Ok(completion) = result
        {   self.send(StreamEvent::Done(completion.clone()));
        }
    }

    fn send(&mut self, event: StreamEvent)
    {   if self.closed
        {   return;
        }
        if self.tx.send(event).is_err()
        {   debug!("Stream receiver dropped");
            self.closed = true;
        }
    }
}

impl DeltaSink for ChannelSink
{   fn on_delta(&mut self, text: &str)
    {   self.send(StreamEvent::Delta(text.to_string()));
    }

    fn on_error(&mut self, error: &Error)
    {   self.send(StreamEvent::Error(error.clone()));
    }
}
