//! Server-Sent-Events decoding
//!
//! The provider body is split on `\n` as bytes arrive. Only lines
//! starting with `data: ` carry payload; `[DONE]` ends the stream.
//! Everything else (blank lines, comments, heartbeats, payloads that
//! are not JSON or carry no text) is skipped.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{debug, trace};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::providers::WireProtocol;
use crate::request::Finish;
use crate::sink::DeltaSink;
use crate::ProviderName;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Splits a byte stream into `\n` terminated lines.
/// Bytes after the last `\n` are held until more arrive or `finish`.
#[derive(Debug, Default)]
pub struct LineSplitter
{   pending: Vec<u8>
}

impl LineSplitter
{   pub fn new() -> Self
    {   LineSplitter::default()
    }

    /// Feed a chunk, get back every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String>
    {   self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.pending[start..]
          .iter()
          .position(|b| *b == b'\n')
        {   let end = start + pos;
            lines.push(
              String::from_utf8_lossy(&self.pending[start..end]).into_owned()
            );
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Unterminated final line, if any
    pub fn finish(&mut self) -> Option<String>
    {   if self.pending.is_empty()
        {   return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// What one line means to the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a>
{   Skip
  , Done
  , Data(&'a str)
}

pub fn classify_line(line: &str) -> SseLine<'_>
{   if line.trim().is_empty()
    {   return SseLine::Skip;
    }
    match line.strip_prefix(DATA_PREFIX)
    {   None => SseLine::Skip
      , Some(payload) if payload.trim() == DONE_SENTINEL => SseLine::Done
      , Some(payload) => SseLine::Data(payload)
    }
}

/// Result of a stream that ended cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary
{   pub deltas: usize
  , pub finish: Finish
}

/// Drive a provider body to completion, handing each decoded
/// fragment to `sink`.
///
/// Every read is bounded by `idle_timeout` and raced against
/// `cancel`. Failures carry the number of deltas already delivered
/// so the caller can tell a clean failure from a partial one.
pub async fn pump<St, E, S>(
  provider: ProviderName
, stream: St
, sink: &mut S
, idle_timeout: Duration
, cancel: &CancellationToken
) -> Result<StreamSummary, Error>
where St: Stream<Item = Result<Bytes, E>>
    , E: fmt::Display
    , S: DeltaSink + ?Sized
{   let protocol = provider.protocol();
    let mut stream = std::pin::pin!(stream);
    let mut lines = LineSplitter::new();
    let mut delivered = 0usize;

    loop
    {   let next = tokio::select!
        {   biased;
            _ = cancel.cancelled() => {
              debug!("{} stream cancelled after {} deltas", provider, delivered);
              return Err(Error::Cancelled);
            }
          , next = tokio::time::timeout(idle_timeout, stream.next()) => next
        };

        let chunk = match next
        {   Err(_) if delivered == 0 => {
              return Err(Error::Timeout { provider });
            }
          , Err(_) => {
              return Err(Error::Stream
              {   provider
                , delivered
                , detail: format!(
                    "no data for {}s",
                    idle_timeout.as_secs_f32()
                  )
              });
            }
          , Ok(None) => break
          , Ok(Some(Err(e))) => {
              return Err(Error::Stream
              {   provider
                , delivered
                , detail: e.to_string()
              });
            }
          , Ok(Some(Ok(bytes))) => bytes
        };

        for line in lines.push(&chunk)
        {   if deliver_line(&line, protocol, sink, &mut delivered)
            {   return Ok(StreamSummary
                {   deltas: delivered
                  , finish: Finish::Sentinel
                });
            }
        }
    }

    if let Some(line) = lines.finish()
    {   if deliver_line(&line, protocol, sink, &mut delivered)
        {   return Ok(StreamSummary
            {   deltas: delivered
              , finish: Finish::Sentinel
            });
        }
    }

    Ok(StreamSummary
    {   deltas: delivered
      , finish: Finish::EndOfStream
    })
}

/// Returns true once the sentinel is seen
fn deliver_line<S>(
  line: &str
, protocol: &dyn WireProtocol
, sink: &mut S
, delivered: &mut usize
) -> bool
where S: DeltaSink + ?Sized
{   match classify_line(line)
    {   SseLine::Skip => false
      , SseLine::Done => true
      , SseLine::Data(payload) => {
          match protocol.parse_delta(payload)
          {   Some(text) if !text.is_empty() => {
                sink.on_delta(&text);
                *delivered += 1;
              }
            , _ => trace!("Skipping payload without text: {}", payload)
          }
          false
        }
    }
}
