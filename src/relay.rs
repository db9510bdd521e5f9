//! The provider fallback loop

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;

use crate::config::{ProviderConfig, RelayConfig};
use crate::error::Error;
use crate::failover::{Attempt, FailoverTrail};
use crate::request::{Completion, Message};
use crate::sink::DeltaSink;
use crate::sse;

/// Longest provider error text kept in an `Error::Status`
const MAX_ERROR_BODY: usize = 512;

/// Most bytes read from the body of a rejected request
const MAX_ERROR_BYTES: usize = 8 * 1024;

/// Streams a completion from the first provider that accepts it.
///
/// Cheap to clone; clones share the config and connection pool.
/// Calls are independent and may run concurrently.
#[derive(Clone)]
pub struct Relay
{   config: Arc<RelayConfig>
  , http: reqwest::Client
}

impl Relay
{   pub fn new(config: RelayConfig) -> Result<Self, Error>
    {   config.validate()?;
        let http = reqwest::Client::builder()
          .connect_timeout(config.connect_timeout())
          .build()
          .map_err(|e| {
            error!("Failed to build HTTP client: {}", e);
            Error::InvalidConfiguration(e.to_string())
          })?;
        debug!("Relay ready with {} providers", config.providers.len());
        Ok(Relay
        {   config: Arc::new(config)
          , http
        })
    }

    pub fn from_env() -> Result<Self, Error>
    {   Self::new(RelayConfig::from_env()?)
    }

    pub fn config(&self) -> &RelayConfig
    {   &self.config
    }

    /// Stream a reply for `messages` into `sink`
    pub async fn generate<S>(
      &self
    , messages: &[Message]
    , sink: &mut S
    ) -> Result<Completion, Error>
    where S: DeltaSink + ?Sized
    {   self.generate_with_cancel(messages, sink, &CancellationToken::new())
          .await
    }

    /// As `generate`, ending with `Error::Cancelled` as soon as
    /// `cancel` fires
    pub async fn generate_with_cancel<S>(
      &self
    , messages: &[Message]
    , sink: &mut S
    , cancel: &CancellationToken
    ) -> Result<Completion, Error>
    where S: DeltaSink + ?Sized
    {   let mut trail = FailoverTrail::new();

        for provider in self.config.providers.iter()
        {   let credential = match provider.credential()
            {   Some(key) => key
              , None => {
                  info!(
                    "Skipping provider {} as API key is not configured.",
                    provider.name
                  );
                  continue;
                }
            };

            info!("Attempting inference with provider: {}", provider.name);
            match self.attempt(provider, credential, messages, sink, cancel).await
            {   Attempt::Success(completion) => {
                  info!(
                    "{} finished after {} deltas ({:?})",
                    provider.name, completion.deltas, completion.finish
                  );
                  return Ok(completion);
                }
              , Attempt::Recoverable(err) => {
                  warn!("Provider {} failed: {}", provider.name, err);
                  info!("Failing over to next available provider.");
                  trail.record(err);
                }
              , Attempt::Fatal(err) => {
                  error!("Provider {} failed fatally: {}", provider.name, err);
                  sink.on_error(&err);
                  return Err(err);
                }
            }
        }

        let err = trail.exhausted();
        error!("{}", err);
        sink.on_error(&err);
        Err(err)
    }

    /// One provider, start to finish
    async fn attempt<S>(
      &self
    , provider: &ProviderConfig
    , credential: &str
    , messages: &[Message]
    , sink: &mut S
    , cancel: &CancellationToken
    ) -> Attempt
    where S: DeltaSink + ?Sized
    {   let name = provider.name;
        let protocol = name.protocol();

        let body = match protocol.format_request(
          provider,
          &self.config.persona,
          messages
        )
        {   Ok(body) => body
          , Err(err) => return Attempt::Fatal(err)
        };

        let request = protocol.authorize(
          self.http
            .post(&provider.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(&body),
          credential
        );

        let sent = tokio::select!
        {   biased;
            _ = cancel.cancelled() => return Attempt::Fatal(Error::Cancelled)
          , sent = tokio::time::timeout(self.config.timeout(), request.send())
              => sent
        };

        let response = match sent
        {   Err(_) => {
              return Attempt::from_error(Error::Timeout { provider: name });
            }
          , Ok(Err(e)) if e.is_timeout() => {
              return Attempt::from_error(Error::Timeout { provider: name });
            }
          , Ok(Err(e)) => {
              return Attempt::from_error(Error::HttpError
              {   provider: name
                , detail: e.to_string()
              });
            }
          , Ok(Ok(response)) => response
        };

        let status = response.status();
        debug!("{} response status: {}", name, status);

        if !status.is_success()
        {   let body = tokio::select!
            {   biased;
                _ = cancel.cancelled() => return Attempt::Fatal(Error::Cancelled)
              , body = tokio::time::timeout(
                  self.config.timeout(),
                  read_capped(response.bytes_stream(), MAX_ERROR_BYTES)
                ) => body.unwrap_or_default()
            };
            return Attempt::from_error(Error::Status
            {   provider: name
              , status: status.as_u16()
              , message: error_message(&body)
            });
        }

        match sse::pump(
          name,
          response.bytes_stream(),
          sink,
          self.config.timeout(),
          cancel
        ).await
        {   Ok(summary) => Attempt::Success(Completion
            {   provider: name
              , model: provider.model.clone()
              , deltas: summary.deltas
              , finish: summary.finish
            })
          , Err(err) => Attempt::from_error(err)
        }
    }
}

/// Read at most `limit` bytes of a body; stops polling once full.
/// A transport error ends the read with whatever arrived.
async fn read_capped<St, E>(stream: St, limit: usize) -> String
where St: Stream<Item = Result<Bytes, E>>
{   let mut stream = std::pin::pin!(stream);
    let mut body = Vec::new();
    while body.len() < limit
    {   match stream.next().await
        {   Some(Ok(chunk)) => {
              let room = limit - body.len();
              body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
          , _ => break
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Provider error text: `error.message` when the body is the usual
/// JSON error envelope, otherwise the raw body, truncated
fn error_message(body: &str) -> String
{   if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body)
    {   let envelope = parsed.as_array()
          .and_then(|items| items.first())
          .unwrap_or(&parsed);
        if let Some(msg) = envelope["error"]["message"].as_str()
        {   return msg.to_string();
        }
    }
    let body = body.trim();
    if body.is_empty()
    {   return "Request failed".to_string();
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}
