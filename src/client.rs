use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use log::{debug, error, info};

use crate::error::Error;
use crate::relay::Relay;
use crate::request::{Completion, Message};
use crate::sink::{ChannelSink, StreamEvent};

// ===== Chat =====

pub struct ChatArgs
{   pub messages: Vec<Message>
  , pub cancel: CancellationToken
  , pub reply: mpsc::UnboundedSender<StreamEvent>
}

// ===== Shutdown =====

pub type ShutdownReply = Result<(), Error>;
pub type ShutdownReplySender
  = mpsc::UnboundedSender<ShutdownReply>;

pub struct ShutdownArgs
{   pub reply: ShutdownReplySender
}

// ===== RelayHand (sender side) =====

pub struct RelayHand
{   pub chat_tx
      : mpsc::UnboundedSender<ChatArgs>
  , pub shutdown_tx
      : mpsc::UnboundedSender<ShutdownArgs>
}

// ===== RelayFoot (receiver side) =====

pub struct RelayFoot
{   pub chat_rx
      : mpsc::UnboundedReceiver<ChatArgs>
  , pub shutdown_rx
      : mpsc::UnboundedReceiver<ShutdownArgs>
}

/// Events of one chat, plus the switch to stop it
pub struct ChatStream
{   pub events: mpsc::UnboundedReceiver<StreamEvent>
  , pub cancel: CancellationToken
}

impl ChatStream
{   pub async fn next(&mut self) -> Option<StreamEvent>
    {   self.events.recv().await
    }

    /// Abort the chat; the stream ends with `Error::Cancelled`
    pub fn cancel(&self)
    {   self.cancel.cancel();
    }

    /// Wait for the whole reply
    pub async fn collect_text(mut self)
      -> Result<(String, Completion), Error>
    {   let mut text = String::new();
        while let Some(event) = self.events.recv().await
        {   match event
            {   StreamEvent::Delta(delta) => text.push_str(&delta)
              , StreamEvent::Done(completion) => {
                  return Ok((text, completion));
                }
              , StreamEvent::Error(err) => return Err(err)
            }
        }
        Err(Error::Other("Relay backend disconnected".to_string()))
    }
}

/// Owns a `Relay` on a background task and serves chats over
/// channels. Each chat runs on its own task.
pub struct RelayBackend
{   hand: RelayHand
  , root: CancellationToken
  , _task_handle: tokio::task::JoinHandle<()>
}

impl RelayBackend
{   /// Spawn the backend. Must be called inside a tokio runtime.
    pub fn new(relay: Relay) -> Self
    {   debug!("Creating RelayBackend with task ownership");

        let (chat_tx, chat_rx)
          = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx)
          = mpsc::unbounded_channel();

        let hand = RelayHand
        {   chat_tx
          , shutdown_tx
        };

        let foot = RelayFoot
        {   chat_rx
          , shutdown_rx
        };

        let root = CancellationToken::new();
        let loop_root = root.clone();
        let _task_handle = tokio::spawn(async move {
          run_backend_loop(foot, relay, loop_root).await
        });

        RelayBackend
        {   hand
          , root
          , _task_handle
        }
    }

    /// Queue a chat - returns immediately
    pub fn send_chat(
      &self
    , messages: Vec<Message>
    ) -> Result<ChatStream, Error>
    {   debug!("send_chat queuing {} messages", messages.len());
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();
        let cancel = self.root.child_token();

        let cmd = ChatArgs
        {   messages
          , cancel: cancel.clone()
          , reply: reply_tx
        };

        self.hand.chat_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            Error::Other("Backend disconnected".to_string())
          })?;

        Ok(ChatStream
        {   events: reply_rx
          , cancel
        })
    }

    /// Cancel running chats and stop the backend
    pub async fn shutdown(self)
      -> Result<(), Error>
    {   debug!("Shutting down RelayBackend");
        let (reply_tx, mut reply_rx)
          = mpsc::unbounded_channel();

        self.hand.shutdown_tx
          .send(ShutdownArgs { reply: reply_tx })
          .map_err(|_| {
            error!("Backend channel already closed");
            Error::Other("Backend already shutdown".to_string())
          })?;

        match reply_rx.recv().await
        {   Some(result) => {
              debug!("Backend shutdown confirmed");
              result
            }
          , None => {
              error!("Backend exited without confirming shutdown");
              Err(Error::Other("Backend shutdown unconfirmed".to_string()))
            }
        }
    }
}

/// Main backend event loop
///
/// select! only routes: every chat is spawned, so a slow provider
/// never holds up the next command.
async fn run_backend_loop(
  foot: RelayFoot
, relay: Relay
, root: CancellationToken
)
{   debug!("Starting RelayBackend event loop");
    let RelayFoot
    {   mut chat_rx
      , mut shutdown_rx
    } = foot;

    loop
    { tokio::select!
      { Some(cmd) = chat_rx.recv() => {
          debug!("Received Chat with {} messages", cmd.messages.len());
          let relay = relay.clone();
          tokio::spawn(async move {
            let ChatArgs { messages, cancel, reply } = cmd;
            let mut sink = ChannelSink::new(reply);
            let result = relay
              .generate_with_cancel(&messages, &mut sink, &cancel)
              .await;
            sink.finish(&result);
          });
        }
      , Some(cmd) = shutdown_rx.recv() => {
          debug!("Received Shutdown");
          root.cancel();
          let _ = cmd.reply.send(Ok(()));
          info!("RelayBackend shutting down");
          break;
        }
      , else => {
          debug!("Command channels closed");
          break;
        }
      }
    }
}
