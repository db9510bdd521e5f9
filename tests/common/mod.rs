#![allow(dead_code)]

use llm_relay::{ProviderConfig, ProviderName, RelayConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::ResponseTemplate;

pub const PERSONA: &str = "You are a test persona.";

pub fn init_logging()
{   let _ = env_logger::builder().is_test(true).try_init();
}

/// Chat-array provider pointed at `uri` + `path`
pub fn chat_provider(
  name: ProviderName
, uri: &str
, path: &str
, key: Option<&str>
) -> ProviderConfig
{   ProviderConfig::new(name, key.map(str::to_string))
      .with_endpoint(format!("{}{}", uri, path))
}

pub fn gemini_provider(uri: &str, key: Option<&str>) -> ProviderConfig
{   ProviderConfig::new(ProviderName::Gemini, key.map(str::to_string))
      .with_endpoint(format!(
        "{}/v1beta/models/gemini-2.0-flash:streamGenerateContent",
        uri
      ))
}

pub fn relay_config(providers: Vec<ProviderConfig>) -> RelayConfig
{   let mut config = RelayConfig::new(providers).with_persona(PERSONA);
    config.timeout_secs = 1;
    config.connect_timeout_secs = 1;
    config
}

/// One chat-array SSE event per delta followed by `[DONE]`
pub fn chat_sse(deltas: &[&str]) -> String
{   let mut body = String::new();
    for delta in deltas
    {   let chunk = serde_json::json!({
          "choices": [{ "index": 0, "delta": { "content": delta } }]
        });
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Gemini SSE events, CRLF delimited, no sentinel
pub fn gemini_sse(deltas: &[&str]) -> String
{   deltas.iter()
      .map(|delta| {
        let chunk = serde_json::json!({
          "candidates": [{
            "content": { "role": "model", "parts": [{ "text": delta }] }
          }]
        });
        format!("data: {}\r\n\r\n", chunk)
      })
      .collect()
}

pub fn sse_response(body: String) -> ResponseTemplate
{   ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

/// Serves one request with a chunked SSE body that is cut off
/// after `frames`: no terminating chunk, then EOF.
/// Returns the endpoint URL.
pub async fn truncated_stream_server(frames: Vec<String>) -> String
{   let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      read_request(&mut socket).await;

      let mut out = String::from(
        "HTTP/1.1 200 OK\r\n\
         content-type: text/event-stream\r\n\
         transfer-encoding: chunked\r\n\r\n"
      );
      for frame in frames
      {   out.push_str(&format!("{:x}\r\n{}\r\n", frame.len(), frame));
      }
      socket.write_all(out.as_bytes()).await.unwrap();
      socket.flush().await.unwrap();
      let _ = socket.shutdown().await;
    });

    format!("http://{}/v1/chat/completions", addr)
}

async fn read_request(socket: &mut TcpStream)
{   let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop
    {   let n = socket.read(&mut chunk).await.unwrap();
        if n == 0
        {   return;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n")
        {   let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = head.lines()
              .find_map(|line| line.strip_prefix("content-length:"))
              .and_then(|value| value.trim().parse::<usize>().ok())
              .unwrap_or(0);
            if buf.len() >= end + 4 + body_len
            {   return;
            }
        }
    }
}

/// Serves one request with an error status whose body never
/// finishes: headers and a few bytes, then the socket is held open.
/// Returns the endpoint URL.
pub async fn stalled_error_server(status: u16) -> String
{   let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      read_request(&mut socket).await;

      let head = format!(
        "HTTP/1.1 {} Error\r\n\
         content-type: application/json\r\n\
         content-length: 4096\r\n\r\n\
         {{\"error\":",
        status
      );
      socket.write_all(head.as_bytes()).await.unwrap();
      socket.flush().await.unwrap();
      tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    });

    format!("http://{}/v1/chat/completions", addr)
}
