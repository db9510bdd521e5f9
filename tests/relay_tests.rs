mod common;

use std::time::Duration;

use common::*;
use llm_relay::sink::sink_fn;
use llm_relay::{
  BufferSink, Error, Finish, Message, ProviderName, Relay
};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn history() -> Vec<Message>
{   vec![Message::user("What do you build?")]
}

#[tokio::test]
async fn falls_back_in_order_and_stops_at_first_success()
{   init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/a"))
      .and(header("authorization", "Bearer key-a"))
      .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
        "error": { "message": "Rate limit reached" }
      })))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/b"))
      .and(header("authorization", "Bearer key-b"))
      .and(header("accept", "text/event-stream"))
      .respond_with(sse_response(chat_sse(&["Hel", "lo"])))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/c"))
      .respond_with(sse_response(chat_sse(&["never"])))
      .expect(0)
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      chat_provider(ProviderName::Groq, &server.uri(), "/a", Some("key-a"))
    , chat_provider(ProviderName::OpenAi, &server.uri(), "/b", Some("key-b"))
    , chat_provider(ProviderName::Mistral, &server.uri(), "/c", Some("key-c"))
    ])).unwrap();

    let mut sink = BufferSink::new();
    let completion = assert_ok!(relay.generate(&history(), &mut sink).await);

    assert_eq!(completion.provider, ProviderName::OpenAi);
    assert_eq!(completion.deltas, 2);
    assert_eq!(completion.finish, Finish::Sentinel);
    assert_eq!(sink.deltas, vec!["Hel", "lo"]);
    assert!(sink.error.is_none());

    let paths: Vec<String> = server.received_requests().await.unwrap()
      .iter()
      .map(|r| r.url.path().to_string())
      .collect();
    assert_eq!(paths, vec!["/a", "/b"]);
}

#[tokio::test]
async fn fatal_status_short_circuits()
{   init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/a"))
      .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
        "error": { "message": "messages: field required" }
      })))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/b"))
      .respond_with(sse_response(chat_sse(&["unused"])))
      .expect(0)
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      chat_provider(ProviderName::Groq, &server.uri(), "/a", Some("k"))
    , chat_provider(ProviderName::OpenAi, &server.uri(), "/b", Some("k"))
    ])).unwrap();

    let mut sink = BufferSink::new();
    let err = assert_err!(relay.generate(&history(), &mut sink).await);

    assert_eq!(err, Error::Status
    {   provider: ProviderName::Groq
      , status: 400
      , message: "messages: field required".to_string()
    });
    assert!(sink.deltas.is_empty());
    assert_eq!(sink.error, Some(err));
}

#[tokio::test]
async fn provider_without_key_is_never_called()
{   init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .respond_with(sse_response(chat_sse(&["unused"])))
      .expect(0)
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      chat_provider(ProviderName::Groq, &server.uri(), "/a", None)
    ])).unwrap();

    let mut sink = BufferSink::new();
    let err = assert_err!(relay.generate(&history(), &mut sink).await);

    assert_eq!(err, Error::Exhausted { last: None });
    assert!(err.to_string().contains("no providers configured"));
    assert_eq!(sink.error, Some(err));
}

#[tokio::test]
async fn skipped_provider_does_not_count_as_failure()
{   init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/b"))
      .respond_with(sse_response(chat_sse(&["ok"])))
      .expect(1)
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      chat_provider(ProviderName::Groq, &server.uri(), "/a", Some("  "))
    , chat_provider(ProviderName::OpenAi, &server.uri(), "/b", Some("k"))
    ])).unwrap();

    let mut sink = BufferSink::new();
    let completion = assert_ok!(relay.generate(&history(), &mut sink).await);
    assert_eq!(completion.provider, ProviderName::OpenAi);
    assert_eq!(sink.text, "ok");
}

#[tokio::test]
async fn exhaustion_reports_last_error()
{   init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/a"))
      .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/b"))
      .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
        "error": { "message": "Invalid API Key" }
      })))
      .expect(1)
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      chat_provider(ProviderName::Groq, &server.uri(), "/a", Some("k"))
    , chat_provider(ProviderName::Mistral, &server.uri(), "/b", Some("k"))
    ])).unwrap();

    let mut sink = BufferSink::new();
    let err = assert_err!(relay.generate(&history(), &mut sink).await);

    let expected_last = Error::Status
    {   provider: ProviderName::Mistral
      , status: 401
      , message: "Invalid API Key".to_string()
    };
    assert_eq!(err, Error::Exhausted { last: Some(Box::new(expected_last)) });
    assert!(err.to_string().contains("Invalid API Key"));
}

#[tokio::test]
async fn gemini_gets_query_key_and_contents_schema()
{   init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/v1beta/models/gemini-2.0-flash:streamGenerateContent"))
      .and(query_param("key", "g-key"))
      .and(query_param("alt", "sse"))
      .and(body_partial_json(serde_json::json!({
        "contents": [
          { "role": "user", "parts": [{ "text": "U1" }] },
          { "role": "model", "parts": [{ "text": "A1" }] },
          { "role": "user", "parts": [{ "text": "U2" }] }
        ],
        "systemInstruction": { "parts": [{ "text": PERSONA }] }
      })))
      .respond_with(sse_response(gemini_sse(&["Hi", " there"])))
      .expect(1)
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      gemini_provider(&server.uri(), Some("g-key"))
    ])).unwrap();

    let messages = vec![
      Message::user("U1")
    , Message::assistant("A1")
    , Message::user("U2")
    ];
    let mut sink = BufferSink::new();
    let completion = assert_ok!(relay.generate(&messages, &mut sink).await);

    assert_eq!(completion.provider, ProviderName::Gemini);
    assert_eq!(completion.model, "gemini-2.0-flash");
    assert_eq!(completion.finish, Finish::EndOfStream);
    assert_eq!(sink.text, "Hi there");
}

#[tokio::test]
async fn chat_array_body_carries_persona_and_defaults()
{   init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/a"))
      .and(body_partial_json(serde_json::json!({
        "model": "llama-3.3-70b-versatile",
        "stream": true,
        "max_tokens": 1024,
        "messages": [
          { "role": "system", "content": PERSONA },
          { "role": "user", "content": "What do you build?" }
        ]
      })))
      .respond_with(sse_response(chat_sse(&["Sites"])))
      .expect(1)
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      chat_provider(ProviderName::Groq, &server.uri(), "/a", Some("k"))
    ])).unwrap();

    let messages = history();
    let mut sink = BufferSink::new();
    assert_ok!(relay.generate(&messages, &mut sink).await);
    assert_eq!(messages, history());
}

#[tokio::test]
async fn malformed_chunk_does_not_abort_the_call()
{   init_logging();
    let server = MockServer::start().await;

    let body = format!(
      "data: {}\n\n: heartbeat\n\ndata: {{oops\n\n{}",
      serde_json::json!({ "choices": [{ "delta": { "content": "A" } }] }),
      chat_sse(&["B"])
    );
    Mock::given(method("POST"))
      .respond_with(sse_response(body))
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      chat_provider(ProviderName::Groq, &server.uri(), "/a", Some("k"))
    ])).unwrap();

    let mut seen = Vec::new();
    let mut sink = sink_fn(|text: &str| seen.push(text.to_string()));
    let completion = assert_ok!(relay.generate(&history(), &mut sink).await);

    assert_eq!(completion.deltas, 2);
    assert_eq!(seen, vec!["A", "B"]);
}

#[tokio::test]
async fn partial_output_then_failure_is_terminal()
{   init_logging();
    let fallback = MockServer::start().await;

    Mock::given(method("POST"))
      .respond_with(sse_response(chat_sse(&["duplicate"])))
      .expect(0)
      .mount(&fallback)
      .await;

    let frames: Vec<String> = ["Hel", "lo"].iter()
      .map(|delta| {
        format!(
          "data: {}\n\n",
          serde_json::json!({ "choices": [{ "delta": { "content": delta } }] })
        )
      })
      .collect();
    let endpoint = truncated_stream_server(frames).await;

    let primary = llm_relay::ProviderConfig::new(
      ProviderName::Groq,
      Some("k".to_string())
    ).with_endpoint(endpoint);

    let relay = Relay::new(relay_config(vec![
      primary
    , chat_provider(ProviderName::OpenAi, &fallback.uri(), "/b", Some("k"))
    ])).unwrap();

    let mut sink = BufferSink::new();
    let err = assert_err!(relay.generate(&history(), &mut sink).await);

    assert_eq!(sink.deltas, vec!["Hel", "lo"]);
    assert!(err.is_partial());
    assert!(matches!(
      err,
      Error::Stream { provider: ProviderName::Groq, delivered: 2, .. }
    ));
    assert_eq!(sink.error, Some(err));
}

#[tokio::test]
async fn stream_broken_before_any_delta_falls_back()
{   init_logging();
    let fallback = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/b"))
      .respond_with(sse_response(chat_sse(&["ok"])))
      .expect(1)
      .mount(&fallback)
      .await;

    let endpoint = truncated_stream_server(vec![": ping\n\n".to_string()]).await;
    let primary = llm_relay::ProviderConfig::new(
      ProviderName::Groq,
      Some("k".to_string())
    ).with_endpoint(endpoint);

    let relay = Relay::new(relay_config(vec![
      primary
    , chat_provider(ProviderName::OpenAi, &fallback.uri(), "/b", Some("k"))
    ])).unwrap();

    let mut sink = BufferSink::new();
    let completion = assert_ok!(relay.generate(&history(), &mut sink).await);

    assert_eq!(completion.provider, ProviderName::OpenAi);
    assert_eq!(sink.deltas, vec!["ok"]);
    assert!(sink.error.is_none());
}

#[tokio::test]
async fn slow_provider_times_out_and_falls_back()
{   init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/a"))
      .respond_with(
        sse_response(chat_sse(&["late"])).set_delay(Duration::from_secs(3))
      )
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/b"))
      .respond_with(sse_response(chat_sse(&["fast"])))
      .expect(1)
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      chat_provider(ProviderName::Groq, &server.uri(), "/a", Some("k"))
    , chat_provider(ProviderName::OpenAi, &server.uri(), "/b", Some("k"))
    ])).unwrap();

    let mut sink = BufferSink::new();
    let completion = assert_ok!(relay.generate(&history(), &mut sink).await);
    assert_eq!(completion.provider, ProviderName::OpenAi);
    assert_eq!(sink.text, "fast");
}

#[tokio::test]
async fn cancellation_ends_the_call_without_fallback()
{   init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .and(path("/a"))
      .respond_with(
        sse_response(chat_sse(&["late"])).set_delay(Duration::from_millis(800))
      )
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/b"))
      .respond_with(sse_response(chat_sse(&["unused"])))
      .expect(0)
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      chat_provider(ProviderName::Groq, &server.uri(), "/a", Some("k"))
    , chat_provider(ProviderName::OpenAi, &server.uri(), "/b", Some("k"))
    ])).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      trigger.cancel();
    });

    let mut sink = BufferSink::new();
    let err = assert_err!(
      relay.generate_with_cancel(&history(), &mut sink, &cancel).await
    );
    assert_eq!(err, Error::Cancelled);
    assert!(sink.deltas.is_empty());
}

#[tokio::test]
async fn cancellation_interrupts_reading_an_error_body()
{   init_logging();
    let fallback = MockServer::start().await;

    Mock::given(method("POST"))
      .respond_with(sse_response(chat_sse(&["unused"])))
      .expect(0)
      .mount(&fallback)
      .await;

    let primary = llm_relay::ProviderConfig::new(
      ProviderName::Groq,
      Some("k".to_string())
    ).with_endpoint(stalled_error_server(503).await);

    let relay = Relay::new(relay_config(vec![
      primary
    , chat_provider(ProviderName::OpenAi, &fallback.uri(), "/b", Some("k"))
    ])).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(150)).await;
      trigger.cancel();
    });

    let started = std::time::Instant::now();
    let mut sink = BufferSink::new();
    let err = assert_err!(
      relay.generate_with_cancel(&history(), &mut sink, &cancel).await
    );

    // The 1s read timeout would have failed over to the fallback
    assert_eq!(err, Error::Cancelled);
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(sink.error, Some(Error::Cancelled));
}

#[tokio::test]
async fn concurrent_calls_are_independent()
{   init_logging();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
      .respond_with(sse_response(chat_sse(&["same", " reply"])))
      .expect(2)
      .mount(&server)
      .await;

    let relay = Relay::new(relay_config(vec![
      chat_provider(ProviderName::Groq, &server.uri(), "/a", Some("k"))
    ])).unwrap();

    let first = relay.clone();
    let second = relay.clone();
    let (a, b) = tokio::join!(
      async move {
        let mut sink = BufferSink::new();
        first.generate(&history(), &mut sink).await.map(|_| sink.text)
      },
      async move {
        let mut sink = BufferSink::new();
        second.generate(&history(), &mut sink).await.map(|_| sink.text)
      }
    );
    assert_eq!(a.unwrap(), "same reply");
    assert_eq!(b.unwrap(), "same reply");
}
