//! Tests for streamed responses over a mocked server

use futures::StreamExt;
use modelgate_core::api::{BaseUrlApiConfiguration, MaxConcurrency};
use modelgate_core::error::ApiCallError;
use modelgate_core::http::{
    sse_json, ApiRequest, DefaultFailedResponseHandler, EventStream, EventStreamHandler, HttpClient,
    StreamStep,
};
use modelgate_core::HeaderContext;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
struct Delta {
    text: String,
}

fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

async fn mount_stream(server: &MockServer, body: &str) {
    Mock::given(method("POST"))
        .and(path("/stream"))
        .respond_with(sse_response(body))
        .mount(server)
        .await;
}

async fn open(server: &MockServer, cancel: &CancellationToken) -> EventStream<Delta> {
    HttpClient::new()
        .unwrap()
        .request(
            &ApiRequest::post(format!("{}/stream", server.uri())).with_json(json!({"stream": true})),
            &DefaultFailedResponseHandler,
            &sse_json::<Delta>(),
            cancel,
        )
        .await
        .expect("stream should open")
}

/// Events arrive in order and the stream ends at the done marker
#[tokio::test]
async fn test_sse_json_in_order() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        "data: {\"text\":\"Hel\"}\n\n: keep-alive\n\ndata: {\"text\":\"lo\"}\n\ndata: [DONE]\n\ndata: {\"text\":\"ignored\"}\n\n",
    )
    .await;

    let items = open(&server, &CancellationToken::new())
        .await
        .collect_items()
        .await
        .unwrap();
    let texts: Vec<&str> = items.iter().map(|d| d.text.as_str()).collect();
    assert_eq!(texts, vec!["Hel", "lo"]);
}

/// An empty body is an empty stream, not an error
#[tokio::test]
async fn test_empty_body() {
    let server = MockServer::start().await;
    mount_stream(&server, "").await;

    let items = open(&server, &CancellationToken::new())
        .await
        .collect_items()
        .await
        .unwrap();
    assert!(items.is_empty());
}

/// A truncated final frame yields the complete items, then a decoding error
#[tokio::test]
async fn test_truncated_final_frame() {
    let server = MockServer::start().await;
    mount_stream(&server, "data: {\"text\":\"one\"}\n\ndata: {\"text\":\"tw").await;

    let mut stream = open(&server, &CancellationToken::new()).await;

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.text, "one");

    match stream.next().await {
        Some(Err(ApiCallError::Decoding { message, .. })) => {
            assert!(message.contains("ended inside a frame"), "{}", message);
        }
        other => panic!("Expected Decoding error, got: {:?}", other),
    }
    assert!(stream.next().await.is_none());
}

/// Invalid event data ends the stream with a decoding error
#[tokio::test]
async fn test_invalid_event_data() {
    let server = MockServer::start().await;
    mount_stream(&server, "data: {\"text\":\"ok\"}\n\ndata: not json\n\n").await;

    let result = open(&server, &CancellationToken::new())
        .await
        .collect_items()
        .await;
    assert!(matches!(result, Err(ApiCallError::Decoding { .. })));
}

/// Newline-delimited JSON with a custom mapper
#[tokio::test]
async fn test_ndjson_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-ndjson")
                .set_body_string(
                    "{\"response\":\"a\",\"done\":false}\n\n{\"response\":\"b\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n",
                ),
        )
        .mount(&server)
        .await;

    let handler = EventStreamHandler::ndjson(|line: String| -> Result<StreamStep<String>, String> {
        let value: serde_json::Value = serde_json::from_str(&line).map_err(|e| e.to_string())?;
        if value["done"].as_bool() == Some(true) {
            return Ok(StreamStep::Done);
        }
        Ok(StreamStep::Item(
            value["response"].as_str().unwrap_or_default().to_string(),
        ))
    });

    let items = HttpClient::new()
        .unwrap()
        .request(
            &ApiRequest::post(server.uri()),
            &DefaultFailedResponseHandler,
            &handler,
            &CancellationToken::new(),
        )
        .await
        .unwrap()
        .collect_items()
        .await
        .unwrap();
    assert_eq!(items, vec!["a", "b"]);
}

/// Cancelling after the stream opened aborts the next read
#[tokio::test]
async fn test_cancel_open_stream() {
    let server = MockServer::start().await;
    mount_stream(&server, "data: {\"text\":\"a\"}\n\ndata: {\"text\":\"b\"}\n\n").await;

    let cancel = CancellationToken::new();
    let mut stream = open(&server, &cancel).await;
    cancel.cancel();

    assert!(matches!(stream.next().await, Some(Err(ApiCallError::Aborted))));
    assert!(stream.next().await.is_none());
}

/// A stream that is closed early yields nothing more
#[tokio::test]
async fn test_close_stream() {
    let server = MockServer::start().await;
    mount_stream(&server, "data: {\"text\":\"a\"}\n\ndata: {\"text\":\"b\"}\n\n").await;

    let mut stream = open(&server, &CancellationToken::new()).await;
    assert_eq!(stream.next().await.unwrap().unwrap().text, "a");
    stream.close();
    assert!(stream.is_closed());
    assert!(stream.next().await.is_none());
}

/// The throttle slot is returned once the stream is established, not when it ends
#[tokio::test]
async fn test_throttle_released_when_stream_opens() {
    let server = MockServer::start().await;
    mount_stream(&server, "data: {\"text\":\"a\"}\n\ndata: [DONE]\n\n").await;

    let throttle = Arc::new(MaxConcurrency::new(1));
    let api = BaseUrlApiConfiguration::new(&server.uri())
        .unwrap()
        .with_throttle_arc(throttle.clone());

    let client = HttpClient::new().unwrap();
    let stream = client
        .post_json_to_api(
            &api,
            "/stream",
            &HeaderContext::default(),
            json!({}),
            &DefaultFailedResponseHandler,
            &sse_json::<Delta>(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(throttle.available(), 1);

    // A second call is admitted while the first stream is still unread
    let second = client
        .post_json_to_api(
            &api,
            "/stream",
            &HeaderContext::default(),
            json!({}),
            &DefaultFailedResponseHandler,
            &sse_json::<Delta>(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(stream.collect_items().await.unwrap().len(), 1);
    assert_eq!(second.collect_items().await.unwrap().len(), 1);
}
