//! Adapters against a canned HTTP server on a local socket.

use std::time::Duration;

use hive_core::{ProviderError, ToolDescriptor};
use hive_providers::{AnthropicAdapter, GeminiAdapter, GroqAdapter, NormalizedReply, ProviderAdapter};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// A request as seen by the server: head (request line and headers) and body.
struct Seen {
    head: String,
    body: String,
}

/// Serve a single canned response, reporting the request it answered.
async fn serve_once(status: &str, headers: &[&str], body: &str) -> (String, mpsc::UnboundedReceiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        body.len()
    );
    for header in headers {
        response.push_str(header);
        response.push_str("\r\n");
    }
    response.push_str("\r\n");
    response.push_str(body);

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    let body = String::from_utf8_lossy(&buf[end + 4..end + 4 + length]).into_owned();
                    let _ = tx.send(Seen { head, body });
                    break;
                }
            }
        }
        socket.write_all(response.as_bytes()).await.unwrap();
    });

    (url, rx)
}

fn catalog() -> Vec<ToolDescriptor> {
    vec![ToolDescriptor::new("add", "calc").with_description("Add two numbers")]
}

#[tokio::test]
async fn test_groq_tool_call_request_and_reply() {
    let reply = json!({"choices": [{"message": {"role": "assistant", "tool_calls": [
        {"id": "x", "type": "function", "function": {"name": "add", "arguments": "{\"a\":2,\"b\":2}"}}
    ]}}]});
    let (url, mut seen) = serve_once("200 OK", &[], &reply.to_string()).await;
    let adapter = GroqAdapter::new(Some("gsk-test".into())).with_base_url(url);

    let tools = adapter.convert_tools(&catalog());
    let result = adapter.submit(json!([{"role": "user", "content": "2+2?"}]), tools).await.unwrap();
    assert_eq!(
        result,
        NormalizedReply::ToolCall {
            name: "add".into(),
            arguments: json!({"a": 2, "b": 2})
        }
    );

    let request = seen.recv().await.unwrap();
    assert!(request.head.starts_with("post /chat/completions"));
    assert!(request.head.contains("authorization: bearer gsk-test"));
    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body["model"], "llama-3-70b-8192");
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["tools"][0]["function"]["name"], "add");
}

#[tokio::test]
async fn test_gemini_request_shape() {
    let reply = json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "4"}]}}]});
    let (url, mut seen) = serve_once("200 OK", &[], &reply.to_string()).await;
    let adapter = GeminiAdapter::new(Some("g-key".into())).with_base_url(url);

    let result = adapter.submit(json!([]), json!([])).await.unwrap();
    assert_eq!(result, NormalizedReply::Text("4".into()));

    let request = seen.recv().await.unwrap();
    assert!(request.head.starts_with("post /models/gemini-2.0-flash-001:generatecontent"));
    assert!(request.head.contains("x-goog-api-key: g-key"));
    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert!(body.get("tools").is_none(), "empty catalogs are not sent");
}

#[tokio::test]
async fn test_anthropic_headers() {
    let reply = json!({"content": [{"type": "text", "text": "4"}]});
    let (url, mut seen) = serve_once("200 OK", &[], &reply.to_string()).await;
    let adapter = AnthropicAdapter::new(Some("sk-ant".into())).with_base_url(url);

    adapter.submit(json!([]), json!([])).await.unwrap();
    let request = seen.recv().await.unwrap();
    assert!(request.head.starts_with("post /messages"));
    assert!(request.head.contains("x-api-key: sk-ant"));
    assert!(request.head.contains("anthropic-version: 2023-06-01"));
}

#[tokio::test]
async fn test_unauthorized_is_auth_error() {
    let body = r#"{"error":{"message":"Invalid API Key"}}"#;
    let (url, _seen) = serve_once("401 Unauthorized", &[], body).await;
    let adapter = GroqAdapter::new(Some("bad".into())).with_base_url(url);

    let err = adapter.submit(json!([]), json!([])).await.unwrap_err();
    assert!(err.is_auth());
    assert!(err.to_string().contains("Invalid API Key"));
}

#[tokio::test]
async fn test_gemini_invalid_key_is_auth_error() {
    let body = json!({"error": {
        "code": 400,
        "message": "API key not valid. Please pass a valid API key.",
        "status": "INVALID_ARGUMENT",
        "details": [{"@type": "type.googleapis.com/google.rpc.ErrorInfo", "reason": "API_KEY_INVALID"}]
    }});
    let (url, _seen) = serve_once("400 Bad Request", &[], &body.to_string()).await;
    let adapter = GeminiAdapter::new(Some("bad".into())).with_base_url(url);

    let err = adapter.submit(json!([]), json!([])).await.unwrap_err();
    assert!(err.is_auth(), "got {:?}", err);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let (url, _seen) = serve_once("429 Too Many Requests", &["Retry-After: 3"], "{}").await;
    let adapter = GeminiAdapter::new(Some("k".into())).with_base_url(url);

    match adapter.submit(json!([]), json!([])).await.unwrap_err() {
        ProviderError::RateLimited { retry_after, .. } => {
            assert_eq!(retry_after, Some(Duration::from_secs(3)))
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_unparseable_body_is_malformed() {
    let (url, _seen) = serve_once("200 OK", &[], "<html>gateway</html>").await;
    let adapter = AnthropicAdapter::new(Some("k".into())).with_base_url(url);

    let err = adapter.submit(json!([]), json!([])).await.unwrap_err();
    assert!(matches!(err, ProviderError::MalformedReply { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_server_error_is_retryable_api_error() {
    let (url, _seen) = serve_once("503 Service Unavailable", &[], "overloaded").await;
    let adapter = GroqAdapter::new(Some("k".into())).with_base_url(url);

    let err = adapter.submit(json!([]), json!([])).await.unwrap_err();
    assert!(matches!(err, ProviderError::ApiError { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let adapter = GroqAdapter::new(Some("k".into())).with_base_url(url);
    let err = adapter.submit(json!([]), json!([])).await.unwrap_err();
    assert!(matches!(err, ProviderError::NetworkError { .. }));
}
