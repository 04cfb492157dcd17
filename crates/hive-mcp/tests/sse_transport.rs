//! Event stream transport tests against a minimal HTTP server on a local socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hive_mcp::{SseTransport, Transport, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

const SSE_HEADERS: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";

/// Event stream state of the test server.
#[derive(Default)]
struct Stream {
    writer: Option<OwnedWriteHalf>,
    /// Frames echoed while no stream was attached
    backlog: Vec<String>,
}

struct TestServer {
    url: String,
    posted: mpsc::UnboundedReceiver<String>,
    streams_opened: Arc<AtomicUsize>,
}

/// Start a server that announces `/messages` as its endpoint and echoes every
/// posted frame back as a `message` event. The first `drops` event streams are
/// closed right after the endpoint event.
async fn start_server(drops: usize) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stream = Arc::new(Mutex::new(Stream::default()));
    let remaining_drops = Arc::new(AtomicUsize::new(drops));
    let streams_opened = Arc::new(AtomicUsize::new(0));
    let (posted_tx, posted) = mpsc::unbounded_channel();

    {
        let streams_opened = streams_opened.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(handle(
                    socket,
                    stream.clone(),
                    remaining_drops.clone(),
                    streams_opened.clone(),
                    posted_tx.clone(),
                ));
            }
        });
    }

    TestServer {
        url: format!("http://{}/sse", addr),
        posted,
        streams_opened,
    }
}

async fn handle(
    socket: TcpStream,
    stream: Arc<Mutex<Stream>>,
    remaining_drops: Arc<AtomicUsize>,
    streams_opened: Arc<AtomicUsize>,
    posted: mpsc::UnboundedSender<String>,
) {
    let (mut reader, mut writer) = socket.into_split();
    let Some((method, path, body)) = read_request(&mut reader).await else {
        return;
    };

    match (method.as_str(), path.as_str()) {
        ("GET", "/sse") => {
            streams_opened.fetch_add(1, Ordering::SeqCst);
            writer.write_all(SSE_HEADERS).await.unwrap();
            writer
                .write_all(b"event: endpoint\ndata: /messages?session=1\n\n")
                .await
                .unwrap();

            let dropped = remaining_drops
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if dropped {
                return;
            }

            let mut state = stream.lock().await;
            for frame in std::mem::take(&mut state.backlog) {
                let event = format!("event: message\ndata: {}\n\n", frame);
                writer.write_all(event.as_bytes()).await.unwrap();
            }
            state.writer = Some(writer);
        }
        ("POST", p) if p.starts_with("/messages") => {
            posted.send(body.clone()).unwrap();
            writer
                .write_all(b"HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();

            let mut state = stream.lock().await;
            match state.writer.as_mut() {
                Some(sse) => {
                    let event = format!("event: message\ndata: {}\n\n", body);
                    let _ = sse.write_all(event.as_bytes()).await;
                }
                None => state.backlog.push(body),
            }
        }
        _ => {
            let _ = writer
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        }
    }
}

/// Read one HTTP request: method, path and body (by Content-Length).
async fn read_request(reader: &mut tokio::net::tcp::OwnedReadHalf) -> Option<(String, String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = reader.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = reader.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some((method, path, String::from_utf8_lossy(&body).into_owned()))
}

async fn next_frame(transport: &mut SseTransport) -> Result<Option<String>, TransportError> {
    tokio::time::timeout(Duration::from_secs(5), transport.receive())
        .await
        .expect("timed out waiting for a frame")
}

#[tokio::test]
async fn test_endpoint_discovery_and_echo() {
    let mut server = start_server(0).await;
    let mut transport = SseTransport::new(&server.url);
    transport.open().await.unwrap();
    assert!(transport.is_connected());

    let endpoint = transport.endpoint().unwrap();
    assert_eq!(endpoint.path(), "/messages");
    assert_eq!(endpoint.query(), Some("session=1"));

    let frame = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
    transport.send(frame).await.unwrap();
    assert_eq!(server.posted.recv().await.as_deref(), Some(frame));
    assert_eq!(next_frame(&mut transport).await.unwrap().as_deref(), Some(frame));

    transport.close().await.unwrap();
    assert!(!transport.is_connected());
    assert!(transport.send(frame).await.is_err());
}

#[tokio::test]
async fn test_single_reconnect_after_stream_loss() {
    let server = start_server(1).await;
    let mut transport = SseTransport::new(&server.url);
    transport.open().await.unwrap();

    let frame = r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#;
    transport.send(frame).await.unwrap();

    // Delivered over the second stream
    assert_eq!(next_frame(&mut transport).await.unwrap().as_deref(), Some(frame));
    assert_eq!(server.streams_opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_second_loss_is_fatal() {
    let server = start_server(usize::MAX).await;
    let mut transport = SseTransport::new(&server.url);
    transport.open().await.unwrap();

    let err = next_frame(&mut transport).await.unwrap_err();
    assert!(matches!(err, TransportError::StreamLost));
    assert!(!transport.is_connected());
    assert_eq!(next_frame(&mut transport).await.unwrap(), None);
    assert_eq!(server.streams_opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut transport = SseTransport::new(format!("http://{}/sse", addr));
    let err = transport.open().await.unwrap_err();
    assert!(err.is_connect_error(), "got {:?}", err);
    assert!(!transport.is_connected());
}
