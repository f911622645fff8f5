//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// What the mock upstream should do for one request.
#[allow(dead_code)]
pub enum MockResponse {
    /// Respond with this status and JSON body.
    Json(u16, String),
    /// Drop the connection without writing anything.
    Hangup,
}

/// Start a mock upstream that inspects the bearer credential of each
/// request and answers according to `behavior`.
///
/// Returns the bound address (bind to port 0 for a free one).
pub async fn start_mock_upstream<F>(behavior: F) -> SocketAddr
where
    F: Fn(Option<&str>) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let behavior = Arc::new(behavior);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let behavior = behavior.clone();
            tokio::spawn(async move {
                let Some(request_head) = read_request(&mut socket).await else {
                    return;
                };
                let bearer = extract_bearer(&request_head);

                match behavior(bearer.as_deref()) {
                    MockResponse::Json(status, body) => {
                        let status_text = match status {
                            200 => "200 OK",
                            401 => "401 Unauthorized",
                            404 => "404 Not Found",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                    MockResponse::Hangup => {
                        drop(socket);
                    }
                }
            });
        }
    });

    addr
}

/// Read headers plus body (per content-length) and return the raw text.
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        if buffer.len() > 64 * 1024 {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    let mut body_read = buffer.len() - (header_end + 4);
    while body_read < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    Some(head)
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn extract_bearer(head: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.eq_ignore_ascii_case("authorization") {
            return None;
        }
        value
            .trim()
            .strip_prefix("Bearer ")
            .map(|token| token.to_string())
    })
}

/// Standard rate-limit error body in the OpenRouter shape.
#[allow(dead_code)]
pub fn rate_limit_body() -> String {
    r#"{"error":{"code":429,"message":"Rate limit exceeded: free-models-per-day"}}"#.to_string()
}

/// Minimal successful completion body.
pub fn completion_body() -> String {
    r#"{"id":"gen-1","choices":[{"message":{"role":"assistant","content":"ok"}}]}"#.to_string()
}
