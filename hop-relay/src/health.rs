//! Minimal HTTP liveness endpoint: `GET /health` returns relay counts as JSON.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::server::{HealthStats, SharedState};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_LEN: usize = 8 * 1024;

/// Serve health checks until the listener fails.
pub async fn run_health(listener: TcpListener, state: SharedState) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "health endpoint listening");
    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, state).await {
                tracing::debug!(error = %e, "health request failed");
            }
        });
    }
}

async fn handle_client(mut stream: TcpStream, state: SharedState) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let request = loop {
        let n = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut chunk)).await {
            Ok(r) => r?,
            Err(_) => return Ok(()),
        };
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        match parse_request(&buf) {
            Some(req) => break req,
            None if buf.len() >= MAX_REQUEST_LEN => break Request::Malformed,
            None => continue,
        }
    };
    let stats = state.lock().await.stats();
    stream.write_all(&respond(request, stats)).await?;
    stream.shutdown().await
}

#[derive(Debug, PartialEq, Eq)]
enum Request {
    Health,
    NotFound,
    Malformed,
}

/// Parse the request head. `None` while incomplete.
fn parse_request(buf: &[u8]) -> Option<Request> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    let status = match req.parse(buf) {
        Ok(s) => s,
        Err(_) => return Some(Request::Malformed),
    };
    if !status.is_complete() {
        return None;
    }
    let method = req.method.unwrap_or_default();
    let path = req.path.unwrap_or_default();
    let path = path.split('?').next().unwrap_or_default();
    if method.eq_ignore_ascii_case("GET") && path == "/health" {
        Some(Request::Health)
    } else {
        Some(Request::NotFound)
    }
}

fn respond(request: Request, stats: HealthStats) -> Vec<u8> {
    let (status, body) = match request {
        Request::Health => (
            "200 OK",
            serde_json::json!({
                "status": "ok",
                "connected_participants": stats.connected_participants,
                "active_sessions": stats.active_sessions,
            })
            .to_string(),
        ),
        Request::NotFound => ("404 Not Found", r#"{"error":"not found"}"#.to_string()),
        Request::Malformed => ("400 Bad Request", r#"{"error":"bad request"}"#.to_string()),
    };
    format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::RelayState;
    use hop_core::DirectoryConfig;

    #[test]
    fn parses_health_get() {
        assert_eq!(
            parse_request(b"GET /health HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some(Request::Health)
        );
        assert_eq!(
            parse_request(b"GET /health?verbose=1 HTTP/1.1\r\n\r\n"),
            Some(Request::Health)
        );
        assert_eq!(
            parse_request(b"POST /health HTTP/1.1\r\n\r\n"),
            Some(Request::NotFound)
        );
        assert_eq!(parse_request(b"GET /health HTTP/1.1\r\nHo"), None);
        assert_eq!(parse_request(b"\x00\x01 junk\r\n\r\n"), Some(Request::Malformed));
    }

    #[test]
    fn health_body_has_counts() {
        let out = respond(
            Request::Health,
            HealthStats {
                connected_participants: 3,
                active_sessions: 1,
            },
        );
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        let body = text.split("\r\n\r\n").nth(1).unwrap();
        let v: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(v["status"], "ok");
        assert_eq!(v["connected_participants"], 3);
        assert_eq!(v["active_sessions"], 1);
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_health(listener, RelayState::shared(DirectoryConfig::default())));
        let mut s = TcpStream::connect(addr).await.unwrap();
        s.write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut out = String::new();
        s.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 200 OK"));
        assert!(out.contains(r#""active_sessions":0"#));
    }
}
