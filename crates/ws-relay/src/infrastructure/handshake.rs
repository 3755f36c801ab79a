//! HTTP upgrade handshake.
//!
//! The relay reads the HTTP request head itself instead of handing the raw
//! socket to tungstenite's `accept_async`, because it has to answer requests
//! that are *not* WebSocket upgrades with a proper client-error status.
//! tungstenite would just drop them.
//!
//! ```text
//! read head (≤ 8 KiB, ≤ handshake_timeout)
//!   ├─ not an upgrade ─────────► 400 Bad Request, close
//!   ├─ upgrade, wrong path ────► 404 Not Found, close
//!   └─ upgrade on our path ────► 101 Switching Protocols
//!                                  └─► WebSocketStream (server role)
//! ```
//!
//! Only the request head is parsed; any request body is ignored because the
//! connection is closed right after a rejection.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;

use crate::domain::RelayConfig;

/// Largest request head accepted before the request is rejected.
pub const MAX_REQUEST_HEAD: usize = 8 * 1024;

const WEBSOCKET_VERSION: &str = "13";

/// Why a connection did not become a WebSocket session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// A well-formed HTTP request that is not a WebSocket upgrade.
    #[error("not a WebSocket upgrade request: {0}")]
    NotUpgrade(String),

    /// An upgrade request for a path the relay does not serve.
    #[error("upgrade requested for unknown path {0:?}")]
    WrongPath(String),

    /// The bytes received do not form an HTTP/1.1 request head.
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request head exceeds {MAX_REQUEST_HEAD} bytes")]
    HeadTooLarge,

    /// The client closed the connection before finishing the request.
    #[error("connection closed before request head was complete")]
    Incomplete,

    #[error("handshake timed out")]
    Timeout,

    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

impl HandshakeError {
    /// HTTP status to answer with, or `None` if no response should be sent.
    pub fn rejection_status(&self) -> Option<(u16, &'static str)> {
        match self {
            HandshakeError::NotUpgrade(_)
            | HandshakeError::Malformed(_)
            | HandshakeError::HeadTooLarge => Some((400, "Bad Request")),
            HandshakeError::WrongPath(_) => Some((404, "Not Found")),
            HandshakeError::Incomplete | HandshakeError::Timeout | HandshakeError::Io(_) => None,
        }
    }
}

/// The parts of a valid upgrade request the relay needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub path: String,
    pub key: String,
}

/// Returns the index just past the `\r\n\r\n` that ends a request head.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Parses a request head and decides whether it is an upgrade for
/// `expected_path`.  The query string, if any, is ignored for path matching.
///
/// # Errors
///
/// [`HandshakeError::Malformed`] for unparseable heads,
/// [`HandshakeError::NotUpgrade`] for regular HTTP requests, and
/// [`HandshakeError::WrongPath`] for upgrades to another path.
pub fn parse_request_head(head: &str, expected_path: &str) -> Result<UpgradeRequest, HandshakeError> {
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| HandshakeError::Malformed("empty request line".to_string()))?;

    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) => (m, t, v),
        _ => {
            return Err(HandshakeError::Malformed(format!(
                "bad request line {request_line:?}"
            )))
        }
    };
    if !version.starts_with("HTTP/") {
        return Err(HandshakeError::Malformed(format!("bad HTTP version {version:?}")));
    }

    let mut upgrade = None;
    let mut connection = None;
    let mut key = None;
    let mut ws_version = None;
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HandshakeError::Malformed(format!("bad header line {line:?}")))?;
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "upgrade" => upgrade = Some(value),
            "connection" => connection = Some(value),
            "sec-websocket-key" => key = Some(value),
            "sec-websocket-version" => ws_version = Some(value),
            _ => {}
        }
    }

    if method != "GET" {
        return Err(HandshakeError::NotUpgrade(format!("method {method}")));
    }
    if version != "HTTP/1.1" {
        return Err(HandshakeError::NotUpgrade(format!("version {version}")));
    }
    if !upgrade.is_some_and(|v| has_token(v, "websocket")) {
        return Err(HandshakeError::NotUpgrade("missing Upgrade: websocket".to_string()));
    }
    if !connection.is_some_and(|v| has_token(v, "upgrade")) {
        return Err(HandshakeError::NotUpgrade("missing Connection: upgrade".to_string()));
    }
    if ws_version != Some(WEBSOCKET_VERSION) {
        return Err(HandshakeError::NotUpgrade(format!(
            "unsupported Sec-WebSocket-Version {ws_version:?}"
        )));
    }
    let key = key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| HandshakeError::NotUpgrade("missing Sec-WebSocket-Key".to_string()))?;

    let path = target.split('?').next().unwrap_or(target);
    if path != expected_path {
        return Err(HandshakeError::WrongPath(path.to_string()));
    }

    Ok(UpgradeRequest {
        path: path.to_string(),
        key: key.to_string(),
    })
}

/// Case-insensitive search for `token` in a comma-separated header value.
fn has_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// The `101` response completing the handshake for `key`.
pub fn switching_protocols_response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        derive_accept_key(key.as_bytes())
    )
}

/// A bodiless error response that also closes the connection.
pub fn rejection_response(status: u16, reason: &str) -> String {
    format!("HTTP/1.1 {status} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
}

/// Reads until the end of the request head.
///
/// Returns the head, including its terminating blank line, and any bytes
/// that arrived after it.
pub async fn read_request_head<S>(stream: &mut S) -> Result<(String, Vec<u8>), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::Incomplete);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_head_end(&buf) {
            // The terminator can arrive in the read that crosses the limit.
            if end > MAX_REQUEST_HEAD {
                return Err(HandshakeError::HeadTooLarge);
            }
            let leftover = buf.split_off(end);
            let head = String::from_utf8(buf)
                .map_err(|_| HandshakeError::Malformed("request head is not UTF-8".to_string()))?;
            return Ok((head, leftover));
        }
        if buf.len() > MAX_REQUEST_HEAD {
            return Err(HandshakeError::HeadTooLarge);
        }
    }
}

/// tungstenite limits matching the relay's message limit.
pub fn websocket_config(config: &RelayConfig) -> WebSocketConfig {
    let mut ws = WebSocketConfig::default();
    ws.max_message_size = Some(config.max_message_size);
    ws.max_frame_size = Some(config.max_message_size);
    ws
}

/// Runs the server side of the handshake on `stream`.
///
/// On rejection the matching error response is written (best effort) and the
/// stream is shut down before the error is returned.
///
/// # Errors
///
/// Any [`HandshakeError`]; none of them affect other connections.
pub async fn accept_upgrade<S>(
    mut stream: S,
    config: &RelayConfig,
) -> Result<WebSocketStream<S>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = match timeout(config.handshake_timeout, read_request_head(&mut stream)).await {
        Ok(Ok((head, leftover))) => {
            parse_request_head(&head, &config.path).map(|request| (request, leftover))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(HandshakeError::Timeout),
    };

    match outcome {
        Ok((request, leftover)) => {
            stream
                .write_all(switching_protocols_response(&request.key).as_bytes())
                .await?;
            stream.flush().await?;
            Ok(WebSocketStream::from_partially_read(
                stream,
                leftover,
                Role::Server,
                Some(websocket_config(config)),
            )
            .await)
        }
        Err(err) => {
            if let Some((status, reason)) = err.rejection_status() {
                let _ = stream
                    .write_all(rejection_response(status, reason).as_bytes())
                    .await;
                let _ = stream.shutdown().await;
            }
            Err(err)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const UPGRADE: &str = "GET /ws?room=1 HTTP/1.1\r\n\
        Host: localhost:8080\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Upgrade: websocket\r\n\
        Sec-WebSocket-Version: 13\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

    fn config_for(path: &str) -> RelayConfig {
        RelayConfig {
            path: path.to_string(),
            handshake_timeout: Duration::from_secs(1),
            ..RelayConfig::default()
        }
    }

    #[test]
    fn test_find_head_end_locates_blank_line() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nrest"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[test]
    fn test_parse_valid_upgrade_ignores_query_and_header_case() {
        // Act
        let request = parse_request_head(UPGRADE, "/ws").unwrap();

        // Assert
        assert_eq!(request.path, "/ws");
        assert_eq!(request.key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn test_plain_get_is_not_an_upgrade() {
        let head = "GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let err = parse_request_head(head, "/").unwrap_err();
        assert!(matches!(err, HandshakeError::NotUpgrade(_)));
        assert_eq!(err.rejection_status(), Some((400, "Bad Request")));
    }

    #[test]
    fn test_post_is_not_an_upgrade() {
        let head = UPGRADE.replacen("GET", "POST", 1);
        let err = parse_request_head(&head, "/ws").unwrap_err();
        assert!(matches!(err, HandshakeError::NotUpgrade(m) if m.contains("POST")));
    }

    #[test]
    fn test_missing_key_is_not_an_upgrade() {
        let head = UPGRADE.replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
        assert!(matches!(
            parse_request_head(&head, "/ws"),
            Err(HandshakeError::NotUpgrade(_))
        ));
    }

    #[test]
    fn test_wrong_websocket_version_is_not_an_upgrade() {
        let head = UPGRADE.replace("Sec-WebSocket-Version: 13", "Sec-WebSocket-Version: 8");
        assert!(matches!(
            parse_request_head(&head, "/ws"),
            Err(HandshakeError::NotUpgrade(_))
        ));
    }

    #[test]
    fn test_upgrade_to_other_path_is_404() {
        let err = parse_request_head(UPGRADE, "/game").unwrap_err();
        assert!(matches!(&err, HandshakeError::WrongPath(p) if p == "/ws"));
        assert_eq!(err.rejection_status(), Some((404, "Not Found")));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            parse_request_head("\r\n", "/"),
            Err(HandshakeError::Malformed(_))
        ));
        assert!(matches!(
            parse_request_head("HELLO\r\n\r\n", "/"),
            Err(HandshakeError::Malformed(_))
        ));
        assert!(matches!(
            parse_request_head("GET / HTTP/1.1\r\nno-colon-here\r\n\r\n", "/"),
            Err(HandshakeError::Malformed(_))
        ));
    }

    #[test]
    fn test_switching_protocols_uses_rfc6455_accept_key() {
        // The sample key/accept pair from RFC 6455 §1.3.
        let response = switching_protocols_response("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_rejection_and_timeout_statuses() {
        assert_eq!(HandshakeError::HeadTooLarge.rejection_status(), Some((400, "Bad Request")));
        assert_eq!(HandshakeError::Timeout.rejection_status(), None);
        assert_eq!(HandshakeError::Incomplete.rejection_status(), None);
    }

    #[tokio::test]
    async fn test_read_request_head_returns_leftover_bytes() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nEXTRA")
            .build();

        let (head, leftover) = read_request_head(&mut stream).await.unwrap();

        assert_eq!(head, "GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(leftover, b"EXTRA");
    }

    #[tokio::test]
    async fn test_read_request_head_across_multiple_reads() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"GET / HTTP/1.1\r\nHo")
            .read(b"st: x\r\n\r\n")
            .build();

        let (head, leftover) = read_request_head(&mut stream).await.unwrap();

        assert!(head.ends_with("Host: x\r\n\r\n"));
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn test_read_request_head_rejects_oversize_head() {
        // 9 full 1 KiB reads: the whole mock input is consumed before the limit trips.
        let filler = vec![b'a'; MAX_REQUEST_HEAD + 1024];
        let mut stream = tokio_test::io::Builder::new().read(&filler).build();

        let result = read_request_head(&mut stream).await;

        assert!(matches!(result, Err(HandshakeError::HeadTooLarge)));
    }

    /// A complete request head of `len` bytes, blank line included.
    fn padded_head(len: usize) -> Vec<u8> {
        let prefix = b"GET / HTTP/1.1\r\nX-Pad: ";
        let suffix = b"\r\n\r\n";
        let mut head = prefix.to_vec();
        head.resize(len - suffix.len(), b'a');
        head.extend_from_slice(suffix);
        head
    }

    #[tokio::test]
    async fn test_read_request_head_rejects_complete_head_over_limit() {
        // Arrange: terminated, but 500 bytes past the cap, all in one read
        let head = padded_head(MAX_REQUEST_HEAD + 500);
        let mut stream = tokio_test::io::Builder::new().read(&head).build();

        // Act
        let result = read_request_head(&mut stream).await;

        // Assert
        assert!(matches!(result, Err(HandshakeError::HeadTooLarge)));
    }

    #[tokio::test]
    async fn test_read_request_head_accepts_head_exactly_at_limit() {
        let head = padded_head(MAX_REQUEST_HEAD);
        let mut stream = tokio_test::io::Builder::new().read(&head).build();

        let (parsed, leftover) = read_request_head(&mut stream).await.unwrap();

        assert_eq!(parsed.len(), MAX_REQUEST_HEAD);
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn test_read_request_head_reports_early_eof() {
        let mut stream = tokio_test::io::Builder::new().read(b"GET / HT").build();

        let result = read_request_head(&mut stream).await;

        assert!(matches!(result, Err(HandshakeError::Incomplete)));
    }

    #[tokio::test]
    async fn test_accept_upgrade_answers_plain_request_with_400() {
        // Arrange: the mock asserts the exact bytes written back
        let expected = rejection_response(400, "Bad Request");
        let stream = tokio_test::io::Builder::new()
            .read(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .write(expected.as_bytes())
            .build();

        // Act
        let result = accept_upgrade(stream, &config_for("/")).await;

        // Assert
        assert!(matches!(result, Err(HandshakeError::NotUpgrade(_))));
    }

    #[tokio::test]
    async fn test_accept_upgrade_answers_wrong_path_with_404() {
        let expected = rejection_response(404, "Not Found");
        let stream = tokio_test::io::Builder::new()
            .read(UPGRADE.as_bytes())
            .write(expected.as_bytes())
            .build();

        let result = accept_upgrade(stream, &config_for("/other")).await;

        assert!(matches!(result, Err(HandshakeError::WrongPath(_))));
    }

    #[tokio::test]
    async fn test_accept_upgrade_writes_101_on_success() {
        let expected = switching_protocols_response("dGhlIHNhbXBsZSBub25jZQ==");
        let stream = tokio_test::io::Builder::new()
            .read(UPGRADE.as_bytes())
            .write(expected.as_bytes())
            .build();

        let result = accept_upgrade(stream, &config_for("/ws")).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_accept_upgrade_times_out_silently() {
        // Arrange: a client that connects and never sends anything
        let stream = tokio_test::io::Builder::new()
            .wait(Duration::from_secs(30))
            .build();
        let config = RelayConfig {
            handshake_timeout: Duration::from_millis(100),
            ..config_for("/")
        };

        // Act
        let result = accept_upgrade(stream, &config).await;

        // Assert: no response is written on timeout
        assert!(matches!(result, Err(HandshakeError::Timeout)));
    }

    #[test]
    fn test_websocket_config_applies_message_limit() {
        let config = RelayConfig {
            max_message_size: 4096,
            ..RelayConfig::default()
        };
        let ws = websocket_config(&config);
        assert_eq!(ws.max_message_size, Some(4096));
        assert_eq!(ws.max_frame_size, Some(4096));
    }
}
