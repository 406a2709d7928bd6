//! HTTP/1.1 Upgrade handshake (RFC 6455 Section 4)
//!
//! Runs once over an already-established (TLS) stream. The response head is
//! read byte-by-byte so nothing past the blank line is consumed: the same
//! stream carries WebSocket frames immediately afterwards.
//!
//! No retry happens here; the connection supervisor owns retry policy.

use base64::Engine;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::HandshakeError;

/// RFC 6455 GUID appended to the key before hashing
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Static Origin header sent with every upgrade request
const ORIGIN: &str = "https://polymarket.com";

/// Static User-Agent header sent with every upgrade request
const USER_AGENT: &str = concat!("polymarket-ws/", env!("CARGO_PKG_VERSION"));

/// Upper bound on the response status line plus headers
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// `base64(SHA1(key ++ GUID))`
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Fresh base64-encoded 16-byte nonce
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

/// Perform the client side of the upgrade on `stream`.
///
/// Returns `Ok(())` once a `101` with a matching `Sec-WebSocket-Accept`
/// has been read; the stream is then positioned at the first frame.
pub async fn perform<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    resource: &str,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let key = generate_key();
    let expected = compute_accept_key(&key);

    let request = build_request(host, port, resource, &key);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut budget = MAX_RESPONSE_HEAD;

    let status_line = read_line(stream, &mut budget).await?;
    let status = parse_status(&status_line)?;
    debug!("Handshake status line: {}", status_line);
    if status != 101 {
        return Err(HandshakeError::UnexpectedStatus(status));
    }

    let mut accept = None;
    loop {
        let line = read_line(stream, &mut budget).await?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(HandshakeError::MalformedResponse(format!("bad header line: {}", line)));
        };
        if name.trim().to_ascii_lowercase() == "sec-websocket-accept" {
            accept = Some(value.trim().to_string());
        }
    }

    match accept {
        None => Err(HandshakeError::MissingAccept),
        Some(actual) if actual != expected => {
            Err(HandshakeError::AcceptMismatch { expected, actual })
        }
        Some(_) => Ok(()),
    }
}

fn build_request(host: &str, port: u16, resource: &str, key: &str) -> String {
    let host_header = if port == 443 || port == 80 {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    };

    format!(
        "GET {resource} HTTP/1.1\r\n\
         Host: {host_header}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Origin: {ORIGIN}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         \r\n"
    )
}

/// Read one CRLF-terminated line, one byte at a time
async fn read_line<S>(stream: &mut S, budget: &mut usize) -> Result<String, HandshakeError>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    loop {
        if *budget == 0 {
            return Err(HandshakeError::MalformedResponse("response head too large".into()));
        }
        *budget -= 1;

        let byte = stream.read_u8().await?;
        if byte == b'\n' && line.last() == Some(&b'\r') {
            line.pop();
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        line.push(byte);
    }
}

/// `HTTP/1.1 101 Switching Protocols` -> 101
fn parse_status(line: &str) -> Result<u16, HandshakeError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| HandshakeError::MalformedResponse(format!("bad status line: {}", line))),
        _ => Err(HandshakeError::MalformedResponse(format!("bad status line: {}", line))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    /// Minimal server side: read the request head, return it with the client key
    async fn read_request(server: &mut DuplexStream) -> (String, String) {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(server.read_u8().await.unwrap());
        }
        let head = String::from_utf8(head).unwrap();
        let key = head
            .lines()
            .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap()
            .to_string();
        (head, key)
    }

    #[test]
    fn test_rfc_accept_example() {
        assert_eq!(compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_generated_key_is_16_bytes() {
        let key = generate_key();
        let raw = base64::engine::general_purpose::STANDARD.decode(&key).unwrap();
        assert_eq!(raw.len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("HTTP/1.1 101 Switching Protocols").unwrap(), 101);
        assert_eq!(parse_status("HTTP/1.1 403 Forbidden").unwrap(), 403);
        assert!(parse_status("garbage").is_err());
    }

    #[tokio::test]
    async fn test_handshake_success_leaves_frames_unread() {
        let (mut client, mut server) = duplex(4096);

        let server_task = tokio::spawn(async move {
            let (head, key) = read_request(&mut server).await;
            assert!(head.starts_with("GET /ws/market HTTP/1.1\r\n"));
            assert!(head.contains("Host: ws-subscriptions-clob.polymarket.com\r\n"));
            assert!(head.contains("Upgrade: websocket\r\n"));
            assert!(head.contains("Sec-WebSocket-Version: 13\r\n"));

            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
                 Connection: Upgrade\r\nSEC-WEBSOCKET-ACCEPT: {}\r\n\r\n",
                compute_accept_key(&key)
            );
            // First frame bytes ride in the same write as the response head
            server.write_all(response.as_bytes()).await.unwrap();
            server.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();
            server
        });

        perform(&mut client, "ws-subscriptions-clob.polymarket.com", 443, "/ws/market")
            .await
            .unwrap();

        let mut rest = [0u8; 4];
        client.read_exact(&mut rest).await.unwrap();
        assert_eq!(rest, [0x81, 0x02, b'h', b'i']);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_non_101() {
        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
            server
        });

        let err = perform(&mut client, "localhost", 8080, "/").await.unwrap_err();
        assert!(matches!(err, HandshakeError::UnexpectedStatus(403)));
        assert_eq!(err.to_string(), "Expected 101, got 403");
    }

    #[tokio::test]
    async fn test_handshake_accept_mismatch() {
        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            let (head, _key) = read_request(&mut server).await;
            assert!(head.contains("Host: localhost:8080\r\n"));
            server
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: bogus\r\n\r\n")
                .await
                .unwrap();
            server
        });

        let err = perform(&mut client, "localhost", 8080, "/").await.unwrap_err();
        assert!(matches!(err, HandshakeError::AcceptMismatch { .. }));
    }

    #[tokio::test]
    async fn test_handshake_missing_accept() {
        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n").await.unwrap();
            server
        });

        let err = perform(&mut client, "localhost", 443, "/").await.unwrap_err();
        assert!(matches!(err, HandshakeError::MissingAccept));
    }

    #[tokio::test]
    async fn test_handshake_eof() {
        let (mut client, server) = duplex(4096);
        drop(server);
        let err = perform(&mut client, "localhost", 443, "/").await.unwrap_err();
        assert!(matches!(err, HandshakeError::Io(_)));
    }
}
