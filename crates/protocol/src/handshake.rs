//! Opening handshake (RFC 6455 §4.2).
//!
//! Validates the client's HTTP/1.1 Upgrade request and builds the
//! `101 Switching Protocols` response carrying the derived accept key.

use base64::{Engine, engine::general_purpose::STANDARD};
use httparse::Status;
use sha1::{Digest, Sha1};

use crate::constants::{MAX_HANDSHAKE_SIZE, WS_GUID};

const MAX_HEADERS: usize = 64;

/// Length of a decoded `Sec-WebSocket-Key` nonce.
const KEY_NONCE_LEN: usize = 16;

/// A validated opening request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target, e.g. `/` or `/chat`.
    pub path: String,
    /// Trimmed `Sec-WebSocket-Key` value.
    pub key: String,
    /// Bytes taken by the request head (request line + headers + blank line).
    /// Anything after this offset already belongs to the frame stream.
    pub head_len: usize,
}

impl HandshakeRequest {
    /// Builds the `101 Switching Protocols` response for this request.
    pub fn response(&self) -> Vec<u8> {
        switching_protocols(&accept_key(&self.key))
    }
}

/// Errors from the opening handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("malformed HTTP request: {0}")]
    MalformedRequest(#[from] httparse::Error),

    #[error("request head incomplete")]
    Incomplete,

    #[error("request head exceeds {MAX_HANDSHAKE_SIZE} bytes")]
    RequestTooLarge,

    #[error("method not allowed: expected GET")]
    MethodNotAllowed,

    #[error("unsupported HTTP version: expected HTTP/1.1")]
    UnsupportedHttpVersion,

    #[error("missing `Upgrade: websocket` or `Connection: Upgrade` header")]
    MissingUpgrade,

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("malformed Sec-WebSocket-Key: expected base64 of 16 bytes")]
    MalformedKey,

    #[error("unsupported Sec-WebSocket-Version: expected 13")]
    UnsupportedVersion,
}

/// Computes `base64(SHA-1(key + GUID))`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Parses and validates an opening request.
///
/// Returns `Ok(None)` while the request head is still incomplete, so the
/// caller can keep reading.
pub fn parse_request(raw: &[u8]) -> Result<Option<HandshakeRequest>, HandshakeError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(raw)? {
        Status::Complete(len) => len,
        Status::Partial if raw.len() > MAX_HANDSHAKE_SIZE => {
            return Err(HandshakeError::RequestTooLarge);
        }
        Status::Partial => return Ok(None),
    };
    if head_len > MAX_HANDSHAKE_SIZE {
        return Err(HandshakeError::RequestTooLarge);
    }

    if !req.method.is_some_and(|m| m.eq_ignore_ascii_case("GET")) {
        return Err(HandshakeError::MethodNotAllowed);
    }
    if req.version != Some(1) {
        return Err(HandshakeError::UnsupportedHttpVersion);
    }

    let header = |name: &str| {
        req.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| std::str::from_utf8(h.value).ok())
            .map(str::trim)
    };

    let upgrade = header("upgrade").is_some_and(|v| has_token(v, "websocket"));
    let connection = header("connection").is_some_and(|v| has_token(v, "upgrade"));
    if !upgrade || !connection {
        return Err(HandshakeError::MissingUpgrade);
    }

    if let Some(version) = header("sec-websocket-version") {
        if version != "13" {
            return Err(HandshakeError::UnsupportedVersion);
        }
    }

    let key = header("sec-websocket-key").ok_or(HandshakeError::MissingKey)?;
    match STANDARD.decode(key) {
        Ok(nonce) if nonce.len() == KEY_NONCE_LEN => {}
        _ => return Err(HandshakeError::MalformedKey),
    }

    Ok(Some(HandshakeRequest {
        path: req.path.unwrap_or("/").to_string(),
        key: key.to_string(),
        head_len,
    }))
}

/// Validates a complete opening request and returns the response bytes.
pub fn perform_handshake(raw: &[u8]) -> Result<Vec<u8>, HandshakeError> {
    parse_request(raw)?
        .map(|req| req.response())
        .ok_or(HandshakeError::Incomplete)
}

/// The `101 Switching Protocols` response for an accept key.
pub fn switching_protocols(accept: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
    .into_bytes()
}

/// The response written before dropping a socket whose handshake failed.
pub fn rejection_response() -> &'static [u8] {
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
}

/// Checks a comma-separated header value for a token, ignoring case.
fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}
