//! HTTP upgrade handshake
//!
//! Validates the client's upgrade request and builds the `101 Switching
//! Protocols` response. The request is represented with `http` crate types so
//! the same validation applies whether the head was parsed by hand or handed
//! over by a web framework.

use crate::error::HandshakeError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderMap, CONNECTION, COOKIE, UPGRADE};
use http::{Method, StatusCode, Version};
use sha1::{Digest, Sha1};

/// Magic string appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// WebSocket protocol versions accepted from clients.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["13", "8", "7"];

const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";
const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol";
const SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";

/// A parsed HTTP upgrade request
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Request method
    pub method: Method,
    /// HTTP version of the request line
    pub version: Version,
    /// Path without the query string
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    /// Request headers
    pub headers: HeaderMap,
}

impl UpgradeRequest {
    /// Header value as a trimmed string; `None` if absent or not visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    }

    /// Value of a cookie sent with the request.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim_matches('"').to_string())
    }
}

/// Check the request is a websocket upgrade at all.
///
/// # Errors
///
/// `BadRequest` for a non-GET method or an HTTP version other than 1.1,
/// `UpgradeRequired` when no `Upgrade: websocket` header is present.
pub fn assure_protocol_requirements(req: &UpgradeRequest) -> Result<(), HandshakeError> {
    if req.method != Method::GET {
        return Err(HandshakeError::bad_request("HTTP method must be a GET"));
    }
    if req.version != Version::HTTP_11 {
        return Err(HandshakeError::bad_request("HTTP server protocol must be 1.1"));
    }
    let upgrade = req.header(UPGRADE.as_str()).unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::UpgradeRequired);
    }
    Ok(())
}

/// Compute `Sec-WebSocket-Accept` for a client key.
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Validate the upgrade request and compute the handshake response.
///
/// # Errors
///
/// See [`assure_protocol_requirements`]; additionally `UpgradeRequired` for
/// a missing version header, `UnsupportedVersion` for an unknown version and
/// `BadRequest` for a missing key or one that does not decode to 16 bytes.
pub fn negotiate(req: &UpgradeRequest) -> Result<HandshakeResponse, HandshakeError> {
    assure_protocol_requirements(req)?;

    let version = match req.header(SEC_WEBSOCKET_VERSION) {
        None | Some("") => return Err(HandshakeError::UpgradeRequired),
        Some(v) if SUPPORTED_VERSIONS.contains(&v) => v.to_string(),
        Some(v) => return Err(HandshakeError::UnsupportedVersion(v.to_string())),
    };

    let key = match req.header(SEC_WEBSOCKET_KEY) {
        None | Some("") => {
            return Err(HandshakeError::bad_request(
                "Sec-WebSocket-Key header is missing/empty",
            ))
        }
        Some(k) => k,
    };
    match BASE64.decode(key) {
        Ok(raw) if raw.len() == 16 => {}
        _ => return Err(HandshakeError::bad_request(format!("Invalid key: {}", key))),
    }

    let protocol = req
        .header(SEC_WEBSOCKET_PROTOCOL)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    Ok(HandshakeResponse {
        accept: accept_key(key),
        version,
        protocol,
    })
}

/// Successful handshake outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// `Sec-WebSocket-Accept` token
    pub accept: String,
    /// Negotiated version, echoed back
    pub version: String,
    /// Requested subprotocol, echoed back verbatim
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Serialize the `101 Switching Protocols` response head.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        put_header(&mut buf, UPGRADE.as_str(), "websocket");
        put_header(&mut buf, CONNECTION.as_str(), "Upgrade");
        put_header(&mut buf, SEC_WEBSOCKET_ACCEPT, &self.accept);
        put_header(&mut buf, "Sec-WebSocket-Version", &self.version);
        if let Some(protocol) = &self.protocol {
            put_header(&mut buf, "Sec-WebSocket-Protocol", protocol);
        }
        buf.put_slice(b"\r\n");
        buf.freeze()
    }
}

/// Serialize a plain-text error response that closes the connection.
#[must_use]
pub fn error_response(status: StatusCode, body: &str, extra_headers: &[(&str, &str)]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + body.len());
    buf.put_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )
        .as_bytes(),
    );
    put_header(&mut buf, "Content-Type", "text/plain; charset=utf-8");
    put_header(&mut buf, "Content-Length", &body.len().to_string());
    put_header(&mut buf, CONNECTION.as_str(), "close");
    for (name, value) in extra_headers {
        put_header(&mut buf, name, value);
    }
    buf.put_slice(b"\r\n");
    buf.put_slice(body.as_bytes());
    buf.freeze()
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}
