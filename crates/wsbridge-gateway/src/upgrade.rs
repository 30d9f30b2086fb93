//! Reading the HTTP upgrade request off a raw stream

use bytes::BytesMut;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

use wsbridge_protocol::UpgradeRequest;

use crate::error::{Error, Result};

/// Largest request head accepted.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

const MAX_HEADERS: usize = 64;

/// Read and parse the request head.
///
/// Returns the request and any bytes read past the end of the head, which
/// belong to the first WebSocket frames.
///
/// # Errors
///
/// `MalformedRequest` for unparseable or oversized heads, `Io` when the
/// stream fails or ends before the head is complete.
pub async fn read_upgrade_request<S>(stream: &mut S) -> Result<(UpgradeRequest, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before the request head was complete",
            )));
        }
        if let Some((request, head_len)) = parse_head(&buf)? {
            let leftover = buf.split_off(head_len);
            return Ok((request, leftover));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(Error::MalformedRequest("request head too large".into()));
        }
    }
}

fn parse_head(buf: &[u8]) -> Result<Option<(UpgradeRequest, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(Error::MalformedRequest(e.to_string())),
    };

    let method = req
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or_else(|| Error::MalformedRequest("invalid method".into()))?;
    let version = match req.version {
        Some(1) => Version::HTTP_11,
        _ => Version::HTTP_10,
    };
    let target = req.path.unwrap_or("/");
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    };

    let mut map = HeaderMap::with_capacity(req.headers.len());
    for header in req.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| Error::MalformedRequest(e.to_string()))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| Error::MalformedRequest(e.to_string()))?;
        map.append(name, value);
    }

    Ok(Some((
        UpgradeRequest {
            method,
            version,
            path,
            query,
            headers: map,
        },
        head_len,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAD: &[u8] = b"GET /ws/chat?subscribe-broadcast&echo HTTP/1.1\r\n\
Host: localhost\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\
\r\n";

    #[tokio::test]
    async fn test_reads_head_split_across_reads() {
        let (first, second) = HEAD.split_at(20);
        let mut mock = tokio_test::io::Builder::new()
            .read(first)
            .read(second)
            .build();
        let (req, leftover) = read_upgrade_request(&mut mock).await.unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.version, Version::HTTP_11);
        assert_eq!(req.path, "/ws/chat");
        assert_eq!(req.query.as_deref(), Some("subscribe-broadcast&echo"));
        assert_eq!(req.header("upgrade"), Some("websocket"));
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn test_keeps_bytes_after_head() {
        let mut data = HEAD.to_vec();
        data.extend_from_slice(b"\x81\x00");
        let mut mock = tokio_test::io::Builder::new().read(&data).build();
        let (_, leftover) = read_upgrade_request(&mut mock).await.unwrap();
        assert_eq!(&leftover[..], b"\x81\x00");
    }

    #[tokio::test]
    async fn test_eof_before_head_complete() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"GET /ws/chat HTTP/1.1\r\n")
            .build();
        assert!(matches!(
            read_upgrade_request(&mut mock).await,
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let mut mock = tokio_test::io::Builder::new()
            .read(b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03\r\n\r\n")
            .build();
        assert!(matches!(
            read_upgrade_request(&mut mock).await,
            Err(Error::MalformedRequest(_))
        ));
    }
}
