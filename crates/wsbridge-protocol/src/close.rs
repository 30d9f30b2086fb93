//! Close codes and close-frame payloads

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// A WebSocket close status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(u16);

impl CloseCode {
    /// 1000: normal closure
    pub const NORMAL: Self = Self(1000);
    /// 1001: endpoint going away
    pub const GOING_AWAY: Self = Self(1001);
    /// 1002: protocol error
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// 1003: unsupported data
    pub const UNSUPPORTED: Self = Self(1003);
    /// 1007: payload not consistent with message type (bad UTF-8)
    pub const INVALID_PAYLOAD: Self = Self(1007);
    /// 1008: policy violation
    pub const POLICY_VIOLATION: Self = Self(1008);
    /// 1009: message too big
    pub const MESSAGE_TOO_BIG: Self = Self(1009);
    /// 1011: unexpected server condition
    pub const INTERNAL_ERROR: Self = Self(1011);

    /// Wrap a raw code without validating it.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Whether a peer may legitimately send this code in a close frame.
    ///
    /// Rejects values below 1000, 1004-1006, 1012-1016, 1100 and 2000-2999.
    #[must_use]
    pub fn is_valid(self) -> bool {
        !matches!(self.0, 0..=999 | 1004..=1006 | 1012..=1016 | 1100 | 2000..=2999)
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.0
    }
}

/// Decoded close-frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Status code (1000 when the peer sent an empty payload)
    pub code: CloseCode,
    /// Optional UTF-8 reason
    pub reason: String,
}

impl CloseFrame {
    /// Build a close frame with a code and reason.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Parse the payload of a received close frame.
    ///
    /// # Errors
    ///
    /// `Protocol` for a 1-byte payload or an invalid code, `Encoding` when the
    /// reason is not valid UTF-8.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Ok(Self::new(CloseCode::NORMAL, ""));
        }
        if payload.len() < 2 {
            return Err(Error::protocol(format!(
                "invalid close frame payload of {} byte",
                payload.len()
            )));
        }

        let code = CloseCode::new(u16::from_be_bytes([payload[0], payload[1]]));
        let reason_bytes = &payload[2..];

        let reason = std::str::from_utf8(reason_bytes)
            .map_err(|_| Error::Encoding)?
            .to_owned();

        if !code.is_valid() {
            return Err(Error::protocol(format!("invalid close code {}", code)));
        }

        Ok(Self { code, reason })
    }

    /// Encode as a close-frame payload (code + reason).
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.reason.len());
        buf.put_u16(self.code.as_u16());
        buf.put_slice(self.reason.as_bytes());
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_validity() {
        assert!(CloseCode::new(1000).is_valid());
        assert!(CloseCode::new(1011).is_valid());
        assert!(CloseCode::new(3000).is_valid());
        assert!(CloseCode::new(4999).is_valid());

        assert!(!CloseCode::new(999).is_valid());
        assert!(!CloseCode::new(1005).is_valid());
        assert!(!CloseCode::new(1015).is_valid());
        assert!(!CloseCode::new(1100).is_valid());
        assert!(!CloseCode::new(2000).is_valid());
        assert!(!CloseCode::new(2999).is_valid());
    }

    #[test]
    fn test_parse_empty_payload_is_normal() {
        let frame = CloseFrame::parse(&[]).unwrap();
        assert_eq!(frame.code, CloseCode::NORMAL);
        assert!(frame.reason.is_empty());
    }

    #[test]
    fn test_parse_code_and_reason() {
        let payload = CloseFrame::new(CloseCode::GOING_AWAY, "bye").encode();
        let frame = CloseFrame::parse(&payload).unwrap();
        assert_eq!(frame.code, CloseCode::GOING_AWAY);
        assert_eq!(frame.reason, "bye");
    }

    #[test]
    fn test_parse_single_byte_is_protocol_error() {
        assert!(matches!(
            CloseFrame::parse(&[0x03]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_rejects_reserved_codes() {
        for code in [1005u16, 2000] {
            let payload = code.to_be_bytes();
            assert!(matches!(
                CloseFrame::parse(&payload),
                Err(Error::Protocol(_))
            ));
        }
    }

    #[test]
    fn test_parse_rejects_invalid_utf8_reason() {
        let payload = [0x03, 0xE8, 0xFF, 0xFE];
        assert!(matches!(CloseFrame::parse(&payload), Err(Error::Encoding)));
    }
}
