//! Frame codec
//!
//! Decodes client frames and encodes server frames. Server frames are never
//! masked; lengths always use the shortest of the 7/16/64-bit encodings.

use crate::close::CloseFrame;
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LENGTH_BITS: u8 = 0x7F;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// 0x0
    Continuation,
    /// 0x1
    Text,
    /// 0x2
    Binary,
    /// 0x8
    Close,
    /// 0x9
    Ping,
    /// 0xA
    Pong,
}

impl OpCode {
    /// Control frames (close/ping/pong) have opcodes >= 0x8.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Wire value.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Error::protocol(format!("unexpected opcode {:#x}", other))),
        }
    }
}

/// A single (unmasked) WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of a message
    pub fin: bool,
    /// Opcode
    pub opcode: OpCode,
    /// Payload, already unmasked
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame.
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Single-frame text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(true, OpCode::Text, Bytes::from(text.into()))
    }

    /// Single-frame binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    /// Ping with payload.
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Pong echoing a ping payload.
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Close frame.
    #[must_use]
    pub fn close(close: &CloseFrame) -> Self {
        Self::new(true, OpCode::Close, close.encode())
    }
}

/// XOR `payload` with the 4-byte `key`, cycling over the key.
///
/// Applying it twice with the same key restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

fn check_control(frame: &Frame) -> Result<()> {
    if frame.opcode.is_control() {
        if !frame.fin {
            return Err(Error::protocol("fragmented control frame"));
        }
        if frame.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::FrameTooLarge(format!(
                "control frame payload of {} bytes",
                frame.payload.len()
            )));
        }
    }
    Ok(())
}

fn put_header(dst: &mut BytesMut, frame: &Frame, mask: Option<[u8; 4]>) {
    let len = frame.payload.len();
    let first = frame.opcode.as_u8() | if frame.fin { FIN_BIT } else { 0 };
    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };

    dst.reserve(14 + len);
    dst.put_u8(first);
    if len < 126 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }
    if let Some(key) = mask {
        dst.put_slice(&key);
    }
}

/// Encode a frame the way a client would, masked with `key`.
///
/// The server never sends masked frames; this exists for clients and tests.
///
/// # Errors
///
/// Fails for oversized or fragmented control frames.
pub fn encode_masked(frame: &Frame, key: [u8; 4], dst: &mut BytesMut) -> Result<()> {
    check_control(frame)?;
    put_header(dst, frame, Some(key));
    let start = dst.len();
    dst.put_slice(&frame.payload);
    apply_mask(&mut dst[start..], key);
    Ok(())
}

/// `tokio_util` codec for WebSocket frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload: usize,
}

impl FrameCodec {
    /// Create a codec refusing frames whose payload exceeds `max_payload`.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(1_048_576)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let first = src[0];
        let second = src[1];

        if first & RSV_BITS != 0 {
            return Err(Error::protocol("reserved bits set without a negotiated extension"));
        }

        let fin = first & FIN_BIT != 0;
        let opcode = OpCode::try_from(first & OPCODE_BITS)?;
        let masked = second & MASK_BIT != 0;
        let short_len = second & LENGTH_BITS;

        if opcode.is_control() {
            if !fin {
                return Err(Error::protocol("fragmented control frame"));
            }
            if usize::from(short_len) > MAX_CONTROL_PAYLOAD {
                return Err(Error::FrameTooLarge(format!(
                    "control frame length field {}",
                    short_len
                )));
            }
        }

        let (len, mut offset) = match short_len {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([src[2], src[3]])), 4)
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&src[2..10]);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(Error::protocol("64-bit length with most significant bit set"));
                }
                (len, 10)
            }
            n => (u64::from(n), 2),
        };

        if len > self.max_payload as u64 {
            return Err(Error::MessageTooLarge {
                size: len,
                limit: self.max_payload,
            });
        }
        // Bounded by max_payload above
        let len = len as usize;

        let mask = if masked {
            if src.len() < offset + 4 {
                return Ok(None);
            }
            let key = [src[offset], src[offset + 1], src[offset + 2], src[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        if src.len() < offset + len {
            src.reserve(offset + len - src.len());
            return Ok(None);
        }

        src.advance(offset);
        let mut payload = src.split_to(len);
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload: payload.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        check_control(&frame)?;
        put_header(dst, &frame, None);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}
