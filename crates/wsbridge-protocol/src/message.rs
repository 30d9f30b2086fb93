//! Message reassembly
//!
//! Turns a sequence of frames into complete messages, enforcing the
//! fragmentation rules and surfacing interleaved control frames.

use crate::close::CloseFrame;
use crate::error::{Error, Result};
use crate::frame::{Frame, OpCode};
use crate::utf8::Utf8Validator;
use bytes::{Bytes, BytesMut};

/// A complete message received from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text message
    Text(String),
    /// Binary message
    Binary(Bytes),
    /// Peer initiated the closing handshake
    Close(CloseFrame),
}

impl Message {
    /// Payload bytes of a data message (empty for close).
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        match self {
            Message::Text(text) => Bytes::from(text),
            Message::Binary(data) => data,
            Message::Close(_) => Bytes::new(),
        }
    }
}

/// Outcome of feeding one frame to the assembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// More fragments are needed
    Incomplete,
    /// A data message is complete
    Message(Message),
    /// Ping received; answer with a pong carrying this payload
    Ping(Bytes),
    /// Pong received
    Pong(Bytes),
    /// Close received
    Close(CloseFrame),
}

/// Fragment reassembly state for one connection
#[derive(Debug)]
pub struct MessageAssembler {
    /// Opcode of the message currently open, if any
    opcode: Option<OpCode>,
    buffer: BytesMut,
    utf8: Utf8Validator,
    max_message_len: usize,
}

impl MessageAssembler {
    /// Create an assembler refusing messages larger than `max_message_len`.
    #[must_use]
    pub fn new(max_message_len: usize) -> Self {
        Self {
            opcode: None,
            buffer: BytesMut::new(),
            utf8: Utf8Validator::new(),
            max_message_len,
        }
    }

    /// Whether a fragmented message is currently open.
    #[must_use]
    pub fn in_message(&self) -> bool {
        self.opcode.is_some()
    }

    /// Feed the next decoded frame.
    ///
    /// # Errors
    ///
    /// `Protocol` on fragmentation violations, `Encoding` on invalid UTF-8
    /// (checked per fragment and again on the whole message),
    /// `MessageTooLarge` when the reassembled size exceeds the limit.
    pub fn push(&mut self, frame: Frame) -> Result<Step> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if let Some(open) = self.opcode {
                    return Err(Error::protocol(format!(
                        "expected continuation of {:?} message, got {:?}",
                        open, frame.opcode
                    )));
                }
                self.buffer.clear();
                self.utf8.reset();
                self.opcode = Some(frame.opcode);
            }
            OpCode::Continuation => {
                if self.opcode.is_none() {
                    return Err(Error::protocol("continuation frame without an open message"));
                }
            }
            OpCode::Ping | OpCode::Pong | OpCode::Close if !frame.fin => {
                return Err(Error::protocol("fragmented control frame"));
            }
            OpCode::Ping => return Ok(Step::Ping(frame.payload)),
            OpCode::Pong => return Ok(Step::Pong(frame.payload)),
            OpCode::Close => return CloseFrame::parse(&frame.payload).map(Step::Close),
        }

        let size = self.buffer.len() + frame.payload.len();
        if size > self.max_message_len {
            self.abort();
            return Err(Error::MessageTooLarge {
                size: size as u64,
                limit: self.max_message_len,
            });
        }

        let is_text = self.opcode == Some(OpCode::Text);
        if is_text {
            if let Err(e) = self.utf8.feed(&frame.payload) {
                self.abort();
                return Err(e);
            }
        }
        self.buffer.extend_from_slice(&frame.payload);

        if !frame.fin {
            return Ok(Step::Incomplete);
        }

        self.opcode = None;
        let data = self.buffer.split().freeze();
        if is_text {
            self.utf8.finish()?;
            let text = String::from_utf8(data.to_vec()).map_err(|_| Error::Encoding)?;
            Ok(Step::Message(Message::Text(text)))
        } else {
            Ok(Step::Message(Message::Binary(data)))
        }
    }

    fn abort(&mut self) {
        self.opcode = None;
        self.buffer.clear();
        self.utf8.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragments(opcode: OpCode, data: &[u8], parts: usize) -> Vec<Frame> {
        let chunk = data.len().div_ceil(parts).max(1);
        let chunks: Vec<&[u8]> = data.chunks(chunk).collect();
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let op = if i == 0 { opcode } else { OpCode::Continuation };
                Frame::new(i == last, op, Bytes::copy_from_slice(c))
            })
            .collect()
    }

    fn assemble(frames: Vec<Frame>) -> Result<Step> {
        let mut asm = MessageAssembler::new(1 << 20);
        let mut last = Step::Incomplete;
        for frame in frames {
            last = asm.push(frame)?;
        }
        Ok(last)
    }

    #[test]
    fn test_single_frame_text() {
        let step = assemble(vec![Frame::text("hello")]).unwrap();
        assert_eq!(step, Step::Message(Message::Text("hello".into())));
    }

    #[test]
    fn test_fragmented_equals_single_frame() {
        let data = "fragmented message with ünïcödé €".as_bytes();
        let whole = assemble(vec![Frame::new(true, OpCode::Text, Bytes::copy_from_slice(data))])
            .unwrap();
        for parts in [2, 3, 7, data.len()] {
            let step = assemble(fragments(OpCode::Text, data, parts)).unwrap();
            assert_eq!(step, whole, "split into {} parts", parts);
        }
    }

    #[test]
    fn test_codepoint_split_across_fragments() {
        let frames = vec![
            Frame::new(false, OpCode::Text, Bytes::from_static(b"\xE2\x82")),
            Frame::new(true, OpCode::Continuation, Bytes::from_static(b"\xAC")),
        ];
        assert_eq!(
            assemble(frames).unwrap(),
            Step::Message(Message::Text("€".into()))
        );
    }

    #[test]
    fn test_invalid_utf8_is_encoding_error() {
        let frames = vec![Frame::new(true, OpCode::Text, Bytes::from_static(b"\xCE\xBA\xFF"))];
        assert!(matches!(assemble(frames), Err(Error::Encoding)));
    }

    #[test]
    fn test_truncated_codepoint_at_fin_is_encoding_error() {
        let frames = vec![Frame::new(true, OpCode::Text, Bytes::from_static(b"ok\xE2\x82"))];
        assert!(matches!(assemble(frames), Err(Error::Encoding)));
    }

    #[test]
    fn test_binary_is_not_utf8_checked() {
        let frames = vec![Frame::binary(Bytes::from_static(b"\xFF\xFE"))];
        assert_eq!(
            assemble(frames).unwrap(),
            Step::Message(Message::Binary(Bytes::from_static(b"\xFF\xFE")))
        );
    }

    #[test]
    fn test_new_data_frame_inside_fragmented_message() {
        let frames = vec![
            Frame::new(false, OpCode::Text, Bytes::from_static(b"a")),
            Frame::new(true, OpCode::Binary, Bytes::from_static(b"b")),
        ];
        assert!(matches!(assemble(frames), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_continuation_without_open_message() {
        let frames = vec![Frame::new(true, OpCode::Continuation, Bytes::from_static(b"x"))];
        assert!(matches!(assemble(frames), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_control_frames_interleave_with_fragments() {
        let mut asm = MessageAssembler::new(1 << 20);
        assert_eq!(
            asm.push(Frame::new(false, OpCode::Binary, Bytes::from_static(b"ab")))
                .unwrap(),
            Step::Incomplete
        );
        assert_eq!(
            asm.push(Frame::ping(Bytes::from_static(b"p"))).unwrap(),
            Step::Ping(Bytes::from_static(b"p"))
        );
        assert!(asm.in_message());
        assert_eq!(
            asm.push(Frame::new(true, OpCode::Continuation, Bytes::from_static(b"cd")))
                .unwrap(),
            Step::Message(Message::Binary(Bytes::from_static(b"abcd")))
        );
        assert!(!asm.in_message());
    }

    #[test]
    fn test_close_frame_is_parsed() {
        let step = assemble(vec![Frame::close(&CloseFrame::new(
            crate::CloseCode::NORMAL,
            "done",
        ))])
        .unwrap();
        match step {
            Step::Close(frame) => {
                assert_eq!(frame.code, crate::CloseCode::NORMAL);
                assert_eq!(frame.reason, "done");
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_message_size_limit() {
        let mut asm = MessageAssembler::new(4);
        asm.push(Frame::new(false, OpCode::Binary, Bytes::from_static(b"abc")))
            .unwrap();
        let err = asm
            .push(Frame::new(true, OpCode::Continuation, Bytes::from_static(b"de")))
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { size: 5, limit: 4 }));
        assert!(!asm.in_message());
    }
}
