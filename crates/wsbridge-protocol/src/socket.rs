//! Async WebSocket transport
//!
//! Wraps any `AsyncRead + AsyncWrite` stream that has already completed the
//! upgrade handshake. Pings are answered and peer close frames are echoed
//! inside [`WebSocket::receive`]; callers only ever see data messages and the
//! final close.

use crate::close::{CloseCode, CloseFrame};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameCodec, OpCode, MAX_CONTROL_PAYLOAD};
use crate::message::{Message, MessageAssembler, Step};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, trace};

/// Transport limits
#[derive(Debug, Clone, Copy)]
pub struct WebSocketConfig {
    /// Largest reassembled data message accepted from the peer
    pub max_message_len: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_len: 1_048_576,
        }
    }
}

/// Server side of an upgraded WebSocket connection
pub struct WebSocket<S> {
    framed: Framed<S, FrameCodec>,
    assembler: MessageAssembler,
    closed: bool,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an upgraded stream.
    pub fn new(stream: S, config: WebSocketConfig) -> Self {
        Self::from_parts(stream, BytesMut::new(), config)
    }

    /// Wrap an upgraded stream, seeding the decoder with bytes that were read
    /// past the end of the HTTP head.
    pub fn from_parts(stream: S, read_buf: BytesMut, config: WebSocketConfig) -> Self {
        let mut parts =
            FramedParts::new::<Frame>(stream, FrameCodec::new(config.max_message_len));
        parts.read_buf = read_buf;
        Self {
            framed: Framed::from_parts(parts),
            assembler: MessageAssembler::new(config.max_message_len),
            closed: false,
        }
    }

    /// Whether a close frame has been sent or the peer disconnected.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Receive the next complete message.
    ///
    /// Returns `Ok(None)` once the peer has disconnected. A peer close frame
    /// is answered with the same code before `Message::Close` is returned.
    ///
    /// Dropping the future between frames loses no data: partially read
    /// frames stay in the decoder buffer and fragments in the assembler.
    ///
    /// # Errors
    ///
    /// Any framing, UTF-8 or size violation; the caller is expected to close
    /// with [`Error::close_code`].
    pub async fn receive(&mut self) -> Result<Option<Message>> {
        loop {
            if self.closed {
                return Ok(None);
            }
            let frame = match self.framed.next().await {
                Some(frame) => frame?,
                None => {
                    debug!("peer disconnected");
                    self.closed = true;
                    return Ok(None);
                }
            };
            trace!(opcode = ?frame.opcode, fin = frame.fin, len = frame.payload.len(), "frame");

            match self.assembler.push(frame)? {
                Step::Incomplete | Step::Pong(_) => {}
                Step::Ping(payload) => self.framed.send(Frame::pong(payload)).await?,
                Step::Close(close) => {
                    debug!(code = %close.code, reason = %close.reason, "peer sent close");
                    // Best effort; the peer may already be gone.
                    let _ = self.close(close.code, "").await;
                    return Ok(Some(Message::Close(close)));
                }
                Step::Message(message) => return Ok(Some(message)),
            }
        }
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` after a close, or the underlying I/O error.
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.send_frame(Frame::text(text)).await
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` after a close, or the underlying I/O error.
    pub async fn send_binary(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.send_frame(Frame::binary(data)).await
    }

    /// Send a payload as text when it is valid UTF-8, binary otherwise.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` after a close, or the underlying I/O error.
    pub async fn send_payload(&mut self, data: Bytes) -> Result<()> {
        let opcode = if std::str::from_utf8(&data).is_ok() {
            OpCode::Text
        } else {
            OpCode::Binary
        };
        self.send_frame(Frame::new(true, opcode, data)).await
    }

    /// Send a single frame and flush it.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` after a close, or the underlying I/O error.
    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.framed.send(frame).await
    }

    /// Flush any buffered outgoing frames without waiting for input.
    ///
    /// # Errors
    ///
    /// The underlying I/O error when the peer is gone.
    pub async fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        SinkExt::<Frame>::flush(&mut self.framed).await
    }

    /// Send a close frame and shut down the write half.
    ///
    /// Idempotent: only the first call sends anything.
    ///
    /// # Errors
    ///
    /// The underlying I/O error; the socket is marked closed regardless.
    pub async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let frame = CloseFrame::new(code, truncate_reason(reason));
        self.framed.send(Frame::close(&frame)).await?;
        SinkExt::<Frame>::close(&mut self.framed).await
    }

    /// Consume the socket and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.framed.into_inner()
    }
}

fn truncate_reason(reason: &str) -> &str {
    let max = MAX_CONTROL_PAYLOAD - 2;
    if reason.len() <= max {
        return reason;
    }
    let mut end = max;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
