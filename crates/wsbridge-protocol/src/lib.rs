//! wsbridge Protocol - WebSocket wire layer
//!
//! This crate implements the server side of RFC 6455:
//! - Frame: header/payload codec, masking, length encoding
//! - Close: close-code validation and close-frame payloads
//! - Utf8: streaming UTF-8 validation across fragments
//! - Message: fragment reassembly and control-frame interleaving
//! - Handshake: HTTP upgrade validation and accept-token computation
//! - Socket: an async WebSocket over any byte stream

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod close;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod socket;
pub mod utf8;

pub use close::{CloseCode, CloseFrame};
pub use error::{Error, HandshakeError, Result};
pub use frame::{apply_mask, encode_masked, Frame, FrameCodec, OpCode};
pub use handshake::{
    accept_key, assure_protocol_requirements, error_response, negotiate, HandshakeResponse,
    UpgradeRequest, SUPPORTED_VERSIONS, WS_GUID,
};
pub use message::{Message, MessageAssembler, Step};
pub use socket::{WebSocket, WebSocketConfig};
pub use utf8::Utf8Validator;
