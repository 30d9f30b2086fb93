//! Streaming UTF-8 validation
//!
//! Text messages arrive in fragments whose boundaries may fall inside a
//! multi-byte sequence. The validator carries the incomplete tail of one
//! fragment over to the next instead of rejecting it.

use crate::error::{Error, Result};

/// Incremental UTF-8 validator
#[derive(Debug, Default)]
pub struct Utf8Validator {
    /// Incomplete trailing sequence (at most 3 bytes)
    pending: Vec<u8>,
}

impl Utf8Validator {
    /// Create a fresh validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any carried-over bytes.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Validate the next chunk of a text stream.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encoding` as soon as an invalid sequence is seen.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        let joined;
        let data: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            joined = [self.pending.as_slice(), chunk].concat();
            &joined
        };

        match std::str::from_utf8(data) {
            Ok(_) => {
                self.pending.clear();
                Ok(())
            }
            // error_len() == None: the input ends in the middle of a valid sequence
            Err(e) if e.error_len().is_none() => {
                self.pending = data[e.valid_up_to()..].to_vec();
                Ok(())
            }
            Err(_) => Err(Error::Encoding),
        }
    }

    /// Whether a multi-byte sequence is still open.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Finish the stream; an open sequence at this point is invalid.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encoding` when the stream ended mid-codepoint.
    pub fn finish(&mut self) -> Result<()> {
        if self.is_incomplete() {
            self.pending.clear();
            return Err(Error::Encoding);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_codepoint_split_across_chunks() {
        // "€" = E2 82 AC
        let mut v = Utf8Validator::new();
        v.feed(b"price: \xE2").unwrap();
        assert!(v.is_incomplete());
        v.feed(b"\x82").unwrap();
        v.feed(b"\xAC!").unwrap();
        assert!(!v.is_incomplete());
        v.finish().unwrap();
    }

    #[test]
    fn test_rejects_invalid_byte() {
        let mut v = Utf8Validator::new();
        assert!(matches!(v.feed(b"ok\xFFno"), Err(Error::Encoding)));
    }

    #[test]
    fn test_rejects_bad_continuation_in_next_chunk() {
        let mut v = Utf8Validator::new();
        v.feed(b"\xE2\x82").unwrap();
        assert!(matches!(v.feed(b"A"), Err(Error::Encoding)));
    }

    #[test]
    fn test_finish_rejects_truncated_sequence() {
        let mut v = Utf8Validator::new();
        v.feed(b"\xF0\x9F\x98").unwrap();
        assert!(matches!(v.finish(), Err(Error::Encoding)));
    }
}
