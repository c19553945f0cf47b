//! Length-header framing.
//!
//! Every message travels as a 4-byte big-endian length followed by exactly
//! that many payload bytes:
//!
//! ```text
//! ┌────────────────┬──────────────────────┐
//! │ Length         │ Payload              │
//! │ 4 bytes u32 BE │ `Length` bytes       │
//! └────────────────┴──────────────────────┘
//! ```
//!
//! There is no magic number, version byte or checksum. Encoding is a pure
//! function; decoding works incrementally against a per-connection
//! [`BytesMut`] that the transport keeps appending to.

use std::iter::FusedIterator;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the length header in bytes.
pub const HEADER_LEN: usize = 4;

/// Default cap on a single payload (64 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The caller asked to encode a message the peer would refuse.
    #[error("message of {len} bytes exceeds the {max} byte frame limit")]
    FrameTooLarge { len: usize, max: u32 },

    /// A peer declared a payload longer than we accept. Fatal for that connection.
    #[error("peer declared a {len} byte frame, limit is {max}")]
    OversizedFrame { len: u32, max: u32 },
}

/// Encoder/decoder for the length-header wire format.
///
/// The codec itself carries no buffer; the bytes that have not yet formed a
/// complete frame live in the caller's buffer between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthHeaderCodec {
    max_frame_len: u32,
}

impl LengthHeaderCodec {
    pub fn new(max_frame_len: u32) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> u32 {
        self.max_frame_len
    }

    /// Prefix `message` with its length.
    ///
    /// # Errors
    ///
    /// [`FrameError::FrameTooLarge`] when the message does not fit in 32 bits
    /// or exceeds the configured maximum.
    pub fn encode(&self, message: &[u8]) -> Result<Bytes, FrameError> {
        let len = u32::try_from(message.len())
            .ok()
            .filter(|len| *len <= self.max_frame_len)
            .ok_or(FrameError::FrameTooLarge {
                len: message.len(),
                max: self.max_frame_len,
            })?;

        let mut frame = BytesMut::with_capacity(HEADER_LEN + message.len());
        frame.put_u32(len);
        frame.put_slice(message);
        Ok(frame.freeze())
    }

    /// Pull the next complete message off the front of `buffer`.
    ///
    /// Returns `Ok(None)` while the header or the payload is still incomplete;
    /// in that case nothing is consumed. A complete frame is removed from the
    /// buffer as a whole.
    pub fn decode_next(&self, buffer: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = (&buffer[..HEADER_LEN]).get_u32();
        if len > self.max_frame_len {
            return Err(FrameError::OversizedFrame {
                len,
                max: self.max_frame_len,
            });
        }

        let frame_len = HEADER_LEN + len as usize;
        // The buffer grows only as payload bytes actually arrive; a bare
        // header must not cost a max-size allocation.
        if buffer.len() < frame_len {
            return Ok(None);
        }

        buffer.advance(HEADER_LEN);
        Ok(Some(buffer.split_to(len as usize).freeze()))
    }

    /// Lazily decode every complete message currently sitting in `buffer`.
    ///
    /// The iterator ends when more input is needed, or right after yielding
    /// an error. Leftover partial bytes stay in `buffer` for the next call.
    pub fn decode<'a>(&self, buffer: &'a mut BytesMut) -> Frames<'a> {
        Frames {
            codec: *self,
            buffer,
            failed: false,
        }
    }
}

impl Default for LengthHeaderCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

/// Iterator returned by [`LengthHeaderCodec::decode`].
#[derive(Debug)]
pub struct Frames<'a> {
    codec: LengthHeaderCodec,
    buffer: &'a mut BytesMut,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Bytes, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.codec.decode_next(self.buffer) {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for Frames<'_> {}
