//! Codec for encoding and decoding Tandem frames.
//!
//! Two encodings are supported on the same endpoint:
//!
//! - **Text**: one JSON object per WebSocket text message.
//! - **Binary**: MessagePack with length-prefixed framing, one or more frames
//!   per WebSocket binary message. A binary message is self-contained: a
//!   frame never continues into the next message.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Upper bound on any encoded frame (1 MiB). Servers usually enforce a
/// tighter per-message limit through [`decode_message`].
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire encoding of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON text.
    #[default]
    Text,
    /// Length-prefixed MessagePack.
    Binary,
}

/// A frame encoded for one of the two encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Text(String),
    Binary(Bytes),
}

impl ProtocolError {
    fn too_large(size: usize, max: usize) -> Self {
        ProtocolError::FrameTooLarge { size, max }
    }
}

impl Encoded {
    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(text) => text.len(),
            Encoded::Binary(data) => data.len(),
        }
    }

    /// Whether the encoded form is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a frame with the given encoding.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_as(frame: &Frame, encoding: Encoding) -> Result<Encoded, ProtocolError> {
    match encoding {
        Encoding::Text => encode_text(frame).map(Encoded::Text),
        Encoding::Binary => encode(frame).map(Encoded::Binary),
    }
}

/// Encode a frame as a JSON string.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_text(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::too_large(text.len(), MAX_FRAME_SIZE));
    }
    Ok(text)
}

/// Decode a frame from a JSON string.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a frame.
pub fn decode_text(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::too_large(text.len(), MAX_FRAME_SIZE));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a frame to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::too_large(payload.len(), MAX_FRAME_SIZE));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let Some(length) = peek_length(data) else {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    };

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::too_large(length, MAX_FRAME_SIZE));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Decode every frame carried by one binary message.
///
/// Frames are read back to back until the message is exhausted. A frame
/// whose body is not a valid frame is reported and skipped. A length prefix
/// above `max_size`, or one promising more bytes than the message holds,
/// ends decoding: the rest of the message is reported once and discarded.
pub fn decode_message(data: &[u8], max_size: usize) -> Vec<Result<Frame, ProtocolError>> {
    let mut frames = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let Some(length) = peek_length(rest) else {
            frames.push(Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - rest.len())));
            break;
        };

        if length > max_size {
            frames.push(Err(ProtocolError::too_large(length, max_size)));
            break;
        }

        let total_size = LENGTH_PREFIX_SIZE + length;
        if rest.len() < total_size {
            frames.push(Err(ProtocolError::Incomplete(total_size - rest.len())));
            break;
        }

        frames.push(
            rmp_serde::from_slice(&rest[LENGTH_PREFIX_SIZE..total_size]).map_err(ProtocolError::from),
        );
        rest = &rest[total_size..];
    }

    frames
}

fn peek_length(data: &[u8]) -> Option<usize> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = data.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix) as usize)
}
