//! Binary wire format of telemetry frames.
//!
//! * **Multi-part**: `[kind: u8]` followed by zero or more segments, each a
//!   big-endian `u32` length and that many bytes.
//! * **Single-part**: the whole body is one segment; the kind is
//!   [`MessageKind::ALL`].
//!
//! Subscription filters are byte prefixes of the encoded message, so a
//! one-byte filter on a multi-part channel selects a message kind.

use ffee_types::{FeeError, Frame, MessageKind};

const LEN_BYTES: usize = 4;

pub fn encode_multipart(frame: &Frame) -> Vec<u8> {
    let body: usize = frame.parts.iter().map(|p| LEN_BYTES + p.len()).sum();
    let mut out = Vec::with_capacity(1 + body);
    out.push(frame.kind.0);
    for part in &frame.parts {
        out.extend_from_slice(&(part.len() as u32).to_be_bytes());
        out.extend_from_slice(part);
    }
    out
}

pub fn decode_multipart(bytes: &[u8]) -> Result<Frame, FeeError> {
    let (&kind, mut rest) = bytes
        .split_first()
        .ok_or_else(|| FeeError::Decode("empty multi-part message".into()))?;

    let mut parts = Vec::new();
    while !rest.is_empty() {
        if rest.len() < LEN_BYTES {
            return Err(FeeError::Decode(format!(
                "truncated segment header ({} bytes)",
                rest.len()
            )));
        }
        let (header, tail) = rest.split_at(LEN_BYTES);
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if tail.len() < len {
            return Err(FeeError::Decode(format!(
                "segment declares {len} bytes, {} available",
                tail.len()
            )));
        }
        let (part, tail) = tail.split_at(len);
        parts.push(part.to_vec());
        rest = tail;
    }
    Ok(Frame::new(MessageKind(kind), parts))
}

/// Encode a frame for a single-part channel.
///
/// # Errors
///
/// [`FeeError::InvalidArguments`] unless the frame has exactly one segment.
pub fn encode_single(frame: &Frame) -> Result<Vec<u8>, FeeError> {
    match frame.parts.as_slice() {
        [part] => Ok(part.clone()),
        parts => Err(FeeError::InvalidArguments(format!(
            "single-part message needs exactly one segment, got {}",
            parts.len()
        ))),
    }
}

pub fn decode_single(bytes: &[u8]) -> Frame {
    Frame::new(MessageKind::ALL, vec![bytes.to_vec()])
}

/// Decode according to the channel's framing.
pub fn decode(bytes: &[u8], multipart: bool) -> Result<Frame, FeeError> {
    if multipart {
        decode_multipart(bytes)
    } else {
        Ok(decode_single(bytes))
    }
}

/// Encode according to the channel's framing.
pub fn encode(frame: &Frame, multipart: bool) -> Result<Vec<u8>, FeeError> {
    if multipart {
        Ok(encode_multipart(frame))
    } else {
        encode_single(frame)
    }
}

/// Prefix match; an empty filter accepts everything.
pub fn matches_filter(message: &[u8], filter: &[u8]) -> bool {
    message.starts_with(filter)
}
