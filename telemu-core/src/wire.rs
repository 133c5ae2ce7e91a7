//! Framing: length-prefix (4 bytes BE) + JSON payload.

use crate::protocol::Message;

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 1024 * 1024; // 1 MiB

/// Encode a message into a single frame: 4 bytes BE length + JSON payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = serde_json::to_vec(msg)?;
    let len = u32::try_from(payload.len()).map_err(|_| FrameEncodeError::TooLarge)?;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a message into a frame (serialization or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Returns the message and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMore` if the frame is incomplete (try again after more data).
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    let len = match peek_len(bytes) {
        Some(len) => len,
        None => return Err(FrameDecodeError::NeedMore),
    };
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge(len));
    }
    let total = LEN_SIZE + len as usize;
    if bytes.len() < total {
        return Err(FrameDecodeError::NeedMore);
    }
    match serde_json::from_slice(&bytes[LEN_SIZE..total]) {
        Ok(msg) => Ok((msg, total)),
        Err(source) => Err(FrameDecodeError::Malformed {
            consumed: total,
            source,
        }),
    }
}

fn peek_len(bytes: &[u8]) -> Option<u32> {
    let prefix: [u8; LEN_SIZE] = bytes.get(..LEN_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// Error decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    /// Declared length is over `MAX_FRAME_LEN`. The stream cannot be resynchronized.
    #[error("frame too large: {0} bytes declared")]
    TooLarge(u32),
    /// Frame boundary is intact but the payload is not a message; skip `consumed` bytes.
    #[error("malformed payload ({consumed} byte frame): {source}")]
    Malformed {
        consumed: usize,
        source: serde_json::Error,
    },
}

/// Outcome of pulling one complete frame from an [`InboundBuffer`].
#[derive(Debug, PartialEq)]
pub enum DecodedFrame {
    Message(Message),
    /// Payload could not be parsed; the frame was dropped.
    Malformed,
}

/// Bytes read from the connection that have not formed a complete frame yet.
///
/// Append-only between decode passes; shrinks only by whole frames.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    bytes: Vec<u8>,
}

impl InboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Take the next complete frame off the front of the buffer.
    ///
    /// `Ok(None)` means the buffer holds at most a partial frame and is left untouched.
    /// The only error is [`FrameDecodeError::TooLarge`], after which the connection must be dropped.
    pub fn next_frame(&mut self) -> Result<Option<DecodedFrame>, FrameDecodeError> {
        match decode_frame(&self.bytes) {
            Ok((msg, consumed)) => {
                self.bytes.drain(..consumed);
                Ok(Some(DecodedFrame::Message(msg)))
            }
            Err(FrameDecodeError::NeedMore) => Ok(None),
            Err(FrameDecodeError::Malformed { consumed, source }) => {
                tracing::debug!(bytes = consumed, error = %source, "discarding malformed frame");
                self.bytes.drain(..consumed);
                Ok(Some(DecodedFrame::Malformed))
            }
            Err(e) => Err(e),
        }
    }
}
