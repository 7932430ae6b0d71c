//! Frame codec: `type (u16 BE) ‖ length (u32 BE) ‖ payload`.
//!
//! [`FrameDecoder`] is an incremental state machine. It accepts bytes in
//! whatever chunks the transport delivers them, including chunks that end
//! inside a header field, and only yields a [`Message`] once its payload is
//! complete.

use crate::error::FramingError;
use crate::protocol::Message;

pub const TYPE_LEN: usize = 2;
pub const LENGTH_LEN: usize = 4;
pub const FRAME_HEADER_LEN: usize = TYPE_LEN + LENGTH_LEN;

/// Largest payload accepted unless configured otherwise (64 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Upper bound on the buffer reserved up front for an announced payload.
const MAX_PREALLOC: usize = 64 * 1024;

/// Encode one message as a complete frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, FramingError> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + message.len());
    encode_frame_into(message, &mut out)?;
    Ok(out)
}

/// Append the frame for `message` to `out`.
pub fn encode_frame_into(message: &Message, out: &mut Vec<u8>) -> Result<(), FramingError> {
    let len = u32::try_from(message.len()).map_err(|_| FramingError::PayloadTooLarge {
        len: message.len() as u64,
        max: u32::MAX as u64,
    })?;
    out.extend_from_slice(&message.id().to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(message.payload());
    Ok(())
}

/// Where the decoder is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    AwaitingType,
    AwaitingLength,
    /// Payload bytes still missing
    AwaitingPayload(u32),
}

#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    header: [u8; LENGTH_LEN],
    header_filled: usize,
    msg_type: u16,
    payload: Vec<u8>,
    max_payload: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_payload(max_payload: u32) -> Self {
        Self {
            state: DecodeState::AwaitingType,
            header: [0; LENGTH_LEN],
            header_filled: 0,
            msg_type: 0,
            payload: Vec::new(),
            max_payload,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// `true` between frames, with no partial header or payload buffered.
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::AwaitingType && self.header_filled == 0
    }

    /// Consume `bytes` and return every message completed by them.
    pub fn decode_step(&mut self, bytes: &[u8]) -> Result<Vec<Message>, FramingError> {
        let mut out = Vec::new();
        self.decode_into(bytes, &mut out)?;
        Ok(out)
    }

    /// Like [`decode_step`](Self::decode_step), appending to `out`.
    ///
    /// On error the decoder is reset and messages completed before the bad
    /// header are still in `out`.
    pub fn decode_into(&mut self, mut bytes: &[u8], out: &mut Vec<Message>) -> Result<(), FramingError> {
        loop {
            match self.state {
                DecodeState::AwaitingType => {
                    let Some(field) = self.fill_header(&mut bytes, TYPE_LEN) else {
                        return Ok(());
                    };
                    self.msg_type = u16::from_be_bytes([field[0], field[1]]);
                    self.state = DecodeState::AwaitingLength;
                }
                DecodeState::AwaitingLength => {
                    let Some(field) = self.fill_header(&mut bytes, LENGTH_LEN) else {
                        return Ok(());
                    };
                    let len = u32::from_be_bytes(field);
                    if len > self.max_payload {
                        let max = self.max_payload;
                        self.reset();
                        return Err(FramingError::PayloadTooLarge {
                            len: len as u64,
                            max: max as u64,
                        });
                    }
                    if len == 0 {
                        out.push(Message::from_raw(self.msg_type, Vec::new()));
                        self.state = DecodeState::AwaitingType;
                    } else {
                        self.payload = Vec::with_capacity((len as usize).min(MAX_PREALLOC));
                        self.state = DecodeState::AwaitingPayload(len);
                    }
                }
                DecodeState::AwaitingPayload(remaining) => {
                    if bytes.is_empty() {
                        return Ok(());
                    }
                    let take = bytes.len().min(remaining as usize);
                    self.payload.extend_from_slice(&bytes[..take]);
                    bytes = &bytes[take..];

                    let remaining = remaining - take as u32;
                    if remaining == 0 {
                        let payload = std::mem::take(&mut self.payload);
                        out.push(Message::from_raw(self.msg_type, payload));
                        self.state = DecodeState::AwaitingType;
                    } else {
                        self.state = DecodeState::AwaitingPayload(remaining);
                    }
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = DecodeState::AwaitingType;
        self.header_filled = 0;
        self.msg_type = 0;
        self.payload = Vec::new();
    }

    /// Accumulate a `width`-byte header field, which may span several
    /// deliveries. Returns the field once complete.
    fn fill_header(&mut self, bytes: &mut &[u8], width: usize) -> Option<[u8; LENGTH_LEN]> {
        let take = (width - self.header_filled).min(bytes.len());
        self.header[self.header_filled..self.header_filled + take].copy_from_slice(&bytes[..take]);
        self.header_filled += take;
        *bytes = &bytes[take..];

        if self.header_filled < width {
            return None;
        }
        self.header_filled = 0;
        Some(self.header)
    }
}
