//! Wire codec for the Discord IPC channel.
//!
//! Every frame on the pipe is:
//!
//! ```text
//! [u32 LE opcode] [u32 LE length] [payload: length bytes]
//! ```
//!
//! Opcodes:
//! - `0` `Handshake` — JSON `{"v":1,"client_id":"..."}`, first frame after connect
//! - `1` `Frame`     — JSON command/event envelope
//! - `2` `Close`     — JSON `{code, message}` from Discord; carries the
//!                     handshake body when we send the farewell
//! - `3` `Ping`      — payload echoed back unchanged under `Pong`
//! - `4` `Pong`
//!
//! The payload of a single frame never exceeds 16 KiB. An unknown opcode or an
//! oversized length means the byte stream has desynchronized and the
//! connection must be torn down; a payload that fails JSON parsing later is
//! merely dropped.

use thiserror::Error;

/// Maximum frame payload size in bytes (excluding the 8-byte header).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024;

/// Size of the fixed frame header: two little-endian u32s.
pub const HEADER_SIZE: usize = 8;

/// Frame kind tag, the first u32 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// Connection handshake, sent exactly once per connection.
    Handshake = 0,
    /// Command/event envelope.
    Frame = 1,
    /// Connection close notice (inbound) or farewell (outbound).
    Close = 2,
    /// Keepalive probe; must be answered with `Pong`.
    Ping = 3,
    /// Keepalive answer.
    Pong = 4,
}

impl Opcode {
    /// Try to convert from the raw wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Handshake),
            1 => Some(Self::Frame),
            2 => Some(Self::Close),
            3 => Some(Self::Ping),
            4 => Some(Self::Pong),
            _ => None,
        }
    }
}

/// Codec-level failures. All of them poison the byte stream.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The opcode field held a value outside 0..=4.
    #[error("unknown opcode {0} (stream desynchronized)")]
    UnknownOpcode(u32),

    /// The length field exceeded [`MAX_FRAME_SIZE`].
    #[error("frame payload of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    Oversized(u32),
}

/// One complete frame: opcode plus raw payload bytes.
///
/// Payload interpretation (JSON parsing, echoing) belongs to the connection
/// engine; the codec only moves bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub opcode: Opcode,
    /// Raw payload bytes; UTF-8 JSON for Handshake/Frame/Close.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame from an opcode and payload bytes.
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    /// Build a frame whose payload is the JSON serialization of `body`.
    pub fn json<T: serde::Serialize>(opcode: Opcode, body: &T) -> serde_json::Result<Self> {
        Ok(Self {
            opcode,
            payload: serde_json::to_vec(body)?,
        })
    }

    /// Encode into wire bytes: `[u32 LE opcode][u32 LE length][payload]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&(self.opcode as u32).to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete frames.
/// Incomplete data is retained for the next call, so the reader can hand over
/// whatever a short socket read produced.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes into the decoder and extract all complete frames.
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown opcode or an oversized length field.
    /// Both mean the stream can no longer be trusted; the caller must drop
    /// the connection.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            if self.buf.len() < HEADER_SIZE {
                break;
            }

            let raw_opcode =
                u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            let length = u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);

            let opcode = Opcode::from_u32(raw_opcode)
                .ok_or(FrameError::UnknownOpcode(raw_opcode))?;
            if length > MAX_FRAME_SIZE {
                return Err(FrameError::Oversized(length));
            }

            let total = HEADER_SIZE + length as usize;
            if self.buf.len() < total {
                break; // incomplete frame, wait for more data
            }

            let payload = self.buf[HEADER_SIZE..total].to_vec();
            frames.push(Frame { opcode, payload });
            self.buf.drain(..total);
        }

        Ok(frames)
    }

    /// True if the decoder holds a partial frame.
    ///
    /// EOF while this is true means the peer died mid-frame.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Discard any buffered partial data (used between connections).
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────
