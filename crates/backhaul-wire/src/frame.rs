//! Frame envelope and the incremental frame decoder.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};

/// Magic bytes at the start of every frame ("BH").
pub const FRAME_MAGIC: u16 = 0x4248;

/// Protocol version carried in every frame header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 12;

/// Default ceiling for a single inbound payload (64 KiB).
///
/// Broker commands are small; anything larger is a misbehaving peer.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// A broker-issued command.
    Command,
    /// The agent's answer to a command.
    Response,
}

impl FrameKind {
    fn to_byte(self) -> u8 {
        match self {
            Self::Command => 1,
            Self::Response => 2,
        }
    }

    fn from_byte(byte: u8) -> WireResult<Self> {
        match byte {
            1 => Ok(Self::Command),
            2 => Ok(Self::Response),
            other => Err(WireError::UnknownFrameKind(other)),
        }
    }

    /// Returns a short name for logging and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Response => "response",
        }
    }
}

/// One complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    id: u32,
    payload: Bytes,
}

impl Frame {
    /// Creates a frame, checking that the payload fits the length field.
    pub fn new(kind: FrameKind, id: u32, payload: impl Into<Bytes>) -> WireResult<Self> {
        let payload = payload.into();
        if u32::try_from(payload.len()).is_err() {
            return Err(WireError::PayloadTooLarge { len: payload.len() });
        }
        Ok(Self { kind, id, payload })
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Total number of bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u16(FRAME_MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.kind.to_byte());
        buf.put_u32(self.id);
        // Frame::new guarantees the length fits.
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Encodes the frame into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Outcome of a successful decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame within the payload ceiling.
    Frame(Frame),
    /// A well-formed header whose payload exceeds the ceiling.
    ///
    /// The codec skips the payload as it arrives; the caller only has to
    /// answer the frame id.
    Oversized { id: u32, kind: FrameKind, len: u32 },
}

/// Incremental decoder that pulls frames out of a read buffer.
///
/// `decode` never hands out a partial frame: until a whole frame has been
/// buffered it returns `Ok(None)`. Memory use is bounded by the header size
/// plus `max_payload`, because oversized payloads are discarded instead of
/// buffered.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload: usize,
    /// Bytes of an oversized payload still to be thrown away.
    discarding: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl FrameCodec {
    /// Creates a codec that accepts payloads up to `max_payload` bytes.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            discarding: 0,
        }
    }

    /// Returns true while the codec is skipping an oversized payload.
    pub fn is_discarding(&self) -> bool {
        self.discarding > 0
    }

    /// Attempts to decode the next frame from `buf`.
    ///
    /// Consumed bytes are removed from `buf`. Returns `Ok(None)` when more
    /// data is needed, and an error only when the stream is desynchronized.
    pub fn decode(&mut self, buf: &mut BytesMut) -> WireResult<Option<Decoded>> {
        if self.discarding > 0 {
            let skip = self.discarding.min(buf.len());
            buf.advance(skip);
            self.discarding -= skip;
            if self.discarding > 0 {
                return Ok(None);
            }
        }

        // Reject a bad magic as soon as it is visible.
        if buf.len() >= 2 {
            let magic = u16::from_be_bytes([buf[0], buf[1]]);
            if magic != FRAME_MAGIC {
                return Err(WireError::InvalidMagic(magic));
            }
        }

        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let version = buf[2];
        if version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let kind = FrameKind::from_byte(buf[3])?;
        let id = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let payload_len = len as usize;

        if payload_len > self.max_payload {
            buf.advance(FRAME_HEADER_SIZE);
            let skip = payload_len.min(buf.len());
            buf.advance(skip);
            self.discarding = payload_len - skip;
            return Ok(Some(Decoded::Oversized { id, kind, len }));
        }

        let total = FRAME_HEADER_SIZE + payload_len;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();
        Ok(Some(Decoded::Frame(Frame { kind, id, payload })))
    }
}
