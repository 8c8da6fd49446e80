//! Command and response payloads.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};
use crate::frame::{Frame, FrameKind};

/// Bytes before the path in a command payload: verb (1) + path length (2).
const COMMAND_PREFIX_SIZE: usize = 3;

/// Command vocabulary understood by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Sent once by the broker after the TLS handshake.
    Connect,
    /// Asks for the metrics at a path.
    Request,
    /// Tells the agent to drop processor-local cached state.
    Reset,
    /// Keep-alive.
    Noop,
}

impl Verb {
    fn to_byte(self) -> u8 {
        match self {
            Self::Connect => 1,
            Self::Request => 2,
            Self::Reset => 3,
            Self::Noop => 4,
        }
    }

    fn from_byte(byte: u8) -> WireResult<Self> {
        match byte {
            1 => Ok(Self::Connect),
            2 => Ok(Self::Request),
            3 => Ok(Self::Reset),
            4 => Ok(Self::Noop),
            other => Err(WireError::UnknownVerb(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Request => "REQUEST",
            Self::Reset => "RESET",
            Self::Noop => "NOOP",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded unit of work from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Frame id; echoed in the response.
    pub id: u32,
    pub verb: Verb,
    /// Logical resource the broker is asking about ("" for everything).
    pub path: String,
    /// Inline data accompanying the verb.
    pub payload: Bytes,
}

impl Command {
    /// Creates a command with an empty payload.
    pub fn new(id: u32, verb: Verb, path: impl Into<String>) -> Self {
        Self {
            id,
            verb,
            path: path.into(),
            payload: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Parses a command out of a command frame.
    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        if frame.kind() != FrameKind::Command {
            return Err(WireError::UnexpectedKind {
                expected: FrameKind::Command.as_str(),
                actual: frame.kind().as_str(),
            });
        }

        let data = frame.payload();
        if data.len() < COMMAND_PREFIX_SIZE {
            return Err(WireError::Truncated {
                needed: COMMAND_PREFIX_SIZE,
                available: data.len(),
            });
        }

        let verb = Verb::from_byte(data[0])?;
        let path_len = usize::from(u16::from_be_bytes([data[1], data[2]]));
        let path_end = COMMAND_PREFIX_SIZE + path_len;
        if data.len() < path_end {
            return Err(WireError::Truncated {
                needed: path_end,
                available: data.len(),
            });
        }

        let path = std::str::from_utf8(&data[COMMAND_PREFIX_SIZE..path_end])
            .map_err(|_| WireError::InvalidPath)?
            .to_string();

        Ok(Self {
            id: frame.id(),
            verb,
            path,
            payload: data.slice(path_end..),
        })
    }

    /// Encodes the command as a frame (the broker side of the exchange).
    pub fn to_frame(&self) -> WireResult<Frame> {
        let path_len =
            u16::try_from(self.path.len()).map_err(|_| WireError::PathTooLong(self.path.len()))?;

        let mut buf =
            BytesMut::with_capacity(COMMAND_PREFIX_SIZE + self.path.len() + self.payload.len());
        buf.put_u8(self.verb.to_byte());
        buf.put_u16(path_len);
        buf.put_slice(self.path.as_bytes());
        buf.put_slice(&self.payload);

        Frame::new(FrameKind::Command, self.id, buf.freeze())
    }
}

/// Outcome carried by a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    /// The requested path does not name a resource.
    NotFound,
    /// The command frame could not be parsed.
    ProtocolError,
    /// The command was understood but could not be served.
    Error,
}

impl Status {
    fn to_byte(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::NotFound => 1,
            Self::ProtocolError => 2,
            Self::Error => 3,
        }
    }

    fn from_byte(byte: u8) -> WireResult<Self> {
        match byte {
            0 => Ok(Self::Ok),
            1 => Ok(Self::NotFound),
            2 => Ok(Self::ProtocolError),
            3 => Ok(Self::Error),
            other => Err(WireError::UnknownStatus(other)),
        }
    }
}

/// The agent's answer to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Id of the command frame being answered.
    pub id: u32,
    pub status: Status,
    pub body: Bytes,
}

impl Response {
    /// Successful response with a body.
    pub fn ok(id: u32, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            status: Status::Ok,
            body: body.into(),
        }
    }

    /// Successful response with an empty body.
    pub fn ack(id: u32) -> Self {
        Self::ok(id, Bytes::new())
    }

    pub fn not_found(id: u32, path: &str) -> Self {
        Self {
            id,
            status: Status::NotFound,
            body: Bytes::from(format!("no such resource: {path}")),
        }
    }

    pub fn protocol_error(id: u32, message: impl fmt::Display) -> Self {
        Self {
            id,
            status: Status::ProtocolError,
            body: Bytes::from(message.to_string()),
        }
    }

    pub fn error(id: u32, message: impl fmt::Display) -> Self {
        Self {
            id,
            status: Status::Error,
            body: Bytes::from(message.to_string()),
        }
    }

    /// Returns the body as text, if it is UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn to_frame(&self) -> WireResult<Frame> {
        let mut buf = BytesMut::with_capacity(1 + self.body.len());
        buf.put_u8(self.status.to_byte());
        buf.put_slice(&self.body);
        Frame::new(FrameKind::Response, self.id, buf.freeze())
    }

    /// Parses a response frame (the broker side of the exchange).
    pub fn from_frame(frame: &Frame) -> WireResult<Self> {
        if frame.kind() != FrameKind::Response {
            return Err(WireError::UnexpectedKind {
                expected: FrameKind::Response.as_str(),
                actual: frame.kind().as_str(),
            });
        }

        let data = frame.payload();
        let Some(&status) = data.first() else {
            return Err(WireError::Truncated {
                needed: 1,
                available: 0,
            });
        };

        Ok(Self {
            id: frame.id(),
            status: Status::from_byte(status)?,
            body: data.slice(1..),
        })
    }
}
