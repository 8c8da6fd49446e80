//! # backhaul-wire: reverse protocol framing
//!
//! The broker and the agent exchange length-prefixed frames over a single
//! TLS stream. The agent dials out, but after the handshake it is the
//! *server*: the broker sends command frames and the agent answers each one
//! with exactly one response frame carrying the same frame id.
//!
//! ```text
//! 0        2         3        4            8             12
//! ┌────────┬─────────┬────────┬────────────┬─────────────┬──────────────┐
//! │ magic  │ version │ kind   │ frame id   │ payload len │ payload ...  │
//! │ "BH"   │ 0x01    │ 1 / 2  │ u32 BE     │ u32 BE      │              │
//! └────────┴─────────┴────────┴────────────┴─────────────┴──────────────┘
//! ```
//!
//! This crate has no I/O of its own. [`FrameCodec`] turns a byte buffer into
//! frames; [`Command`] and [`Response`] give the payloads their meaning.
//!
//! ## Usage
//!
//! ```
//! use backhaul_wire::{Command, Decoded, FrameCodec, Verb};
//! use bytes::BytesMut;
//!
//! let command = Command::new(7, Verb::Request, "cpu");
//! let mut buf = BytesMut::new();
//! command.to_frame().unwrap().encode(&mut buf);
//!
//! let mut codec = FrameCodec::default();
//! match codec.decode(&mut buf).unwrap() {
//!     Some(Decoded::Frame(frame)) => {
//!         let decoded = Command::from_frame(&frame).unwrap();
//!         assert_eq!(decoded.path, "cpu");
//!     }
//!     other => panic!("unexpected decode result: {other:?}"),
//! }
//! ```

mod error;
mod frame;
mod message;


pub use error::{WireError, WireResult};
pub use frame::{
    DEFAULT_MAX_PAYLOAD, Decoded, FRAME_HEADER_SIZE, FRAME_MAGIC, Frame, FrameCodec, FrameKind,
    PROTOCOL_VERSION,
};
pub use message::{Command, Response, Status, Verb};
