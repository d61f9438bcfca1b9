//! # Socket Proxy
//!
//! Point-to-point bridge to TCP backends speaking length-prefixed frames.
//!
//! - [`codec`]: the frame reassembler (`tokio_util` codec)
//! - [`message`]: JSON and protobuf message envelopes inside a frame
//! - [`client`]: the single-connection request/response client

pub mod client;
pub mod codec;
pub mod message;

pub use client::{SocketClient, SocketTarget, DEFAULT_IDLE_TIMEOUT};
pub use codec::FrameCodec;
pub use message::{CodecKind, JsonMessageCodec, MessageCodec, ProtobufEnvelopeCodec};
