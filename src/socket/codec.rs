//! Length-prefixed framing for the socket proxy.
//!
//! Wire format: `[u32 big-endian length][body]`, one message per exchange.
//! The decoder buffers partial deliveries and only yields once the whole body
//! has arrived, so a length header split across reads is handled the same way
//! as a body split across reads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::error::GatewayError;

/// Size of the length header in bytes
pub const HEADER_LEN: usize = 4;

/// Default upper bound for a single frame body
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Frame reassembler for 4-byte big-endian length-prefixed messages
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;

        if len > self.max_frame {
            return Err(GatewayError::SocketCodec {
                message: format!("frame too large: {} > {}", len, self.max_frame),
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = GatewayError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame {
            return Err(GatewayError::SocketCodec {
                message: format!("frame too large: {} > {}", item.len(), self.max_frame),
            });
        }
        dst.reserve(HEADER_LEN + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
