//! Message codecs carried inside socket frames.
//!
//! A channel picks its codec with `tcp_socket.codec`; both codecs carry the
//! message type, the optional request type name and a JSON payload.

use bytes::Bytes;
use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::core::error::{GatewayError, GatewayResult};

/// Encodes requests into frame bodies and decodes response frame bodies
pub trait MessageCodec: Send + Sync {
    fn encode(&self, msgtype: u32, payload: &Value, request_type: Option<&str>) -> GatewayResult<Bytes>;

    fn decode(&self, body: &[u8]) -> GatewayResult<Value>;
}

/// Codec selector used in channel settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Json,
    Protobuf,
}

impl CodecKind {
    pub fn codec(self) -> Arc<dyn MessageCodec> {
        match self {
            CodecKind::Json => Arc::new(JsonMessageCodec),
            CodecKind::Protobuf => Arc::new(ProtobufEnvelopeCodec),
        }
    }
}

/// `{"msgtype": N, "type": "...", "payload": {...}}`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageCodec;

impl MessageCodec for JsonMessageCodec {
    fn encode(&self, msgtype: u32, payload: &Value, request_type: Option<&str>) -> GatewayResult<Bytes> {
        let message = json!({
            "msgtype": msgtype,
            "type": request_type,
            "payload": payload,
        });
        Ok(Bytes::from(serde_json::to_vec(&message)?))
    }

    /// Responses wrapped in an envelope yield their `payload`; anything else is
    /// returned whole
    fn decode(&self, body: &[u8]) -> GatewayResult<Value> {
        let value: Value = serde_json::from_slice(body).map_err(|e| GatewayError::SocketCodec {
            message: format!("invalid JSON response: {}", e),
        })?;
        match value {
            Value::Object(mut map) if map.contains_key("msgtype") && map.contains_key("payload") => {
                Ok(map.remove("payload").unwrap_or(Value::Null))
            }
            other => Ok(other),
        }
    }
}

/// Protobuf envelope whose body holds the JSON payload
#[derive(Clone, PartialEq, Message)]
pub struct ProtoEnvelope {
    #[prost(uint32, tag = "1")]
    pub msgtype: u32,
    #[prost(string, tag = "2")]
    pub request_type: String,
    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufEnvelopeCodec;

impl MessageCodec for ProtobufEnvelopeCodec {
    fn encode(&self, msgtype: u32, payload: &Value, request_type: Option<&str>) -> GatewayResult<Bytes> {
        let envelope = ProtoEnvelope {
            msgtype,
            request_type: request_type.unwrap_or_default().to_string(),
            body: serde_json::to_vec(payload)?,
        };
        Ok(Bytes::from(envelope.encode_to_vec()))
    }

    fn decode(&self, body: &[u8]) -> GatewayResult<Value> {
        let envelope = ProtoEnvelope::decode(body).map_err(|e| GatewayError::SocketCodec {
            message: format!("invalid protobuf envelope: {}", e),
        })?;
        if envelope.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&envelope.body).map_err(|e| GatewayError::SocketCodec {
            message: format!("invalid envelope body: {}", e),
        })
    }
}
