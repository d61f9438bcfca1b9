//! # Socket Proxy Client
//!
//! Owns at most one outbound TCP connection. Each [`SocketClient::request`]
//! encodes a message, writes one frame, waits for exactly one non-empty
//! response frame and tears the connection down again.
//!
//! ## Failure modes
//! - connect, read or write errors reject with [`GatewayError::SocketTransport`]
//! - no traffic within the idle timeout tears down the connection and rejects
//!   with [`GatewayError::SocketTimeout`]
//! - the peer closing before a frame arrives rejects with a transport error

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::DataSanitizer;
use crate::socket::codec::FrameCodec;
use crate::socket::message::MessageCodec;

/// Default socket idle timeout
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(50);

/// Host and port of a socket backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketTarget {
    pub host: String,
    pub port: u16,
}

impl SocketTarget {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for SocketTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Single-connection socket client
///
/// `request` takes `&mut self`, so one client can never have two requests in
/// flight on the same connection.
pub struct SocketClient {
    target: SocketTarget,
    idle_timeout: Duration,
    codec: Arc<dyn MessageCodec>,
    sanitizer: Arc<DataSanitizer>,
    connection: Option<Framed<TcpStream, FrameCodec>>,
}

impl SocketClient {
    pub fn new(target: SocketTarget, codec: Arc<dyn MessageCodec>) -> Self {
        Self {
            target,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            codec,
            sanitizer: Arc::new(DataSanitizer::default()),
            connection: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<DataSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn target(&self) -> &SocketTarget {
        &self.target
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Point the client at another backend, dropping any open connection
    pub fn connect_to(&mut self, target: SocketTarget) {
        if self.connection.take().is_some() {
            debug!(from = %self.target, to = %target, "Dropping socket connection to switch target");
        }
        self.target = target;
    }

    /// Close the current connection, if any
    pub fn destroy(&mut self) {
        if self.connection.take().is_some() {
            info!(target_addr = %self.target, "Socket is closed");
        }
    }

    /// Send one message and wait for its response
    pub async fn request(
        &mut self,
        msgtype: u32,
        payload: &Value,
        request_type: Option<&str>,
    ) -> GatewayResult<Value> {
        let body = self.codec.encode(msgtype, payload, request_type)?;
        info!(
            target_addr = %self.target,
            msgtype,
            payload = %self.sanitizer.sanitize_value(payload),
            "Socket request"
        );

        let result = self.exchange(body).await;
        // One response per exchange; the connection never outlives it.
        self.destroy();

        let frame = result?;
        let value = self.codec.decode(&frame)?;
        info!(
            target_addr = %self.target,
            msgtype,
            response = %self.sanitizer.sanitize_value(&value),
            "Socket response"
        );
        Ok(value)
    }

    async fn exchange(&mut self, body: bytes::Bytes) -> GatewayResult<bytes::Bytes> {
        let idle = self.idle_timeout;
        let target = self.target.clone();
        let connection = self.ensure_connected().await?;

        match timeout(idle, connection.send(body)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(transport_error(&target, e)),
            Err(_) => return Err(timeout_error(&target, idle)),
        }

        loop {
            match timeout(idle, connection.next()).await {
                Ok(Some(Ok(frame))) if frame.is_empty() => continue,
                Ok(Some(Ok(frame))) => return Ok(frame),
                Ok(Some(Err(e))) => return Err(transport_error(&target, e)),
                Ok(None) => {
                    return Err(GatewayError::SocketTransport {
                        target: target.to_string(),
                        cause: "connection closed before a response frame arrived".to_string(),
                    })
                }
                Err(_) => return Err(timeout_error(&target, idle)),
            }
        }
    }

    async fn ensure_connected(&mut self) -> GatewayResult<&mut Framed<TcpStream, FrameCodec>> {
        if self.connection.is_none() {
            let addr = (self.target.host.as_str(), self.target.port);
            let stream = match timeout(self.idle_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(GatewayError::SocketTransport {
                        target: self.target.to_string(),
                        cause: e.to_string(),
                    })
                }
                Err(_) => return Err(timeout_error(&self.target, self.idle_timeout)),
            };
            info!(target_addr = %self.target, "Connected to socket backend");
            self.connection = Some(Framed::new(stream, FrameCodec::new()));
        }

        self.connection
            .as_mut()
            .ok_or_else(|| GatewayError::internal("socket connection missing after connect"))
    }
}

fn transport_error(target: &SocketTarget, error: GatewayError) -> GatewayError {
    match error {
        GatewayError::SocketCodec { .. } => error,
        other => GatewayError::SocketTransport {
            target: target.to_string(),
            cause: other.to_string(),
        },
    }
}

fn timeout_error(target: &SocketTarget, idle: Duration) -> GatewayError {
    warn!(target_addr = %target, timeout_ms = idle.as_millis() as u64, "Socket timeout");
    GatewayError::SocketTimeout {
        timeout_ms: idle.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::message::JsonMessageCodec;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let len = stream.read_u32().await.unwrap() as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_request_round_trip_with_split_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request: Value = serde_json::from_slice(&read_frame(&mut stream).await).unwrap();
            let reply = serde_json::to_vec(&json!({ "echo": request["payload"] })).unwrap();

            // Empty frame first, then the header and body in separate writes
            stream.write_u32(0).await.unwrap();
            let header = (reply.len() as u32).to_be_bytes();
            stream.write_all(&header[..1]).await.unwrap();
            stream.flush().await.unwrap();
            stream.write_all(&header[1..]).await.unwrap();
            stream.write_all(&reply).await.unwrap();
        });

        let mut client = SocketClient::new(SocketTarget::new("127.0.0.1", port), Arc::new(JsonMessageCodec));
        let value = client.request(7, &json!({ "a": 1 }), None).await.unwrap();
        assert_eq!(value, json!({ "echo": { "a": 1 } }));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut client = SocketClient::new(SocketTarget::new("127.0.0.1", port), Arc::new(JsonMessageCodec))
            .with_idle_timeout(Duration::from_millis(100));
        let err = client.request(1, &json!({}), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::SocketTimeout { timeout_ms: 100 }));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_close_before_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await;
        });

        let mut client = SocketClient::new(SocketTarget::new("127.0.0.1", port), Arc::new(JsonMessageCodec));
        let err = client.request(1, &json!({}), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::SocketTransport { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = SocketClient::new(SocketTarget::new("127.0.0.1", port), Arc::new(JsonMessageCodec));
        let err = client.request(1, &json!({}), None).await.unwrap_err();
        assert_eq!(err.code(), crate::core::error::codes::SOCKET_TRANSPORT);
    }
}
