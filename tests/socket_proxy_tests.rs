//! # Socket Proxy Tests
//!
//! Socket entrances against real `TcpListener` backends speaking
//! length-prefixed frames: JSON and protobuf envelopes, split deliveries,
//! idle timeouts and early connection close.

mod common;

use axum::http::StatusCode;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use prost::Message;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use channel_gateway::dispatch::ServiceRegistry;
use channel_gateway::socket::message::ProtoEnvelope;
use channel_gateway::socket::FrameCodec;
use common::{harness, ChannelFixture};

fn api(port: u16) -> String {
    format!(
        r#"
- name: by-key
  router: [{{ method: POST, path: keyed }}]
  socket_proxy:
    msgtype: 7
    request_type: Query
    server_tag: main

- name: inline
  router: [{{ method: POST, path: inline }}]
  socket_proxy:
    msgtype: 8
    server_tag: {{ host: 127.0.0.1, port: {port} }}
"#
    )
}

fn setting(port: u16, extra: &str) -> String {
    format!(
        "tcp_socket: {{ timeout: 2s{extra} }}\nserver:\n  - {{ key: main, host: 127.0.0.1, port: {port} }}\n"
    )
}

/// Answers every JSON request with `{"echo": payload, "type": type}`
async fn spawn_json_echo() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, FrameCodec::new());
                if let Some(Ok(frame)) = framed.next().await {
                    let request: Value = serde_json::from_slice(&frame).unwrap();
                    let reply = json!({
                        "msgtype": request["msgtype"],
                        "payload": { "echo": request["payload"], "type": request["type"] },
                    });
                    let _ = framed.send(Bytes::from(serde_json::to_vec(&reply).unwrap())).await;
                }
            });
        }
    });
    port
}

#[tokio::test]
async fn test_json_round_trip_by_server_key() {
    let port = spawn_json_echo().await;
    let api = api(port);
    let setting = setting(port, "");
    let h = harness(
        &[ChannelFixture {
            name: "sock",
            api: &api,
            setting: &setting,
        }],
        ServiceRegistry::new(),
    );

    let response = h.server.post("/sock/keyed").json(&json!({ "x": 1 })).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.json::<Value>(),
        json!({ "data": { "echo": { "x": 1 }, "type": "Query" } })
    );

    let response = h.server.post("/sock/inline").json(&json!({ "y": "z" })).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["data"]["echo"], json!({ "y": "z" }));
}

#[tokio::test]
async fn test_protobuf_envelope() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());
        let frame = framed.next().await.unwrap().unwrap();
        let request = ProtoEnvelope::decode(frame.as_ref()).unwrap();
        let payload: Value = serde_json::from_slice(&request.body).unwrap();
        let reply = ProtoEnvelope {
            msgtype: request.msgtype + 1,
            request_type: request.request_type.clone(),
            body: serde_json::to_vec(&json!({ "msgtype": request.msgtype, "got": payload })).unwrap(),
        };
        framed.send(Bytes::from(reply.encode_to_vec())).await.unwrap();
    });

    let api = api(port);
    let setting = setting(port, ", codec: protobuf");
    let h = harness(
        &[ChannelFixture {
            name: "sock",
            api: &api,
            setting: &setting,
        }],
        ServiceRegistry::new(),
    );

    let response = h.server.post("/sock/keyed").json(&json!({ "q": [1, 2] })).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.json::<Value>(),
        json!({ "data": { "msgtype": 7, "got": { "q": [1, 2] } } })
    );
}

#[tokio::test]
async fn test_response_split_across_writes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());
        framed.next().await.unwrap().unwrap();
        let mut stream = framed.into_inner();

        let body = serde_json::to_vec(&json!({ "msgtype": 7, "payload": { "chunked": true } })).unwrap();
        let mut wire = (body.len() as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(&body);
        for chunk in [&wire[..1], &wire[1..3], &wire[3..9], &wire[9..]] {
            stream.write_all(chunk).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let api = api(port);
    let setting = setting(port, "");
    let h = harness(
        &[ChannelFixture {
            name: "sock",
            api: &api,
            setting: &setting,
        }],
        ServiceRegistry::new(),
    );

    let response = h.server.post("/sock/keyed").json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({ "data": { "chunked": true } }));
}

#[tokio::test]
async fn test_silent_backend_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // Hold the connection open without answering
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let api = api(port);
    let setting = format!(
        "tcp_socket: {{ timeout: 200ms }}\nserver:\n  - {{ key: main, host: 127.0.0.1, port: {} }}\n",
        port
    );
    let h = harness(
        &[ChannelFixture {
            name: "sock",
            api: &api,
            setting: &setting,
        }],
        ServiceRegistry::new(),
    );

    let response = h.server.post("/sock/keyed").json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.json::<Value>()["error"]["type"], "socket_timeout");
}

#[tokio::test]
async fn test_backend_closing_early_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());
        framed.next().await;
        drop(framed);
    });

    let api = api(port);
    let setting = setting(port, "");
    let h = harness(
        &[ChannelFixture {
            name: "sock",
            api: &api,
            setting: &setting,
        }],
        ServiceRegistry::new(),
    );

    let response = h.server.post("/sock/keyed").json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>()["error"]["type"], "socket_transport_error");
}
