//! Shared fixtures for the integration tests: on-disk channels, a wired
//! gateway router and JWT minting.

#![allow(dead_code)]

use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use channel_gateway::auth::providers::JwtClaims;
use channel_gateway::auth::{AuthPipeline, JwtIdentityProvider};
use channel_gateway::channel::ChannelStore;
use channel_gateway::core::config::ServerConfig;
use channel_gateway::dispatch::{Dispatcher, ServiceRegistry};
use channel_gateway::gateway::{build_router, Gateway, ServerState};
use channel_gateway::task::TaskEngine;

pub const SECRET: &str = "integration-secret";
pub const SITE_HOST: &str = "http://gw.test";

/// A channel written to disk before the gateway starts
pub struct ChannelFixture<'a> {
    pub name: &'a str,
    pub api: &'a str,
    pub setting: &'a str,
}

pub struct Harness {
    pub dir: TempDir,
    pub server: TestServer,
}

impl Harness {
    pub fn workspace(&self) -> PathBuf {
        self.dir.path().join("workspace")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.dir.path().join("tasks")
    }
}

pub fn write_channel(root: &Path, fixture: &ChannelFixture<'_>) {
    let dir = root.join(fixture.name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("api.yaml"), fixture.api).unwrap();
    fs::write(dir.join("setting.yaml"), fixture.setting).unwrap();
}

/// Router over channels in a fresh temp dir, JWT identities signed with [`SECRET`]
pub fn router(dir: &Path, channels: &[ChannelFixture<'_>], services: ServiceRegistry) -> Router {
    let channel_root = dir.join("channels");
    fs::create_dir_all(&channel_root).unwrap();
    fs::create_dir_all(dir.join("workspace")).unwrap();
    for fixture in channels {
        write_channel(&channel_root, fixture);
    }

    let dispatcher = Dispatcher::new(Duration::from_secs(5), Arc::new(services)).unwrap();
    let gateway = Gateway::new(
        Arc::new(ChannelStore::new(channel_root)),
        AuthPipeline::new(Arc::new(JwtIdentityProvider::new(SECRET, Algorithm::HS256))),
        dispatcher.clone(),
        TaskEngine::new(dir.join("tasks"), SITE_HOST, dispatcher),
    );

    let config = ServerConfig {
        enable_cors: false,
        ..ServerConfig::default()
    };
    build_router(
        &config,
        ServerState {
            gateway,
            workspace_root: dir.join("workspace"),
            privileged_role: "admin".to_string(),
            metrics: None,
        },
    )
}

pub fn harness(channels: &[ChannelFixture<'_>], services: ServiceRegistry) -> Harness {
    let dir = TempDir::new().unwrap();
    let app = router(dir.path(), channels, services);
    Harness {
        server: TestServer::new(app).unwrap(),
        dir,
    }
}

/// HS256 bearer token; `ttl_secs` may be negative for an expired token
pub fn token(sub: &str, roles: &[&str], ttl_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = JwtClaims {
        sub: sub.to_string(),
        exp: now + ttl_secs,
        iat: Some(now),
        name: Some(format!("user-{}", sub)),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        custom_claims: Map::new(),
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

pub fn bearer(token: &str) -> (axum::http::HeaderName, axum::http::HeaderValue) {
    (
        axum::http::header::AUTHORIZATION,
        axum::http::HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    )
}

/// Poll a task over HTTP until it leaves `running`
pub async fn wait_finished(server: &TestServer, pid: &str, token: &str) -> Value {
    let (name, value) = bearer(token);
    for _ in 0..200 {
        let response = server
            .get(&format!("/tasks/{}", pid))
            .add_header(name.clone(), value.clone())
            .await;
        let body: Value = response.json();
        if body["data"]["status"] == "finish" {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("task {} did not finish", pid);
}
