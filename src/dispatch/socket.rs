//! Socket-proxy backend: picks the backend server for an entrance and runs
//! one request/response exchange on a fresh [`SocketClient`].

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::channel::{ChannelSetting, ServerTag, SocketProxyTarget, SocketSettings};
use crate::core::error::GatewayResult;
use crate::observability::DataSanitizer;
use crate::socket::{CodecKind, SocketClient, SocketTarget, DEFAULT_IDLE_TIMEOUT};

const FALLBACK_HOST: &str = "127.0.0.1";
const FALLBACK_PORT: u16 = 8080;

/// Where and how a socket call is sent
#[derive(Debug, Clone, PartialEq)]
pub struct SocketRoute {
    pub target: SocketTarget,
    pub idle_timeout: Duration,
    pub codec: CodecKind,
}

/// Pick the server for a socket entrance
///
/// - a server tag naming an entry of the channel's server list selects it
/// - inline settings on the entrance override the channel's `tcp_socket`
/// - otherwise the channel's bound host is used, and when the socket is not
///   bound to a host the first configured server is
pub fn select_route(setting: &ChannelSetting, target: &SocketProxyTarget) -> SocketRoute {
    let base = setting.tcp_socket.clone().unwrap_or_default();
    let settings = match &target.server_tag {
        Some(ServerTag::Inline(inline)) => base.merged_with(inline),
        _ => base,
    };

    let tagged = match &target.server_tag {
        Some(ServerTag::Key(key)) => setting.server(key),
        _ => None,
    };

    let address = match (tagged, &settings) {
        (Some(server), _) => SocketTarget::new(server.host.clone(), server.port),
        (
            None,
            SocketSettings {
                host: Some(host), port, ..
            },
        ) => SocketTarget::new(host.clone(), port.unwrap_or(FALLBACK_PORT)),
        (None, _) => setting
            .server
            .first()
            .map(|server| SocketTarget::new(server.host.clone(), server.port))
            .unwrap_or_else(|| SocketTarget::new(FALLBACK_HOST, settings.port.unwrap_or(FALLBACK_PORT))),
    };

    SocketRoute {
        target: address,
        idle_timeout: settings.timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT),
        codec: settings.codec,
    }
}

/// Run one socket exchange for `payload`
pub async fn send(
    setting: &ChannelSetting,
    target: &SocketProxyTarget,
    payload: &Map<String, Value>,
    sanitizer: Arc<DataSanitizer>,
) -> GatewayResult<Value> {
    let route = select_route(setting, target);
    debug!(
        target_addr = %route.target,
        msgtype = target.msgtype,
        response_type = target.response_type.as_deref().unwrap_or(""),
        "Dispatching to socket backend"
    );

    let mut client = SocketClient::new(route.target, route.codec.codec())
        .with_idle_timeout(route.idle_timeout)
        .with_sanitizer(sanitizer);

    client
        .request(
            target.msgtype,
            &Value::Object(payload.clone()),
            target.request_type.as_deref(),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(yaml: &str) -> ChannelSetting {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn target(yaml: &str) -> SocketProxyTarget {
        serde_yaml::from_str(yaml).unwrap()
    }

    const SERVERS: &str = r#"
tcp_socket: { timeout: 3s }
server:
  - { key: a, host: 10.0.0.1, port: 7001 }
  - { key: b, host: 10.0.0.2, port: 7002 }
"#;

    #[test]
    fn test_server_tag_selects_entry() {
        let route = select_route(&setting(SERVERS), &target("{ msgtype: 1, server_tag: b }"));
        assert_eq!(route.target, SocketTarget::new("10.0.0.2", 7002));
        assert_eq!(route.idle_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_unbound_socket_defaults_to_first_server() {
        let route = select_route(&setting(SERVERS), &target("{ msgtype: 1 }"));
        assert_eq!(route.target, SocketTarget::new("10.0.0.1", 7001));
    }

    #[test]
    fn test_bound_host_wins_over_server_list() {
        let s = setting(
            r#"
tcp_socket: { host: backend.local, port: 9000 }
server: [{ key: a, host: 10.0.0.1, port: 7001 }]
"#,
        );
        let route = select_route(&s, &target("{ msgtype: 1, server_tag: missing }"));
        assert_eq!(route.target, SocketTarget::new("backend.local", 9000));
        assert_eq!(route.idle_timeout, DEFAULT_IDLE_TIMEOUT);
    }

    #[test]
    fn test_inline_settings_override_channel() {
        let s = setting("tcp_socket: { host: backend.local, port: 9000 }");
        let route = select_route(
            &s,
            &target("{ msgtype: 1, server_tag: { port: 9100, codec: protobuf } }"),
        );
        assert_eq!(route.target, SocketTarget::new("backend.local", 9100));
        assert_eq!(route.codec, CodecKind::Protobuf);
    }

    #[test]
    fn test_nothing_configured_uses_fallback() {
        let route = select_route(&ChannelSetting::default(), &target("{ msgtype: 1 }"));
        assert_eq!(route.target, SocketTarget::new(FALLBACK_HOST, FALLBACK_PORT));
    }
}
