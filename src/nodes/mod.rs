mod node;
mod node_manager;
mod queue;
mod rest;

pub use self::node::{JoinOptions, Node};
pub use self::node_manager::NodeManager;
pub use self::queue::Queue;
pub use self::rest::Rest;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use crate::Error;

/// Name sent as `Client-Name` and `User-Agent` to nodes.
pub const CLIENT_NAME: &str = concat!("lavalink-tokio/", env!("CARGO_PKG_VERSION"));

/// Connection details of one Lavalink node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeConfig {
    /// Unique name of the node within a manager.
    pub name: String,
    /// `host:port` of the node, without scheme.
    pub host: String,
    /// The password configured on the node.
    pub auth: String,
    /// Routing group, used to keep players on a subset of nodes.
    #[serde(default)]
    pub group: Option<String>,
    /// Use `wss`/`https` instead of `ws`/`http`.
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub protocol: ProtocolVersion,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>, auth: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            auth: auth.into(),
            group: None,
            secure: false,
            protocol: ProtocolVersion::default(),
        }
    }

    pub(crate) fn websocket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };

        format!("{}://{}/{}/websocket", scheme, self.host, self.protocol.path())
    }

    pub(crate) fn rest_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };

        match self.protocol {
            ProtocolVersion::V4 => format!("{}://{}/v4", scheme, self.host),
            ProtocolVersion::V3 => format!("{}://{}", scheme, self.host),
        }
    }
}

/// Wire protocol spoken by a node.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Player commands are REST calls.
    #[default]
    V4,
    /// Player commands are queued WebSocket messages.
    V3,
}

impl ProtocolVersion {
    fn path(self) -> &'static str {
        match self {
            ProtocolVersion::V4 => "v4",
            ProtocolVersion::V3 => "v3",
        }
    }
}

/// Options shared by every node of a manager.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Options {
    /// Consecutive reconnects attempted before a node is given up.
    pub reconnect_tries: u32,
    #[serde(with = "millis")]
    pub reconnect_interval: Duration,
    #[serde(with = "millis")]
    pub rest_timeout: Duration,
    /// Move the players of a node that goes away to the remaining nodes.
    pub move_on_disconnect: bool,
    /// Ask nodes to keep sessions alive across reconnects.
    pub resume: bool,
    #[serde(with = "millis")]
    pub resume_timeout: Duration,
    /// A session id to resume on the first connect.
    pub session_id: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reconnect_tries: 3,
            reconnect_interval: Duration::from_secs(10),
            rest_timeout: Duration::from_secs(15),
            move_on_disconnect: false,
            resume: false,
            resume_timeout: Duration::from_secs(60),
            session_id: None,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Connection state of a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Disconnected,
    Connecting,
    /// The socket is open but the node has not sent `ready` yet.
    Nearly,
    Connected,
    Reconnecting,
    Disconnecting,
}

/// Which node(s) an operation may be routed to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeSelector {
    /// The least loaded connected node.
    Auto,
    /// The least loaded connected node in any of the groups.
    Group(Vec<String>),
    /// The node with this name, which must be connected.
    Name(String),
}

impl From<&str> for NodeSelector {
    fn from(name: &str) -> Self {
        match name {
            "auto" => NodeSelector::Auto,
            name => NodeSelector::Name(name.to_owned()),
        }
    }
}

/// Lifecycle events of the nodes in a manager.
#[derive(Clone, Debug)]
pub enum NodeEvent {
    Ready { node: String, resumed: bool },
    Error { node: String, error: Arc<Error> },
    Close { node: String, code: u16, reason: String },
    /// The node left the manager for good.
    Disconnect { node: String, reason: String },
    /// Every message received from the node, before it is handled.
    Raw { node: String, message: Value },
    Reconnecting { node: String, attempt: u32 },
}

impl NodeEvent {
    pub fn node(&self) -> &str {
        match self {
            NodeEvent::Ready { node, .. }
            | NodeEvent::Error { node, .. }
            | NodeEvent::Close { node, .. }
            | NodeEvent::Disconnect { node, .. }
            | NodeEvent::Raw { node, .. }
            | NodeEvent::Reconnecting { node, .. } => node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_protocol_and_security() {
        let mut config = NodeConfig::new("local", "localhost:2333", "youshallnotpass");
        assert_eq!(config.websocket_url(), "ws://localhost:2333/v4/websocket");
        assert_eq!(config.rest_url(), "http://localhost:2333/v4");

        config.secure = true;
        config.protocol = ProtocolVersion::V3;
        assert_eq!(config.websocket_url(), "wss://localhost:2333/v3/websocket");
        assert_eq!(config.rest_url(), "https://localhost:2333");
    }

    #[test]
    fn options_fill_defaults() {
        let options: Options = serde_json::from_str(r#"{ "reconnect_interval": 250 }"#).unwrap();
        assert_eq!(options.reconnect_interval, Duration::from_millis(250));
        assert_eq!(options.reconnect_tries, 3);
    }

    #[test]
    fn config_defaults_to_current_protocol() {
        let config: NodeConfig = serde_json::from_str(
            r#"{ "name": "a", "host": "10.0.0.2:2333", "auth": "pw", "group": "eu" }"#,
        )
        .unwrap();

        assert_eq!(config.protocol, ProtocolVersion::V4);
        assert_eq!(config.group.as_deref(), Some("eu"));
        assert!(!config.secure);
    }

    #[test]
    fn selector_from_str() {
        assert_eq!(NodeSelector::from("auto"), NodeSelector::Auto);
        assert_eq!(NodeSelector::from("eu-1"), NodeSelector::Name("eu-1".to_owned()));
    }
}
