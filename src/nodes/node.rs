use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use super::node_manager::WeakManager;
use super::{NodeConfig, NodeEvent, NodeManager, Options, ProtocolVersion, Queue, Rest, State, CLIENT_NAME};
use crate::model::{Command, Incoming, Ready, RemoteStats, UpdatePlayer, VoiceGatewayEvent, VoiceStatePacket};
use crate::player::{Player, PlayerManager};
use crate::{Error, Result};

/// Close code used when the socket ended without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

const AUTHORIZATION: HeaderName = HeaderName::from_static("authorization");
const USER_ID: HeaderName = HeaderName::from_static("user-id");
const CLIENT_NAME_HEADER: HeaderName = HeaderName::from_static("client-name");
const SESSION_ID: HeaderName = HeaderName::from_static("session-id");
const RESUME_KEY: HeaderName = HeaderName::from_static("resume-key");

/// Where and how to join a voice channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JoinOptions {
    pub guild_id: u64,
    pub shard_id: u64,
    pub channel_id: u64,
    pub deaf: bool,
    pub mute: bool,
}

impl JoinOptions {
    /// Options joining deafened and unmuted.
    pub fn new(guild_id: u64, shard_id: u64, channel_id: u64) -> Self {
        Self {
            guild_id,
            shard_id,
            channel_id,
            deaf: true,
            mute: false,
        }
    }
}

/// A connection to one Lavalink node, and the players hosted on it.
///
/// Cloning is cheap and yields a handle to the same node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    config: NodeConfig,
    options: Arc<Options>,
    manager: WeakManager,
    events: broadcast::Sender<NodeEvent>,
    rest: Rest,
    queue: Queue,
    players: Mutex<PlayerManager>,
    status: Mutex<Status>,
    socket: Mutex<Option<UnboundedSender<Message>>>,
}

#[derive(Debug)]
struct Status {
    state: State,
    reconnects: u32,
    destroyed: bool,
    /// Set once the node started handing off its players.
    leaving: bool,
    session_id: Option<String>,
    stats: Option<RemoteStats>,
    disconnect_reason: Option<String>,
}

impl Node {
    pub(crate) fn new(
        config: NodeConfig,
        options: Arc<Options>,
        manager: WeakManager,
        events: broadcast::Sender<NodeEvent>,
    ) -> Result<Self> {
        let rest = Rest::new(&config, options.rest_timeout)?;

        Ok(Self {
            inner: Arc::new(NodeInner {
                config,
                options,
                manager,
                events,
                rest,
                queue: Queue::new(),
                players: Mutex::new(PlayerManager::new()),
                status: Mutex::new(Status {
                    state: State::Disconnected,
                    reconnects: 0,
                    destroyed: false,
                    leaving: false,
                    session_id: None,
                    stats: None,
                    disconnect_reason: None,
                }),
                socket: Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn group(&self) -> Option<&str> {
        self.inner.config.group.as_deref()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> State {
        self.inner.status.lock().state
    }

    /// Whether the node was removed or gave up reconnecting. A destroyed
    /// node never connects again.
    pub fn is_destroyed(&self) -> bool {
        self.inner.status.lock().destroyed
    }

    pub fn reconnects(&self) -> u32 {
        self.inner.status.lock().reconnects
    }

    /// The session id issued by the node in its `ready` message.
    pub fn session_id(&self) -> Option<String> {
        self.inner.status.lock().session_id.clone()
    }

    pub fn stats(&self) -> Option<RemoteStats> {
        self.inner.status.lock().stats.clone()
    }

    /// Load penalty from the last stats report. A node that has not
    /// reported yet has no penalty.
    pub fn penalty(&self) -> i64 {
        self.inner
            .status
            .lock()
            .stats
            .as_ref()
            .map_or(0, RemoteStats::penalty)
    }

    pub fn rest(&self) -> &Rest {
        &self.inner.rest
    }

    pub fn players(&self) -> Vec<Player> {
        self.inner.players.lock().values().cloned().collect()
    }

    pub fn get_player(&self, guild_id: u64) -> Option<Player> {
        self.inner.players.lock().get(guild_id).cloned()
    }

    /// Whether both handles point to the same node.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn manager(&self) -> Option<NodeManager> {
        self.inner.manager.upgrade()
    }

    /// Opens the WebSocket to the node in a background task.
    ///
    /// Fails if the bot user id is not known yet; that is not retried.
    pub fn connect(&self) -> Result<()> {
        let user_id = self
            .manager()
            .and_then(|manager| manager.user_id())
            .ok_or(Error::ClientNotReady)?;

        if self.is_destroyed() {
            debug!("Not connecting destroyed node {}", self.name());

            return Ok(());
        }

        let request = self.request(user_id)?;
        self.inner.status.lock().state = State::Connecting;

        info!("Connecting to node {} at {}", self.name(), self.inner.config.host);

        let node = self.clone();
        tokio::spawn(async move { node.run(request).await });

        Ok(())
    }

    /// Closes the connection for good, handing players off to other nodes
    /// if configured.
    ///
    /// Calling this on a node that is already destroyed does nothing.
    pub async fn disconnect(&self, code: u16, reason: &str) {
        {
            let mut status = self.inner.status.lock();

            if status.destroyed {
                return;
            }

            status.destroyed = true;
            status.state = State::Disconnecting;
            status.disconnect_reason = Some(reason.to_owned());
        }

        self.inner.queue.clear();

        let frame = CloseFrame {
            code: code.into(),
            reason: reason.to_owned().into(),
        };
        let closing = match self.open_socket() {
            Some(socket) => socket.send(Message::Close(Some(frame))).is_ok(),
            None => false,
        };

        // With an open socket the teardown runs once the close completes.
        if !closing {
            self.move_players(reason.to_owned()).await;
        }
    }

    /// Joins a voice channel, creating the guild's player on this node if it
    /// does not exist yet.
    pub async fn join_channel(&self, options: JoinOptions) -> Result<Player> {
        if self.state() != State::Connected {
            return Err(Error::NodeNotReady(self.name().to_owned()));
        }

        let (player, created) = {
            let mut players = self.inner.players.lock();

            match players.get(options.guild_id) {
                Some(player) => (player.clone(), false),
                None => {
                    let player = Player::new(self.clone(), options.guild_id, options.shard_id);
                    players.insert(player.clone());

                    (player, true)
                },
            }
        };

        let joined = player
            .connection()
            .connect(options.channel_id, options.shard_id, options.deaf, options.mute)
            .await;

        match joined {
            Ok(()) => Ok(player),
            Err(why) => {
                if created {
                    self.detach(&player);
                }

                Err(why)
            },
        }
    }

    /// Leaves the voice channel of a guild and destroys its player.
    pub async fn leave_channel(&self, guild_id: u64) -> Result<()> {
        match self.get_player(guild_id) {
            Some(player) => player.connection().disconnect(true).await,
            None => Ok(()),
        }
    }

    /// Applies a player update through whichever transport the node's
    /// protocol uses.
    pub(crate) async fn apply(&self, guild_id: u64, update: &UpdatePlayer, no_replace: bool) -> Result<()> {
        match self.inner.config.protocol {
            ProtocolVersion::V4 => {
                let session_id = self.require_session()?;
                self.inner
                    .rest
                    .update_player(&session_id, guild_id, update, no_replace)
                    .await?;
            },
            ProtocolVersion::V3 => {
                for command in Command::from_update(guild_id, update, no_replace) {
                    self.enqueue(&command)?;
                }
            },
        }

        Ok(())
    }

    pub(crate) async fn destroy_player(&self, guild_id: u64) -> Result<()> {
        match self.inner.config.protocol {
            ProtocolVersion::V4 => {
                let session_id = self.require_session()?;

                self.inner.rest.destroy_player(&session_id, guild_id).await
            },
            ProtocolVersion::V3 => {
                // Anything still queued for the guild would recreate the player.
                self.inner.queue.discard(guild_id);

                self.enqueue(&Command::Destroy { guild_id })
            },
        }
    }

    /// Routes a gateway voice event to the player of its guild.
    pub(crate) fn handle_voice_event(&self, event: &VoiceGatewayEvent, user_id: u64) {
        let player = match self.get_player(event.guild_id()) {
            Some(player) => player,
            None => return,
        };

        match event {
            VoiceGatewayEvent::ServerUpdate(update) => {
                player
                    .connection()
                    .set_server_update(update.token.clone(), update.endpoint.clone());
            },
            VoiceGatewayEvent::StateUpdate(update) => {
                if update.user_id != user_id {
                    return;
                }

                player.connection().set_state_update(
                    update.channel_id,
                    update.session_id.clone(),
                    update.self_deaf,
                    update.self_mute,
                );
            },
        }
    }

    pub(crate) fn forward(&self, shard_id: u64, packet: VoiceStatePacket, important: bool) {
        match self.manager() {
            Some(manager) => manager.forward(shard_id, packet, important),
            None => warn!("Manager of node {} dropped, voice state packet lost", self.name()),
        }
    }

    pub(crate) fn attach(&self, player: Player) {
        self.inner.players.lock().insert(player);
    }

    /// Removes the player from this node, if it is the one registered for
    /// its guild.
    pub(crate) fn detach(&self, player: &Player) {
        let mut players = self.inner.players.lock();

        if players.get(player.guild_id()).map_or(false, |current| current.ptr_eq(player)) {
            players.remove(player.guild_id());
        }
    }

    pub(crate) fn emit_error(&self, error: Error) {
        self.emit(NodeEvent::Error {
            node: self.name().to_owned(),
            error: Arc::new(error),
        });
    }

    fn emit(&self, event: NodeEvent) {
        // Nobody listening is fine.
        let _ = self.inner.events.send(event);
    }

    fn require_session(&self) -> Result<String> {
        self.session_id()
            .ok_or_else(|| Error::NoSession(self.name().to_owned()))
    }

    fn open_socket(&self) -> Option<UnboundedSender<Message>> {
        self.inner
            .socket
            .lock()
            .as_ref()
            .filter(|socket| !socket.is_closed())
            .cloned()
    }

    fn enqueue(&self, command: &Command) -> Result<()> {
        let socket = self.open_socket();

        self.inner
            .queue
            .add(command, command.guild_id(), command.is_important(), socket.as_ref())
    }

    fn request(&self, user_id: u64) -> Result<Request> {
        let config = &self.inner.config;
        let mut request = config.websocket_url().into_client_request()?;

        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&config.auth)?);
        headers.insert(USER_ID, HeaderValue::from_str(&user_id.to_string())?);
        headers.insert(CLIENT_NAME_HEADER, HeaderValue::from_static(CLIENT_NAME));

        if self.inner.options.resume {
            if let Some(session_id) = self.resume_session() {
                let name = match config.protocol {
                    ProtocolVersion::V4 => SESSION_ID,
                    ProtocolVersion::V3 => RESUME_KEY,
                };

                headers.insert(name, HeaderValue::from_str(&session_id)?);
            }
        }

        Ok(request)
    }

    /// The session to resume: the last one issued by the node, or the
    /// configured one before the first `ready`.
    fn resume_session(&self) -> Option<String> {
        self.session_id()
            .or_else(|| self.inner.options.session_id.clone())
    }

    async fn run(self, request: Request) {
        let stream = match connect_async(request).await {
            Ok((stream, _)) => stream,
            Err(why) => {
                warn!("Failed to connect to node {}: {}", self.name(), why);

                if self.is_destroyed() {
                    return;
                }

                let reason = why.to_string();
                self.emit_error(why.into());
                self.handle_close(ABNORMAL_CLOSURE, reason).await;

                return;
            },
        };

        if self.is_destroyed() {
            debug!("Node {} was destroyed while connecting", self.name());

            return;
        }

        let (mut sink, mut stream) = stream.split();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();
        *self.inner.socket.lock() = Some(sender);

        let name = self.name().to_owned();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                if let Err(why) = sink.send(message).await {
                    debug!("Writer of node {} stopped: {}", name, why);

                    break;
                }
            }
        });

        self.open();

        let (code, reason) = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => self.handle_message(&text),
                Some(Ok(Message::Close(frame))) => {
                    info!("Received a close from node {}: {:?}", self.name(), frame);

                    break frame
                        .map(|frame| (u16::from(frame.code), frame.reason.into_owned()))
                        .unwrap_or((1005, String::new()));
                },
                Some(Ok(_)) => {},
                Some(Err(why)) => {
                    warn!("Error reading from node {}: {}", self.name(), why);
                    self.emit_error(why.into());

                    break (ABNORMAL_CLOSURE, String::new());
                },
                None => break (ABNORMAL_CLOSURE, String::new()),
            }
        };

        self.inner.socket.lock().take();
        self.handle_close(code, reason).await;
    }

    fn open(&self) {
        let legacy = self.inner.config.protocol == ProtocolVersion::V3;

        {
            let mut status = self.inner.status.lock();
            status.reconnects = 0;
            status.state = if legacy { State::Connected } else { State::Nearly };
        }

        debug!("Socket to node {} upgraded", self.name());

        // Legacy nodes are usable right away and never send `ready`.
        if legacy {
            self.emit(NodeEvent::Ready {
                node: self.name().to_owned(),
                resumed: false,
            });

            if let (true, Some(key)) = (self.inner.options.resume, self.inner.options.session_id.clone()) {
                let command = Command::ConfigureResuming {
                    key,
                    timeout: self.inner.options.resume_timeout.as_secs(),
                };

                if let Err(why) = self.enqueue(&command) {
                    self.emit_error(why);
                }
            }
        }
    }

    pub(crate) fn handle_message(&self, text: &str) {
        let value = match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(why) => {
                warn!("Error parsing message from node {}: {:?}", self.name(), why);

                return;
            },
        };

        self.emit(NodeEvent::Raw {
            node: self.name().to_owned(),
            message: value.clone(),
        });

        let incoming = match Incoming::deserialize(&value) {
            Ok(incoming) => incoming,
            Err(why) => {
                warn!("Unexpected message from node {}: {:?}", self.name(), why);

                return;
            },
        };

        match incoming {
            Incoming::Ready(ready) => self.handle_ready(ready),
            Incoming::Stats(stats) => {
                self.inner.status.lock().stats = Some(stats);
            },
            Incoming::Event(event) => match self.get_player(event.guild_id()) {
                Some(player) => player.handle_event(event),
                None => trace!("Dropping event for unknown guild {}", event.guild_id()),
            },
            Incoming::PlayerUpdate(update) => match self.get_player(update.guild_id) {
                Some(player) => player.handle_update(update),
                None => trace!("Dropping update for unknown guild {}", update.guild_id),
            },
            Incoming::Unknown => trace!("Ignoring unknown op from node {}", self.name()),
        }
    }

    fn handle_ready(&self, ready: Ready) {
        {
            let mut status = self.inner.status.lock();
            status.session_id = Some(ready.session_id.clone());
            status.state = State::Connected;
        }

        info!(
            "Node {} ready with session {} (resumed: {})",
            self.name(),
            ready.session_id,
            ready.resumed,
        );

        self.emit(NodeEvent::Ready {
            node: self.name().to_owned(),
            resumed: ready.resumed,
        });

        if !self.inner.options.resume {
            return;
        }

        let node = self.clone();
        let timeout = self.inner.options.resume_timeout.as_secs();

        tokio::spawn(async move {
            let updated = node
                .inner
                .rest
                .update_session(&ready.session_id, true, timeout)
                .await;

            if let Err(why) = updated {
                warn!("Failed to enable resuming on node {}: {}", node.name(), why);
                node.emit_error(why);
            }
        });
    }

    async fn handle_close(&self, code: u16, reason: String) {
        self.emit(NodeEvent::Close {
            node: self.name().to_owned(),
            code,
            reason: reason.clone(),
        });

        let (give_up, disconnect_reason) = {
            let status = self.inner.status.lock();
            let give_up = status.destroyed || status.reconnects >= self.inner.options.reconnect_tries;

            (give_up, status.disconnect_reason.clone())
        };

        if give_up {
            self.move_players(disconnect_reason.unwrap_or(reason)).await;
        } else {
            self.reconnect().await;
        }
    }

    async fn reconnect(&self) {
        let attempt = {
            let mut status = self.inner.status.lock();

            if status.state == State::Reconnecting {
                return;
            }

            status.state = State::Reconnecting;
            status.reconnects += 1;
            status.reconnects
        };

        self.inner.socket.lock().take();

        let interval = self.inner.options.reconnect_interval;
        warn!(
            "Node {} disconnected, reconnecting in {:?} (attempt {})",
            self.name(),
            interval,
            attempt,
        );

        self.emit(NodeEvent::Reconnecting {
            node: self.name().to_owned(),
            attempt,
        });

        tokio::time::sleep(interval).await;

        if self.is_destroyed() {
            return;
        }

        if let Err(why) = self.connect() {
            error!("Failed to reconnect node {}: {}", self.name(), why);
            self.emit_error(why);
        }
    }

    /// Hands the players off to other nodes, or drops them, then tears the
    /// node down.
    async fn move_players(&self, reason: String) {
        {
            let mut status = self.inner.status.lock();

            if std::mem::replace(&mut status.leaving, true) {
                return;
            }

            // A leaving node must not be picked as a relocation target.
            status.state = State::Disconnecting;
        }

        let players = self.players();
        let relocate = self.inner.options.move_on_disconnect
            && self.manager().map_or(false, |manager| manager.len() > 1);

        if relocate {
            info!("Moving {} players off node {}", players.len(), self.name());

            let results = join_all(players.iter().map(Player::relocate)).await;

            for why in results.into_iter().filter_map(Result::err) {
                error!("Failed to move a player off node {}: {}", self.name(), why);
                self.emit_error(why);
            }
        } else {
            for player in players {
                if let Err(why) = player.connection().disconnect(false).await {
                    debug!("Error dropping player {}: {}", player.guild_id(), why);
                }
            }
        }

        self.teardown(reason);
    }

    fn teardown(&self, reason: String) {
        self.inner.socket.lock().take();
        self.inner.queue.clear();
        self.inner.players.lock().clear();

        {
            let mut status = self.inner.status.lock();
            status.state = State::Disconnected;
            status.destroyed = true;
            status.session_id = None;
        }

        info!("Node {} disconnected: {}", self.name(), reason);

        match self.manager() {
            Some(manager) => manager.remove_disconnected(self, reason),
            None => self.emit(NodeEvent::Disconnect {
                node: self.name().to_owned(),
                reason,
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn force_ready(&self, session_id: &str) {
        let mut status = self.inner.status.lock();
        status.state = State::Connected;
        status.session_id = Some(session_id.to_owned());
    }

    #[cfg(test)]
    pub(crate) fn force_stats(&self, stats: RemoteStats) {
        self.inner.status.lock().stats = Some(stats);
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.inner.queue.len()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.inner.config.name)
            .field("status", &*self.inner.status.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_handler::ChannelHandler;
    use crate::model::{Cpu, FrameStats, TrackEvent, TrackHandle, TrackStart};
    use crate::nodes::NodeSelector;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(options: Options) -> NodeManager {
        let (handler, _receiver) = ChannelHandler::new(1);

        NodeManager::new(handler, options)
    }

    #[test]
    fn penalty_defaults_to_zero_without_stats() {
        let manager = manager(Options::default());
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));

        assert_eq!(node.penalty(), 0);

        node.force_stats(RemoteStats {
            players: 5,
            cpu: Cpu {
                system_load: 0.5,
                ..Default::default()
            },
            frame_stats: Some(FrameStats {
                sent: 0,
                nulled: 1,
                deficit: 2,
            }),
            ..Default::default()
        });

        assert_eq!(node.penalty(), 114);
    }

    #[tokio::test]
    async fn disconnect_twice_is_a_no_op() {
        let manager = manager(Options::default());
        let mut events = manager.subscribe();
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));

        node.disconnect(1000, "bye").await;

        assert!(node.is_destroyed());
        assert_eq!(node.state(), State::Disconnected);
        assert!(matches!(
            events.try_recv(),
            Ok(NodeEvent::Disconnect { ref node, ref reason }) if node == "a" && reason == "bye"
        ));
        assert!(manager.nodes().is_empty());

        node.disconnect(1000, "again").await;

        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(node.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn destroyed_node_does_not_connect() {
        let manager = manager(Options::default());
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));
        node.disconnect(1000, "bye").await;

        node.connect().unwrap();

        assert_eq!(node.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn messages_update_stats_and_state() {
        let manager = manager(Options::default());
        let mut events = manager.subscribe();
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));

        node.handle_message(&json!({ "op": "ready", "resumed": false, "sessionId": "s1" }).to_string());
        node.handle_message(&json!({
            "op": "stats",
            "players": 3,
            "playingPlayers": 1,
            "uptime": 10,
            "memory": { "free": 0, "used": 0, "allocated": 0, "reservable": 0 },
            "cpu": { "cores": 2, "systemLoad": 0.0, "lavalinkLoad": 0.0 }
        }).to_string());

        assert_eq!(node.state(), State::Connected);
        assert_eq!(node.session_id().as_deref(), Some("s1"));
        assert_eq!(node.penalty(), 3);
        assert!(matches!(events.try_recv(), Ok(NodeEvent::Raw { .. })));
        assert!(matches!(events.try_recv(), Ok(NodeEvent::Ready { resumed: false, .. })));
        assert!(matches!(manager.get_node(NodeSelector::Auto), Ok(ref found) if found.ptr_eq(&node)));
    }

    #[test]
    fn malformed_messages_are_dropped() {
        let manager = manager(Options::default());
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));

        node.handle_message("not json");
        node.handle_message(r#"{ "op": "stats", "players": "many" }"#);

        assert_eq!(node.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn legacy_commands_wait_for_the_socket() {
        let manager = manager(Options::default());
        let mut config = NodeConfig::new("legacy", "127.0.0.1:1", "pw");
        config.protocol = ProtocolVersion::V3;
        let node = manager.insert_detached(config);

        let update = UpdatePlayer {
            paused: Some(true),
            ..Default::default()
        };
        node.apply(1, &update, false).await.unwrap();
        node.apply(2, &update, false).await.unwrap();

        assert_eq!(node.queued(), 2);

        node.disconnect(1000, "bye").await;

        assert_eq!(node.queued(), 0);
    }

    #[tokio::test]
    async fn current_protocol_requires_a_session() {
        let manager = manager(Options::default());
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));

        let err = node.apply(1, &UpdatePlayer::default(), false).await.unwrap_err();

        assert!(matches!(err, Error::NoSession(ref name) if name == "a"));
    }

    #[test]
    fn request_carries_auth_headers() {
        let manager = manager(Options {
            resume: true,
            session_id: Some("previous".to_owned()),
            ..Default::default()
        });
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:2333", "pw"));

        let request = node.request(1).unwrap();
        let headers = request.headers();

        assert_eq!(request.uri(), "ws://127.0.0.1:2333/v4/websocket");
        assert_eq!(headers["authorization"], "pw");
        assert_eq!(headers["user-id"], "1");
        assert_eq!(headers["client-name"], CLIENT_NAME);
        assert_eq!(headers["session-id"], "previous");
    }

    #[tokio::test]
    async fn join_requires_a_connected_node() {
        let manager = manager(Options::default());
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));

        let err = node.join_channel(JoinOptions::new(1, 0, 2)).await.unwrap_err();

        assert!(matches!(err, Error::NodeNotReady(_)));
        assert!(node.players().is_empty());
    }

    #[tokio::test]
    async fn destroy_drops_commands_queued_for_the_guild() {
        let manager = manager(Options::default());
        let mut config = NodeConfig::new("legacy", "127.0.0.1:1", "pw");
        config.protocol = ProtocolVersion::V3;
        let node = manager.insert_detached(config);

        let play = UpdatePlayer {
            encoded_track: Some(Some("QAAA".to_owned())),
            ..Default::default()
        };
        node.apply(1, &play, false).await.unwrap();
        node.destroy_player(1).await.unwrap();

        assert_eq!(node.queued(), 1);

        let (sender, mut receiver) = mpsc::unbounded_channel();
        *node.inner.socket.lock() = Some(sender);

        let pause = UpdatePlayer {
            paused: Some(true),
            ..Default::default()
        };
        node.apply(2, &pause, false).await.unwrap();

        let mut sent = Vec::new();
        while let Ok(Message::Text(text)) = receiver.try_recv() {
            sent.push(serde_json::from_str::<Value>(&text).unwrap());
        }

        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["op"], "destroy");
        assert_eq!(sent[0]["guildId"], "1");
        assert_eq!(sent[1]["op"], "pause");
        assert_eq!(sent[1]["guildId"], "2");
        assert_eq!(node.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_while_reconnecting_is_ignored() {
        let manager = manager(Options::default());
        let mut events = manager.subscribe();
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));

        let first = tokio::spawn({
            let node = node.clone();
            async move { node.reconnect().await }
        });
        tokio::task::yield_now().await;

        assert_eq!(node.state(), State::Reconnecting);

        node.reconnect().await;

        assert_eq!(node.reconnects(), 1);
        assert!(matches!(events.try_recv(), Ok(NodeEvent::Reconnecting { attempt: 1, .. })));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        node.disconnect(1000, "bye").await;
        first.await.unwrap();

        assert_eq!(node.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn giving_up_moves_players_off_the_node() {
        let target = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v4/sessions/s/players/7"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&target)
            .await;

        let manager = manager(Options {
            reconnect_tries: 0,
            move_on_disconnect: true,
            ..Default::default()
        });

        // The dying node reports less load than the healthy one.
        let dying = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));
        dying.force_ready("s");
        dying.force_stats(RemoteStats::default());

        let healthy = manager.insert_detached(NodeConfig::new("b", target.address().to_string(), "pw"));
        healthy.force_ready("s");
        healthy.force_stats(RemoteStats {
            players: 9,
            ..Default::default()
        });

        let player = Player::new(dying.clone(), 7, 0);
        dying.attach(player.clone());
        player.handle_event(TrackEvent::Start(TrackStart {
            guild_id: 7,
            track: TrackHandle::Encoded("Q".to_owned()),
        }));

        dying.handle_close(ABNORMAL_CLOSURE, String::new()).await;

        assert!(dying.is_destroyed());
        assert!(healthy.get_player(7).is_some());
        assert!(player.node().ptr_eq(&healthy));
        assert!(player.track().is_some());
        assert_eq!(manager.nodes().len(), 1);
    }
}
