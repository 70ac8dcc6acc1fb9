use parking_lot::Mutex;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::oneshot;
use super::{Player, PlayerInner};
use crate::model::{UpdatePlayer, VoiceStatePacket, VoiceUpdate};
use crate::{Error, HandshakeError, Result};

/// How long a join waits for Discord to hand out the voice server.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// State of the voice connection, as last reported by the gateway.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Outcome of a voice handshake, delivered to whoever is waiting on it.
#[derive(Debug)]
enum ConnectionUpdate {
    SessionReady,
    SessionIdMissing,
    SessionEndpointMissing,
    SessionUpdateFailed(Error),
}

#[derive(Clone, Debug, Default)]
struct Voice {
    state: ConnectionState,
    channel_id: Option<u64>,
    shard_id: u64,
    session_id: Option<String>,
    /// Voice region, from the endpoint's first label without digits.
    region: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
    deafened: bool,
    muted: bool,
    /// The voice connection changed channel or region since the last close.
    moved: bool,
    /// The player is being moved to another node.
    reconnecting: bool,
}

/// The voice side of a player: joining and leaving channels, and relaying
/// Discord's voice credentials to the node.
pub struct Connection {
    player: Weak<PlayerInner>,
    guild_id: u64,
    voice: Mutex<Voice>,
    pending: Mutex<Option<oneshot::Sender<ConnectionUpdate>>>,
}

impl Connection {
    pub(crate) fn new(player: Weak<PlayerInner>, guild_id: u64, shard_id: u64) -> Self {
        Self {
            player,
            guild_id,
            voice: Mutex::new(Voice {
                shard_id,
                ..Default::default()
            }),
            pending: Mutex::new(None),
        }
    }

    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    pub fn state(&self) -> ConnectionState {
        self.voice.lock().state
    }

    pub fn channel_id(&self) -> Option<u64> {
        self.voice.lock().channel_id
    }

    pub fn shard_id(&self) -> u64 {
        self.voice.lock().shard_id
    }

    pub fn session_id(&self) -> Option<String> {
        self.voice.lock().session_id.clone()
    }

    pub fn region(&self) -> Option<String> {
        self.voice.lock().region.clone()
    }

    pub fn deafened(&self) -> bool {
        self.voice.lock().deafened
    }

    pub fn muted(&self) -> bool {
        self.voice.lock().muted
    }

    pub fn is_moved(&self) -> bool {
        self.voice.lock().moved
    }

    pub fn is_reconnecting(&self) -> bool {
        self.voice.lock().reconnecting
    }

    /// Whether both the voice session id and a voice server are known.
    pub fn has_required_voice_data(&self) -> bool {
        let voice = self.voice.lock();

        voice.session_id.is_some() && voice.token.is_some() && voice.endpoint.is_some()
    }

    /// The voice credentials a node needs to connect to Discord.
    pub fn voice_update(&self) -> Result<VoiceUpdate> {
        let voice = self.voice.lock();

        match (&voice.token, &voice.endpoint, &voice.session_id) {
            (Some(token), Some(endpoint), Some(session_id)) => Ok(VoiceUpdate {
                token: token.clone(),
                endpoint: endpoint.clone(),
                session_id: session_id.clone(),
            }),
            _ => Err(Error::NoVoiceData),
        }
    }

    /// Joins a voice channel and waits until the node has the voice server.
    ///
    /// A second join for the same guild supersedes a pending one.
    pub async fn connect(&self, channel_id: u64, shard_id: u64, deaf: bool, mute: bool) -> Result<()> {
        let (sender, receiver) = oneshot::channel();

        {
            let mut voice = self.voice.lock();
            voice.state = ConnectionState::Connecting;
            voice.shard_id = shard_id;
            voice.deafened = deaf;
            voice.muted = mute;
        }

        *self.pending.lock() = Some(sender);
        self.send(VoiceStatePacket::new(self.guild_id, Some(channel_id), deaf, mute));

        let outcome = tokio::time::timeout(HANDSHAKE_TIMEOUT, receiver).await;
        self.clear_abandoned();

        let why: Error = match outcome {
            Ok(Ok(ConnectionUpdate::SessionReady)) => {
                self.voice.lock().state = ConnectionState::Connected;
                debug!("Voice connection for guild {} established", self.guild_id);

                return Ok(());
            },
            Ok(Ok(ConnectionUpdate::SessionIdMissing)) => HandshakeError::SessionIdMissing.into(),
            Ok(Ok(ConnectionUpdate::SessionEndpointMissing)) => HandshakeError::EndpointMissing.into(),
            Ok(Ok(ConnectionUpdate::SessionUpdateFailed(why))) => why,
            Ok(Err(_)) => HandshakeError::Superseded.into(),
            Err(_) => HandshakeError::Timeout(HANDSHAKE_TIMEOUT).into(),
        };

        self.abandon_handshake();

        Err(why)
    }

    /// Leaves the voice channel and detaches the player from its node.
    ///
    /// With `destroy_remote` the node is also told to destroy the player.
    pub async fn disconnect(&self, destroy_remote: bool) -> Result<()> {
        let player = match self.player() {
            Some(player) => player,
            None => return Ok(()),
        };

        let leave = {
            let mut voice = self.voice.lock();

            if voice.state == ConnectionState::Disconnected {
                false
            } else {
                voice.state = ConnectionState::Disconnecting;
                true
            }
        };

        if leave {
            self.send(VoiceStatePacket::new(self.guild_id, None, false, false));
        }

        let node = player.node();
        node.detach(&player);
        player.reset();
        self.voice.lock().state = ConnectionState::Disconnected;

        if destroy_remote {
            node.destroy_player(self.guild_id).await?;
        }

        Ok(())
    }

    pub fn set_deaf(&self, deaf: bool) {
        let (channel_id, mute) = {
            let mut voice = self.voice.lock();
            voice.deafened = deaf;

            (voice.channel_id, voice.muted)
        };

        self.send(VoiceStatePacket::new(self.guild_id, channel_id, deaf, mute));
    }

    pub fn set_mute(&self, mute: bool) {
        let (channel_id, deaf) = {
            let mut voice = self.voice.lock();
            voice.muted = mute;

            (voice.channel_id, voice.deafened)
        };

        self.send(VoiceStatePacket::new(self.guild_id, channel_id, deaf, mute));
    }

    /// Records the bot's own voice state from the gateway.
    pub(crate) fn set_state_update(
        &self,
        channel_id: Option<u64>,
        session_id: Option<String>,
        self_deaf: bool,
        self_mute: bool,
    ) {
        let mut voice = self.voice.lock();

        match channel_id {
            Some(channel_id) => {
                if voice.channel_id.map_or(false, |current| current != channel_id) {
                    voice.moved = true;
                }

                voice.channel_id = Some(channel_id);
            },
            None => voice.state = ConnectionState::Disconnected,
        }

        voice.deafened = self_deaf;
        voice.muted = self_mute;
        voice.session_id = session_id;
    }

    /// Records the voice server from the gateway and forwards it to the node.
    ///
    /// The outcome resolves a pending [`connect`]. When nobody is waiting, a
    /// failure goes to the node's error events instead.
    ///
    /// [`connect`]: #method.connect
    pub(crate) fn set_server_update(&self, token: String, endpoint: Option<String>) {
        let endpoint = match endpoint.filter(|endpoint| !endpoint.is_empty()) {
            Some(endpoint) => endpoint,
            None => {
                debug!("Voice server for guild {} is being reallocated", self.guild_id);
                let _ = self.resolve(ConnectionUpdate::SessionEndpointMissing);

                return;
            },
        };

        let update = {
            let mut voice = self.voice.lock();

            match voice.session_id.clone() {
                Some(session_id) => {
                    if let Some(region) = &voice.region {
                        if !endpoint.starts_with(region.as_str()) {
                            voice.moved = true;
                        }
                    }

                    voice.region = region_of(&endpoint);
                    voice.token = Some(token.clone());
                    voice.endpoint = Some(endpoint.clone());

                    Some(VoiceUpdate {
                        token,
                        endpoint,
                        session_id,
                    })
                },
                None => None,
            }
        };

        let update = match update {
            Some(update) => update,
            None => {
                let _ = self.resolve(ConnectionUpdate::SessionIdMissing);

                return;
            },
        };

        let player = match self.player() {
            Some(player) => player,
            None => return,
        };

        tokio::spawn(async move {
            let node = player.node();
            let update = UpdatePlayer {
                voice: Some(update),
                ..Default::default()
            };

            match node.apply(player.guild_id(), &update, false).await {
                Ok(()) => {
                    let _ = player.connection().resolve(ConnectionUpdate::SessionReady);
                },
                Err(why) => {
                    warn!("Failed to send voice update for guild {}: {}", player.guild_id(), why);

                    if let Err(ConnectionUpdate::SessionUpdateFailed(why)) =
                        player.connection().resolve(ConnectionUpdate::SessionUpdateFailed(why))
                    {
                        node.emit_error(why);
                    }
                },
            }
        });
    }

    pub(crate) fn set_reconnecting(&self, reconnecting: bool) {
        self.voice.lock().reconnecting = reconnecting;
    }

    pub(crate) fn mark_moved(&self) {
        self.voice.lock().moved = true;
    }

    /// Clears the move flag, returning whether it was set.
    pub(crate) fn take_moved(&self) -> bool {
        std::mem::replace(&mut self.voice.lock().moved, false)
    }

    /// Hands the outcome to the pending join, giving it back if nobody is
    /// waiting.
    fn resolve(&self, update: ConnectionUpdate) -> std::result::Result<(), ConnectionUpdate> {
        match self.pending.lock().take() {
            Some(sender) => sender.send(update),
            None => Err(update),
        }
    }

    fn clear_abandoned(&self) {
        let mut pending = self.pending.lock();

        if pending.as_ref().map_or(false, |sender| sender.is_closed()) {
            pending.take();
        }
    }

    /// Drops back to disconnected after a failed join, unless a newer join
    /// is still waiting.
    fn abandon_handshake(&self) {
        if self.pending.lock().is_some() {
            return;
        }

        let mut voice = self.voice.lock();

        if voice.state == ConnectionState::Connecting {
            voice.state = ConnectionState::Disconnected;
        }
    }

    fn send(&self, packet: VoiceStatePacket) {
        let shard_id = self.shard_id();

        match self.player() {
            Some(player) => player.node().forward(shard_id, packet, false),
            None => warn!("Player for guild {} dropped, voice state packet lost", self.guild_id),
        }
    }

    fn player(&self) -> Option<Player> {
        self.player.upgrade().map(Player::from_inner)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("guild_id", &self.guild_id)
            .field("voice", &*self.voice.lock())
            .finish()
    }
}

fn region_of(endpoint: &str) -> Option<String> {
    let label = endpoint.split('.').next()?;
    let region: String = label.chars().filter(|c| !c.is_ascii_digit()).collect();

    if region.is_empty() {
        None
    } else {
        Some(region)
    }
}
