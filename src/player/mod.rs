//! Module containing the per-guild player and its voice connection.

mod connection;

pub use self::connection::{Connection, ConnectionState};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use crate::model::{
    Band,
    ChannelMix,
    Distortion,
    Filters,
    Karaoke,
    LowPass,
    Oscillation,
    PlayerUpdate,
    Rotation,
    Timescale,
    TrackEnd,
    TrackEvent,
    TrackException,
    TrackHandle,
    TrackStart,
    TrackStuck,
    UpdatePlayer,
    WebSocketClosed,
};
use crate::nodes::{Node, NodeSelector, State};
use crate::{Error, Result};

const EVENT_CAPACITY: usize = 64;

/// A light wrapper around a hashmap keyed by guild IDs with players.
#[derive(Clone, Debug, Default)]
pub struct PlayerManager {
    players: HashMap<u64, Player>,
}

impl PlayerManager {
    /// Creates a new default `PlayerManager`.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieves the player for the guild, if it exists.
    pub fn get(&self, guild_id: u64) -> Option<&Player> {
        self.players.get(&guild_id)
    }

    /// Whether the manager contains a player for the given guild.
    pub fn has(&self, guild_id: u64) -> bool {
        self.players.contains_key(&guild_id)
    }

    /// Stores a player under its guild, returning the one it replaced.
    pub fn insert(&mut self, player: Player) -> Option<Player> {
        self.players.insert(player.guild_id(), player)
    }

    pub fn remove(&mut self, guild_id: u64) -> Option<Player> {
        self.players.remove(&guild_id)
    }

    pub fn values(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }
}

/// Events of a single player.
#[derive(Clone, Debug)]
pub enum PlayerEvent {
    Start(TrackStart),
    End(TrackEnd),
    Stuck(TrackStuck),
    Exception(TrackException),
    /// The node's voice connection to Discord closed.
    Closed(WebSocketClosed),
    Update(PlayerUpdate),
    /// Playback was restored, after a move to another node.
    Resume,
}

/// Options of [`Player::play`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayOptions {
    /// Do not replace a track that is already playing.
    pub no_replace: bool,
    pub position: Option<u64>,
    pub end_time: Option<u64>,
    pub volume: Option<u16>,
    pub paused: Option<bool>,
    pub filters: Option<Filters>,
}

/// Overrides applied by [`Player::resume`]. Unset fields keep the cached
/// value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResumeOptions {
    pub no_replace: bool,
    pub position: Option<u64>,
    pub end_time: Option<u64>,
    pub volume: Option<u16>,
    pub paused: Option<bool>,
    pub filters: Option<Filters>,
}

#[derive(Clone, Debug)]
struct Playback {
    track: Option<TrackHandle>,
    paused: bool,
    /// The estimated position of the player, in milliseconds.
    position: u64,
    /// The volume setting, on a scale of 0 to 1000.
    volume: u16,
    ping: i64,
    filters: Filters,
}

impl Default for Playback {
    fn default() -> Self {
        Self {
            track: None,
            paused: false,
            position: 0,
            volume: 100,
            ping: -1,
            filters: Filters::default(),
        }
    }
}

/// The playback state of one guild on one node.
///
/// Every command is sent to the node first; the cached state only changes
/// once the node accepted it. Cloning is cheap and yields a handle to the
/// same player.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

pub(crate) struct PlayerInner {
    guild_id: u64,
    node: Mutex<Node>,
    playback: Mutex<Playback>,
    connection: Connection,
    events: broadcast::Sender<PlayerEvent>,
}

impl Player {
    pub(crate) fn new(node: Node, guild_id: u64, shard_id: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new_cyclic(|player| PlayerInner {
            guild_id,
            node: Mutex::new(node),
            playback: Mutex::new(Playback::default()),
            connection: Connection::new(player.clone(), guild_id, shard_id),
            events,
        });

        Self { inner }
    }

    fn from_inner(inner: Arc<PlayerInner>) -> Self {
        Self { inner }
    }

    /// The ID of the guild that the player represents.
    pub fn guild_id(&self) -> u64 {
        self.inner.guild_id
    }

    /// The node currently hosting the player.
    pub fn node(&self) -> Node {
        self.inner.node.lock().clone()
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    pub fn track(&self) -> Option<TrackHandle> {
        self.inner.playback.lock().track.clone()
    }

    pub fn paused(&self) -> bool {
        self.inner.playback.lock().paused
    }

    pub fn position(&self) -> u64 {
        self.inner.playback.lock().position
    }

    pub fn volume(&self) -> u16 {
        self.inner.playback.lock().volume
    }

    /// Round trip from the node to the Discord voice server, `-1` if not
    /// connected.
    pub fn ping(&self) -> i64 {
        self.inner.playback.lock().ping
    }

    pub fn filters(&self) -> Filters {
        self.inner.playback.lock().filters.clone()
    }

    /// Whether both handles point to the same player.
    pub fn ptr_eq(&self, other: &Player) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sends a message to Lavalink telling it to play a track with optional
    /// configuration settings.
    pub async fn play(&self, track: &str, options: PlayOptions) -> Result<()> {
        let update = UpdatePlayer {
            encoded_track: Some(Some(track.to_owned())),
            position: options.position,
            end_time: options.end_time,
            volume: options.volume,
            paused: options.paused,
            filters: options.filters,
            ..Default::default()
        };

        self.update(update, options.no_replace).await
    }

    /// Sends a message to Lavalink telling it to stop the player.
    pub async fn stop(&self) -> Result<()> {
        let update = UpdatePlayer {
            encoded_track: Some(None),
            ..Default::default()
        };
        self.update(update, false).await?;

        let mut playback = self.inner.playback.lock();
        playback.track = None;
        playback.position = 0;

        Ok(())
    }

    /// Sends a message to Lavalink telling it to either pause or unpause the
    /// player.
    pub async fn pause(&self, pause: bool) -> Result<()> {
        self.update(
            UpdatePlayer {
                paused: Some(pause),
                ..Default::default()
            },
            false,
        )
        .await
    }

    /// Sends a message to Lavalink telling it to seek the player to a certain
    /// position, in milliseconds.
    pub async fn seek(&self, position: u64) -> Result<()> {
        self.update(
            UpdatePlayer {
                position: Some(position),
                ..Default::default()
            },
            false,
        )
        .await
    }

    /// Sends a message to Lavalink telling it to mutate the volume setting.
    pub async fn set_volume(&self, volume: u16) -> Result<()> {
        self.update(
            UpdatePlayer {
                volume: Some(volume),
                ..Default::default()
            },
            false,
        )
        .await
    }

    pub async fn set_equalizer(&self, bands: Vec<Band>) -> Result<()> {
        self.merge_filters(Filters {
            equalizer: Some(bands),
            ..Default::default()
        })
        .await
    }

    /// Sets or, with `None`, clears the karaoke filter.
    pub async fn set_karaoke(&self, karaoke: Option<Karaoke>) -> Result<()> {
        self.merge_filters(Filters {
            karaoke: Some(karaoke),
            ..Default::default()
        })
        .await
    }

    pub async fn set_timescale(&self, timescale: Option<Timescale>) -> Result<()> {
        self.merge_filters(Filters {
            timescale: Some(timescale),
            ..Default::default()
        })
        .await
    }

    pub async fn set_tremolo(&self, tremolo: Option<Oscillation>) -> Result<()> {
        self.merge_filters(Filters {
            tremolo: Some(tremolo),
            ..Default::default()
        })
        .await
    }

    pub async fn set_vibrato(&self, vibrato: Option<Oscillation>) -> Result<()> {
        self.merge_filters(Filters {
            vibrato: Some(vibrato),
            ..Default::default()
        })
        .await
    }

    pub async fn set_rotation(&self, rotation: Option<Rotation>) -> Result<()> {
        self.merge_filters(Filters {
            rotation: Some(rotation),
            ..Default::default()
        })
        .await
    }

    pub async fn set_distortion(&self, distortion: Option<Distortion>) -> Result<()> {
        self.merge_filters(Filters {
            distortion: Some(distortion),
            ..Default::default()
        })
        .await
    }

    pub async fn set_channel_mix(&self, channel_mix: Option<ChannelMix>) -> Result<()> {
        self.merge_filters(Filters {
            channel_mix: Some(channel_mix),
            ..Default::default()
        })
        .await
    }

    pub async fn set_low_pass(&self, low_pass: Option<LowPass>) -> Result<()> {
        self.merge_filters(Filters {
            low_pass: Some(low_pass),
            ..Default::default()
        })
        .await
    }

    /// Replaces the whole filter set.
    pub async fn set_filters(&self, filters: Filters) -> Result<()> {
        self.update(
            UpdatePlayer {
                filters: Some(filters),
                ..Default::default()
            },
            false,
        )
        .await
    }

    /// Resets every filter on the node.
    pub async fn clear_filters(&self) -> Result<()> {
        self.set_filters(Filters::cleared()).await
    }

    /// Sends a partial update to the node and caches what it accepted.
    pub async fn update(&self, update: UpdatePlayer, no_replace: bool) -> Result<()> {
        let node = self.node();
        node.apply(self.guild_id(), &update, no_replace).await?;

        let mut playback = self.inner.playback.lock();

        if let Some(position) = update.position {
            playback.position = position;
        }

        if let Some(paused) = update.paused {
            playback.paused = paused;
        }

        if let Some(volume) = update.volume {
            playback.volume = volume;
        }

        if let Some(filters) = update.filters {
            playback.filters = filters;
        }

        Ok(())
    }

    /// Replays the cached state on the current node.
    ///
    /// Does nothing without a current track.
    pub async fn resume(&self, options: ResumeOptions) -> Result<()> {
        let playback = self.inner.playback.lock().clone();

        let track = match playback.track {
            Some(track) => track,
            None => return Ok(()),
        };

        let update = UpdatePlayer {
            encoded_track: Some(Some(track.encoded().to_owned())),
            position: Some(options.position.unwrap_or(playback.position)),
            end_time: options.end_time,
            volume: Some(options.volume.unwrap_or(playback.volume)),
            paused: Some(options.paused.unwrap_or(playback.paused)),
            filters: Some(options.filters.unwrap_or(playback.filters)),
            voice: self.connection().voice_update().ok(),
            ..Default::default()
        };

        self.update(update, options.no_replace).await?;
        self.emit(PlayerEvent::Resume);

        Ok(())
    }

    /// Moves the player to the best connected node of its group, or of the
    /// whole pool if its node has no group.
    ///
    /// Without any candidate node the player leaves its voice channel.
    pub async fn relocate(&self) -> Result<()> {
        let current = self.node();
        let manager = current.manager().ok_or(Error::NoNodes)?;

        let selector = match current.group() {
            Some(group) => NodeSelector::Group(vec![group.to_owned()]),
            None => NodeSelector::Auto,
        };

        let target = match manager.get_node(selector) {
            Ok(node) => node,
            Err(Error::NotFound) => {
                debug!("No node to move player {} to", self.guild_id());

                return self.connection().disconnect(true).await;
            },
            Err(why) => return Err(why),
        };

        if target.ptr_eq(&current) {
            return Ok(());
        }

        if target.state() != State::Connected {
            return Err(Error::NodeNotReady(target.name().to_owned()));
        }

        self.connection().set_reconnecting(true);
        let moved = self.transfer(&current, &target).await;
        self.connection().set_reconnecting(false);

        if let Err(why) = moved {
            if let Err(err) = self.connection().disconnect(false).await {
                debug!("Error dropping player {}: {}", self.guild_id(), err);
            }

            return Err(why);
        }

        info!("Moved player {} from {} to {}", self.guild_id(), current.name(), target.name());

        Ok(())
    }

    async fn transfer(&self, from: &Node, to: &Node) -> Result<()> {
        if let Err(why) = from.destroy_player(self.guild_id()).await {
            debug!("Could not destroy player {} on {}: {}", self.guild_id(), from.name(), why);
        }

        from.detach(self);
        *self.inner.node.lock() = to.clone();
        to.attach(self.clone());

        self.connection().mark_moved();

        self.resume(ResumeOptions::default()).await
    }

    async fn merge_filters(&self, filters: Filters) -> Result<()> {
        let merged = self.filters().merged(&filters);

        self.set_filters(merged).await
    }

    pub(crate) fn handle_event(&self, event: TrackEvent) {
        let event = match event {
            TrackEvent::Start(start) => {
                self.inner.playback.lock().track = Some(start.track.clone());

                PlayerEvent::Start(start)
            },
            TrackEvent::End(end) => PlayerEvent::End(end),
            TrackEvent::Stuck(stuck) => PlayerEvent::Stuck(stuck),
            TrackEvent::Exception(exception) => PlayerEvent::Exception(exception),
            TrackEvent::WebSocketClosed(closed) => {
                let connection = self.connection();

                if connection.is_reconnecting() || connection.take_moved() {
                    debug!("Suppressed voice close {} for player {}", closed.code, self.guild_id());

                    return;
                }

                PlayerEvent::Closed(closed)
            },
        };

        self.emit(event);
    }

    pub(crate) fn handle_update(&self, update: PlayerUpdate) {
        {
            let mut playback = self.inner.playback.lock();
            playback.position = update.state.position;
            playback.ping = update.state.ping;
        }

        self.emit(PlayerEvent::Update(update));
    }

    /// Forgets the playback state, keeping volume.
    pub(crate) fn reset(&self) {
        let mut playback = self.inner.playback.lock();
        playback.track = None;
        playback.position = 0;
        playback.filters = Filters::default();
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.inner.events.send(event);
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("guild_id", &self.inner.guild_id)
            .field("node", &self.node().name())
            .field("playback", &*self.inner.playback.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_handler::ChannelHandler;
    use crate::nodes::{NodeConfig, NodeEvent, NodeManager, Options};
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(options: Options) -> NodeManager {
        let (handler, _receiver) = ChannelHandler::new(1);

        NodeManager::new(handler, options)
    }

    fn ready_node(manager: &NodeManager, name: &str, host: String) -> Node {
        let node = manager.insert_detached(NodeConfig::new(name, host, "pw"));
        node.force_ready("s");

        node
    }

    fn player_on(node: &Node, guild_id: u64) -> Player {
        let player = Player::new(node.clone(), guild_id, 0);
        node.attach(player.clone());

        player
    }

    fn track_start(guild_id: u64, encoded: &str) -> TrackEvent {
        TrackEvent::Start(TrackStart {
            guild_id,
            track: TrackHandle::Encoded(encoded.to_owned()),
        })
    }

    fn closed(guild_id: u64) -> TrackEvent {
        TrackEvent::WebSocketClosed(WebSocketClosed {
            guild_id,
            code: 4006,
            reason: "Session is no longer valid.".to_owned(),
            by_remote: true,
        })
    }

    #[tokio::test]
    async fn volume_zero_is_sent_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v4/sessions/s/players/5"))
            .and(body_json(json!({ "volume": 0 })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(Options::default());
        let node = ready_node(&manager, "a", server.address().to_string());
        let player = player_on(&node, 5);

        player.set_volume(0).await.unwrap();

        assert_eq!(player.volume(), 0);
    }

    #[tokio::test]
    async fn play_sends_track_and_options() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v4/sessions/s/players/5"))
            .and(query_param("noReplace", "true"))
            .and(body_json(json!({ "encodedTrack": "QAAA", "position": 0, "paused": true })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(Options::default());
        let node = ready_node(&manager, "a", server.address().to_string());
        let player = player_on(&node, 5);

        let options = PlayOptions {
            no_replace: true,
            position: Some(0),
            paused: Some(true),
            ..Default::default()
        };
        player.play("QAAA", options).await.unwrap();

        assert!(player.paused());
        assert_eq!(player.position(), 0);
    }

    #[tokio::test]
    async fn rejected_update_leaves_cache_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "message": "bad" })))
            .mount(&server)
            .await;

        let manager = manager(Options::default());
        let node = ready_node(&manager, "a", server.address().to_string());
        let player = player_on(&node, 5);

        assert!(player.pause(true).await.is_err());
        assert!(!player.paused());
        assert_eq!(player.volume(), 100);
    }

    #[tokio::test]
    async fn filter_setters_send_the_merged_set() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(body_json(json!({ "filters": { "karaoke": { "level": 1.0 } } })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(body_json(json!({
                "filters": {
                    "karaoke": { "level": 1.0 },
                    "timescale": null
                }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(Options::default());
        let node = ready_node(&manager, "a", server.address().to_string());
        let player = player_on(&node, 5);

        let karaoke = Karaoke {
            level: Some(1.0),
            ..Default::default()
        };
        player.set_karaoke(Some(karaoke)).await.unwrap();
        player.set_timescale(None).await.unwrap();

        let filters = player.filters();
        assert_eq!(filters.karaoke, Some(Some(karaoke)));
        assert_eq!(filters.timescale, Some(None));
    }

    #[test]
    fn moved_close_is_swallowed_once() {
        let manager = manager(Options::default());
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));
        let player = player_on(&node, 5);
        let mut events = player.subscribe();

        player.connection().mark_moved();
        player.handle_event(closed(5));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        player.handle_event(closed(5));
        assert!(matches!(events.try_recv(), Ok(PlayerEvent::Closed(_))));
    }

    #[test]
    fn close_is_suppressed_while_reconnecting() {
        let manager = manager(Options::default());
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));
        let player = player_on(&node, 5);
        let mut events = player.subscribe();

        player.connection().mark_moved();
        player.connection().set_reconnecting(true);
        player.handle_event(closed(5));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        // The move flag survives a suppressed close.
        player.connection().set_reconnecting(false);
        player.handle_event(closed(5));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn events_update_the_cache() {
        let manager = manager(Options::default());
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));
        let player = player_on(&node, 5);
        let mut events = player.subscribe();

        node.handle_message(&json!({
            "op": "playerUpdate",
            "guildId": "5",
            "state": { "time": 1, "position": 3000, "connected": true, "ping": 20 }
        }).to_string());
        player.handle_event(track_start(5, "QAAA"));

        assert_eq!(player.position(), 3000);
        assert_eq!(player.ping(), 20);
        assert_eq!(player.track().map(|track| track.encoded().to_owned()).as_deref(), Some("QAAA"));
        assert!(matches!(events.try_recv(), Ok(PlayerEvent::Update(_))));
        assert!(matches!(events.try_recv(), Ok(PlayerEvent::Start(_))));
    }

    #[tokio::test]
    async fn resume_without_track_does_nothing() {
        let manager = manager(Options::default());
        let node = manager.insert_detached(NodeConfig::new("a", "127.0.0.1:1", "pw"));
        let player = player_on(&node, 5);
        let mut events = player.subscribe();

        player.resume(ResumeOptions::default()).await.unwrap();

        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn failover_reports_each_failed_move() {
        let target = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v4/sessions/s/players/2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&target)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&target)
            .await;

        let manager = manager(Options {
            move_on_disconnect: true,
            ..Default::default()
        });
        let mut events = manager.subscribe();
        let failing = ready_node(&manager, "failing", "127.0.0.1:1".to_owned());
        let healthy = ready_node(&manager, "healthy", target.address().to_string());

        let players: Vec<Player> = (1..=3).map(|guild_id| player_on(&failing, guild_id)).collect();
        for player in &players {
            player.handle_event(track_start(player.guild_id(), "QAAA"));
        }

        failing.disconnect(1000, "going away").await;

        match events.recv().await.unwrap() {
            NodeEvent::Error { node, .. } => assert_eq!(node, "failing"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(events.recv().await.unwrap(), NodeEvent::Disconnect { .. }));
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        assert!(failing.is_destroyed());
        assert!(failing.players().is_empty());
        assert_eq!(manager.nodes().len(), 1);

        let moved: Vec<u64> = {
            let mut moved: Vec<u64> = healthy.players().iter().map(Player::guild_id).collect();
            moved.sort_unstable();
            moved
        };
        assert_eq!(moved, vec![1, 3]);
        assert!(players[0].node().ptr_eq(&healthy));
        assert!(players[1].track().is_none());

        // The move absorbs exactly one voice close.
        let mut player_events = players[0].subscribe();
        players[0].handle_event(closed(1));
        assert!(matches!(player_events.try_recv(), Err(TryRecvError::Empty)));
        players[0].handle_event(closed(1));
        assert!(matches!(player_events.try_recv(), Ok(PlayerEvent::Closed(_))));
    }

    #[tokio::test]
    async fn failover_without_candidates_drops_players() {
        let manager = manager(Options::default());
        let node = ready_node(&manager, "only", "127.0.0.1:1".to_owned());
        let player = player_on(&node, 4);
        player.handle_event(track_start(4, "QAAA"));

        node.disconnect(1000, "bye").await;

        assert!(node.players().is_empty());
        assert!(player.track().is_none());
        assert_eq!(player.connection().state(), ConnectionState::Disconnected);
    }
}
