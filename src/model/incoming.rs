use serde::{Deserialize, Serialize};
use super::{snowflake, RemoteStats, TrackHandle};

/// A message received over a node's WebSocket.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Incoming {
    Ready(Ready),
    Stats(RemoteStats),
    Event(TrackEvent),
    PlayerUpdate(PlayerUpdate),
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    /// Whether the node restored a previous session.
    #[serde(default)]
    pub resumed: bool,
    pub session_id: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub state: PlayerUpdateState,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PlayerUpdateState {
    /// Unix timestamp of the update in milliseconds.
    pub time: u64,
    /// Position of the track in milliseconds.
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub connected: bool,
    /// Round trip to the Discord voice server, `-1` when not connected.
    #[serde(default = "no_ping")]
    pub ping: i64,
}

fn no_ping() -> i64 {
    -1
}

/// A playback event emitted by a node for one guild.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum TrackEvent {
    #[serde(rename = "TrackStartEvent")]
    Start(TrackStart),
    #[serde(rename = "TrackEndEvent")]
    End(TrackEnd),
    #[serde(rename = "TrackExceptionEvent")]
    Exception(TrackException),
    #[serde(rename = "TrackStuckEvent")]
    Stuck(TrackStuck),
    #[serde(rename = "WebSocketClosedEvent")]
    WebSocketClosed(WebSocketClosed),
}

impl TrackEvent {
    pub fn guild_id(&self) -> u64 {
        match self {
            TrackEvent::Start(event) => event.guild_id,
            TrackEvent::End(event) => event.guild_id,
            TrackEvent::Exception(event) => event.guild_id,
            TrackEvent::Stuck(event) => event.guild_id,
            TrackEvent::WebSocketClosed(event) => event.guild_id,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStart {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: TrackHandle,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEnd {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: TrackHandle,
    /// Why the track ended, e.g. `finished` or `replaced`.
    pub reason: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: TrackHandle,
    pub exception: Exception,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Exception {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: String,
    #[serde(default)]
    pub cause: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStuck {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub track: TrackHandle,
    pub threshold_ms: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosed {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub code: u16,
    pub reason: String,
    pub by_remote: bool,
}
