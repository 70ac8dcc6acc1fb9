//! Wire types exchanged with Lavalink nodes and the Discord gateway.
//!
//! Everything here is plain serde data. The REST and WebSocket halves of a
//! node, as well as the gateway bridge, build on these types.

mod filters;
mod gateway;
mod incoming;
mod outgoing;
mod stats;

pub use self::filters::*;
pub use self::gateway::*;
pub use self::incoming::*;
pub use self::outgoing::*;
pub use self::stats::*;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A track as described by a node.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// The base64 encoded track, used to play it.
    pub encoded: String,
    pub info: TrackInfo,
    #[serde(default)]
    pub plugin_info: Value,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Length of the track in milliseconds.
    pub length: u64,
    pub is_stream: bool,
    /// Starting position of the track in milliseconds.
    pub position: u64,
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    pub source_name: String,
}

/// The track referenced by a player event.
///
/// Current nodes send the full track object while legacy nodes only send the
/// encoded string.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrackHandle {
    Full(Box<Track>),
    Encoded(String),
}

impl TrackHandle {
    /// The encoded form of the track, which can be handed back to a node.
    pub fn encoded(&self) -> &str {
        match self {
            TrackHandle::Full(track) => &track.encoded,
            TrackHandle::Encoded(encoded) => encoded,
        }
    }
}

impl From<Track> for TrackHandle {
    fn from(track: Track) -> Self {
        TrackHandle::Full(Box::new(track))
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    Track,
    Playlist,
    Search,
    Empty,
    Error,
}

/// Response of the `loadtracks` endpoint.
///
/// The shape of `data` depends on the load type, so it is left untyped.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub load_type: LoadType,
    #[serde(default)]
    pub data: Value,
}

/// Voice connection details of a remote player.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
    #[serde(default)]
    pub connected: Option<bool>,
    #[serde(default)]
    pub ping: Option<i64>,
}

/// The voice triple a node needs to open a voice connection.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceUpdate {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// A player as reported by a node's REST API.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    #[serde(default)]
    pub track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    pub voice: VoiceState,
    #[serde(default)]
    pub filters: Filters,
}

/// Partial player options sent to a node.
///
/// Every field left as `None` is omitted from the payload. `encoded_track`
/// is doubly optional: `Some(None)` serializes as `null`, which stops the
/// current track.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayer {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable"
    )]
    pub encoded_track: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceUpdate>,
}

impl UpdatePlayer {
    /// Whether the update carries no field at all.
    pub fn is_empty(&self) -> bool {
        *self == UpdatePlayer::default()
    }
}

/// Body of the session update endpoint.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub resuming: bool,
    /// Seconds the node keeps the session alive after a disconnect.
    pub timeout: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlanner {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub details: Option<RoutePlannerDetails>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlannerDetails {
    pub ip_block: IpBlock,
    #[serde(default)]
    pub failing_addresses: Vec<FailingAddress>,
    #[serde(default)]
    pub rotate_index: Option<String>,
    #[serde(default)]
    pub ip_index: Option<String>,
    #[serde(default)]
    pub current_address: Option<String>,
    #[serde(default)]
    pub block_index: Option<String>,
    #[serde(default)]
    pub current_address_index: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IpBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub size: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailingAddress {
    pub address: String,
    pub failing_timestamp: i64,
    pub failing_time: String,
}

/// Deserializes a present `null` as `Some(None)`, keeping it apart from an
/// absent field.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Discord ids travel as strings, but some emitters use plain integers.
pub(crate) mod snowflake {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    impl Raw {
        fn into_id<E: serde::de::Error>(self) -> Result<u64, E> {
            match self {
                Raw::Int(id) => Ok(id),
                Raw::Str(id) => id.parse().map_err(E::custom),
            }
        }
    }

    pub fn serialize<S: Serializer>(id: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        Raw::deserialize(deserializer)?.into_id()
    }

    pub mod option {
        use super::Raw;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(id: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) => serializer.collect_str(id),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
            Option::<Raw>::deserialize(deserializer)?
                .map(Raw::into_id)
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stop_update_serializes_null_track() {
        let update = UpdatePlayer {
            encoded_track: Some(None),
            ..Default::default()
        };

        assert_eq!(serde_json::to_value(&update).unwrap(), json!({ "encodedTrack": null }));
    }

    #[test]
    fn zero_values_are_kept_in_updates() {
        let update = UpdatePlayer {
            position: Some(0),
            volume: Some(0),
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({ "position": 0, "volume": 0 }),
        );
        assert!(!update.is_empty());
        assert!(UpdatePlayer::default().is_empty());
    }

    #[test]
    fn track_handle_accepts_both_shapes() {
        let encoded: TrackHandle = serde_json::from_value(json!("QAAA")).unwrap();
        assert_eq!(encoded.encoded(), "QAAA");

        let full: TrackHandle = serde_json::from_value(json!({
            "encoded": "QAAB",
            "info": {
                "identifier": "abc",
                "isSeekable": true,
                "author": "someone",
                "length": 1000,
                "isStream": false,
                "position": 0,
                "title": "a song",
                "sourceName": "youtube"
            }
        }))
        .unwrap();
        assert_eq!(full.encoded(), "QAAB");
    }

    #[test]
    fn player_info_parses_string_guild_id() {
        let info: PlayerInfo = serde_json::from_value(json!({
            "guildId": "81384788765712384",
            "volume": 100,
            "paused": false,
            "voice": { "token": "t", "endpoint": "e", "sessionId": "s" }
        }))
        .unwrap();

        assert_eq!(info.guild_id, 81384788765712384);
        assert!(info.track.is_none());
    }
}
