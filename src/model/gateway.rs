use serde::{Deserialize, Serialize};
use serde_json::Value;
use super::snowflake;

/// Gateway opcode of an outbound voice state update.
pub const VOICE_STATE_UPDATE_OP: u8 = 4;

/// An outbound voice state update, ready to be written to a gateway shard.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VoiceStatePacket {
    pub op: u8,
    pub d: VoiceStateData,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VoiceStateData {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    /// The channel to join, or `None` to leave.
    #[serde(with = "snowflake::option")]
    pub channel_id: Option<u64>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl VoiceStatePacket {
    pub fn new(guild_id: u64, channel_id: Option<u64>, self_deaf: bool, self_mute: bool) -> Self {
        Self {
            op: VOICE_STATE_UPDATE_OP,
            d: VoiceStateData {
                guild_id,
                channel_id,
                self_mute,
                self_deaf,
            },
        }
    }
}

/// Payload of a `VOICE_STATE_UPDATE` dispatch.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VoiceStateUpdate {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    #[serde(default, with = "snowflake::option")]
    pub channel_id: Option<u64>,
    #[serde(with = "snowflake")]
    pub user_id: u64,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub self_deaf: bool,
    #[serde(default)]
    pub self_mute: bool,
}

/// Payload of a `VOICE_SERVER_UPDATE` dispatch.
///
/// A missing endpoint means the voice server is being reallocated.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VoiceServerUpdate {
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub token: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// The only gateway dispatches the client acts on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VoiceGatewayEvent {
    StateUpdate(VoiceStateUpdate),
    ServerUpdate(VoiceServerUpdate),
}

impl VoiceGatewayEvent {
    /// Extracts a voice event from a raw gateway packet.
    ///
    /// Returns `Ok(None)` for every other dispatch type.
    pub fn from_packet(packet: &Value) -> serde_json::Result<Option<Self>> {
        let data = match packet.get("d") {
            Some(data) => data,
            None => return Ok(None),
        };

        match packet.get("t").and_then(Value::as_str) {
            Some("VOICE_STATE_UPDATE") => VoiceStateUpdate::deserialize(data)
                .map(|update| Some(VoiceGatewayEvent::StateUpdate(update))),
            Some("VOICE_SERVER_UPDATE") => VoiceServerUpdate::deserialize(data)
                .map(|update| Some(VoiceGatewayEvent::ServerUpdate(update))),
            _ => Ok(None),
        }
    }

    pub fn guild_id(&self) -> u64 {
        match self {
            VoiceGatewayEvent::StateUpdate(update) => update.guild_id,
            VoiceGatewayEvent::ServerUpdate(update) => update.guild_id,
        }
    }
}
