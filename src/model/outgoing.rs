use serde::Serialize;
use super::{snowflake, Filters, UpdatePlayer};

/// A command sent over the WebSocket of a legacy (v3) node.
///
/// Current nodes take these as REST calls instead.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    Play {
        #[serde(with = "snowflake")]
        guild_id: u64,
        track: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<u16>,
        no_replace: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        pause: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Stop {
        #[serde(with = "snowflake")]
        guild_id: u64,
    },
    #[serde(rename_all = "camelCase")]
    Pause {
        #[serde(with = "snowflake")]
        guild_id: u64,
        pause: bool,
    },
    #[serde(rename_all = "camelCase")]
    Seek {
        #[serde(with = "snowflake")]
        guild_id: u64,
        position: u64,
    },
    #[serde(rename_all = "camelCase")]
    Volume {
        #[serde(with = "snowflake")]
        guild_id: u64,
        volume: u16,
    },
    #[serde(rename_all = "camelCase")]
    Filters {
        #[serde(with = "snowflake")]
        guild_id: u64,
        #[serde(flatten)]
        filters: Filters,
    },
    #[serde(rename_all = "camelCase")]
    VoiceUpdate {
        #[serde(with = "snowflake")]
        guild_id: u64,
        session_id: String,
        event: VoiceServerEvent,
    },
    #[serde(rename_all = "camelCase")]
    Destroy {
        #[serde(with = "snowflake")]
        guild_id: u64,
    },
    ConfigureResuming {
        key: String,
        timeout: u64,
    },
}

/// The raw voice server event a legacy node expects inside `voiceUpdate`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VoiceServerEvent {
    pub token: String,
    #[serde(with = "snowflake")]
    pub guild_id: u64,
    pub endpoint: String,
}

impl Command {
    /// Whether the command should jump ahead of anything already queued.
    pub fn is_important(&self) -> bool {
        matches!(self, Command::Stop { .. } | Command::Destroy { .. })
    }

    /// The guild the command targets, if any.
    pub fn guild_id(&self) -> Option<u64> {
        match self {
            Command::Play { guild_id, .. }
            | Command::Stop { guild_id }
            | Command::Pause { guild_id, .. }
            | Command::Seek { guild_id, .. }
            | Command::Volume { guild_id, .. }
            | Command::Filters { guild_id, .. }
            | Command::VoiceUpdate { guild_id, .. }
            | Command::Destroy { guild_id } => Some(*guild_id),
            Command::ConfigureResuming { .. } => None,
        }
    }

    /// Translates a partial player update into the equivalent legacy
    /// commands, in the order they have to be applied.
    pub fn from_update(guild_id: u64, update: &UpdatePlayer, no_replace: bool) -> Vec<Command> {
        let mut commands = Vec::new();

        if let Some(voice) = &update.voice {
            commands.push(Command::VoiceUpdate {
                guild_id,
                session_id: voice.session_id.clone(),
                event: VoiceServerEvent {
                    token: voice.token.clone(),
                    guild_id,
                    endpoint: voice.endpoint.clone(),
                },
            });
        }

        if let Some(filters) = &update.filters {
            commands.push(Command::Filters {
                guild_id,
                filters: filters.clone(),
            });
        }

        match &update.encoded_track {
            Some(Some(track)) => {
                commands.push(Command::Play {
                    guild_id,
                    track: track.clone(),
                    start_time: update.position,
                    end_time: update.end_time,
                    volume: update.volume,
                    no_replace,
                    pause: update.paused,
                });

                return commands;
            },
            Some(None) => commands.push(Command::Stop { guild_id }),
            None => {},
        }

        if let Some(pause) = update.paused {
            commands.push(Command::Pause { guild_id, pause });
        }

        if let Some(position) = update.position {
            commands.push(Command::Seek { guild_id, position });
        }

        if let Some(volume) = update.volume {
            commands.push(Command::Volume { guild_id, volume });
        }

        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VoiceUpdate;
    use serde_json::json;

    #[test]
    fn play_folds_player_options() {
        let update = UpdatePlayer {
            encoded_track: Some(Some("QAAA".to_owned())),
            position: Some(0),
            paused: Some(true),
            ..Default::default()
        };

        let commands = Command::from_update(5, &update, false);

        assert_eq!(commands.len(), 1);
        assert_eq!(
            serde_json::to_value(&commands[0]).unwrap(),
            json!({
                "op": "play",
                "guildId": "5",
                "track": "QAAA",
                "startTime": 0,
                "noReplace": false,
                "pause": true
            }),
        );
    }

    #[test]
    fn voice_and_filters_go_first() {
        let update = UpdatePlayer {
            voice: Some(VoiceUpdate {
                token: "token".to_owned(),
                endpoint: "rotterdam42.discord.media".to_owned(),
                session_id: "session".to_owned(),
            }),
            filters: Some(Filters {
                volume: Some(0.8),
                ..Default::default()
            }),
            volume: Some(30),
            ..Default::default()
        };

        let ops = Command::from_update(5, &update, false)
            .iter()
            .map(|command| serde_json::to_value(command).unwrap()["op"].clone())
            .collect::<Vec<_>>();

        assert_eq!(ops, vec![json!("voiceUpdate"), json!("filters"), json!("volume")]);
    }

    #[test]
    fn filters_are_flattened() {
        let command = Command::Filters {
            guild_id: 1,
            filters: Filters {
                karaoke: Some(None),
                ..Default::default()
            },
        };

        assert_eq!(
            serde_json::to_value(&command).unwrap(),
            json!({ "op": "filters", "guildId": "1", "karaoke": null }),
        );
    }

    #[test]
    fn stop_and_destroy_are_important() {
        assert!(Command::Stop { guild_id: 1 }.is_important());
        assert!(Command::Destroy { guild_id: 1 }.is_important());
        assert!(!Command::Seek { guild_id: 1, position: 3 }.is_important());
    }
}
