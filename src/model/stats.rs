use serde::{Deserialize, Serialize};

/// Load statistics periodically reported by a node.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStats {
    pub players: u32,
    pub playing_players: u32,
    /// Uptime in milliseconds.
    pub uptime: u64,
    pub memory: Memory,
    pub cpu: Cpu,
    /// Missing until the node has been sending audio for a minute.
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

impl RemoteStats {
    /// The load penalty of the node these stats belong to. Lower is better.
    ///
    /// CPU load weighs in exponentially, so a node close to saturation is
    /// avoided even when it hosts few players.
    pub fn penalty(&self) -> i64 {
        let cpu = (1.05f64.powf(100.0 * self.cpu.system_load) * 10.0 - 10.0).round() as i64;
        let mut penalty = i64::from(self.players) + cpu;

        if let Some(frames) = &self.frame_stats {
            penalty += frames.deficit;
            penalty += frames.nulled * 2;
        }

        penalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(players: u32, system_load: f64, frame_stats: Option<FrameStats>) -> RemoteStats {
        RemoteStats {
            players,
            cpu: Cpu {
                system_load,
                ..Default::default()
            },
            frame_stats,
            ..Default::default()
        }
    }

    #[test]
    fn penalty_rounds_cpu_component() {
        let stats = stats(5, 0.5, Some(FrameStats { sent: 0, nulled: 1, deficit: 2 }));

        // 1.05^50 * 10 - 10 = 104.67..., which rounds up.
        assert_eq!(stats.penalty(), 5 + 105 + 2 + 2);
    }

    #[test]
    fn idle_node_is_penalised_by_players_only() {
        assert_eq!(stats(7, 0.0, None).penalty(), 7);
        assert_eq!(stats(0, 0.0, None).penalty(), 0);
    }

    #[test]
    fn parses_node_payload() {
        let stats: RemoteStats = serde_json::from_str(r#"{
            "op": "stats",
            "players": 1,
            "playingPlayers": 1,
            "uptime": 123456789,
            "memory": { "free": 1, "used": 2, "allocated": 3, "reservable": 4 },
            "cpu": { "cores": 4, "systemLoad": 0.1, "lavalinkLoad": 0.05 },
            "frameStats": { "sent": 6000, "nulled": 10, "deficit": -3010 }
        }"#).unwrap();

        assert_eq!(stats.cpu.cores, 4);
        assert_eq!(stats.frame_stats.map(|f| f.deficit), Some(-3010));
    }
}
