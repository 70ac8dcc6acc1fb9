use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;
use crate::Result;

/// Ordered buffer of serialized commands for a legacy node's WebSocket.
///
/// Commands are only flushed when one is added while the socket is open;
/// there is no background flush.
#[derive(Debug, Default)]
pub struct Queue {
    pending: Mutex<VecDeque<Queued>>,
}

#[derive(Debug)]
struct Queued {
    guild_id: Option<u64>,
    message: String,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes and enqueues a command, then flushes everything pending if
    /// `socket` is open.
    ///
    /// Important commands are put in front of everything already queued.
    pub fn add<T: Serialize>(
        &self,
        payload: &T,
        guild_id: Option<u64>,
        important: bool,
        socket: Option<&UnboundedSender<Message>>,
    ) -> Result<()> {
        let queued = Queued {
            guild_id,
            message: serde_json::to_string(payload)?,
        };

        {
            let mut pending = self.pending.lock();

            if important {
                pending.push_front(queued);
            } else {
                pending.push_back(queued);
            }
        }

        if let Some(socket) = socket {
            self.flush(socket);
        }

        Ok(())
    }

    /// Drops every pending command.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    /// Drops the pending commands of one guild.
    pub fn discard(&self, guild_id: u64) {
        self.pending
            .lock()
            .retain(|queued| queued.guild_id != Some(guild_id));
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn flush(&self, socket: &UnboundedSender<Message>) {
        let mut pending = self.pending.lock();

        while let Some(queued) = pending.pop_front() {
            trace!("Sending queued command: {}", queued.message);

            if let Err(why) = socket.send(Message::Text(queued.message)) {
                // The writer went away; keep the command for the next socket.
                if let Message::Text(message) = why.0 {
                    pending.push_front(Queued {
                        guild_id: queued.guild_id,
                        message,
                    });
                }

                debug!("Socket closed while flushing the command queue");

                return;
            }
        }
    }
}
