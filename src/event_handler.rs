//! The bridge between the client and a Discord gateway implementation.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use crate::model::VoiceStatePacket;

/// Implemented by the gateway side of the bot.
///
/// The client never talks to Discord itself: it asks the handler for the
/// bot's user id and hands it voice state packets to write to a shard. Raw
/// gateway packets flow the other way, through
/// [`NodeManager::handle_raw`].
///
/// [`NodeManager::handle_raw`]: ../nodes/struct.NodeManager.html#method.handle_raw
pub trait EventHandler: Send + Sync + 'static {
    /// The id of the bot user, once the gateway has identified.
    fn user_id(&self) -> Option<u64>;

    /// Tymethod called for forwarding a voice state packet to Discord over
    /// the given shard.
    ///
    /// `important` packets should skip any outbound rate limit queue of the
    /// shard.
    fn forward(&self, shard_id: u64, packet: VoiceStatePacket, important: bool);
}

/// A packet handed to a [`ChannelHandler`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForwardedPacket {
    pub shard_id: u64,
    pub packet: VoiceStatePacket,
    pub important: bool,
}

/// An [`EventHandler`] which queues packets on a channel, for gateways that
/// run their own shard tasks.
#[derive(Clone, Debug)]
pub struct ChannelHandler {
    user_id: u64,
    sender: UnboundedSender<ForwardedPacket>,
}

impl ChannelHandler {
    /// Creates a handler for the given bot user, returning the receiving end
    /// the gateway should drain.
    pub fn new(user_id: u64) -> (Self, UnboundedReceiver<ForwardedPacket>) {
        let (sender, receiver) = mpsc::unbounded_channel();

        (Self { user_id, sender }, receiver)
    }
}

impl EventHandler for ChannelHandler {
    fn user_id(&self) -> Option<u64> {
        Some(self.user_id)
    }

    fn forward(&self, shard_id: u64, packet: VoiceStatePacket, important: bool) {
        let forwarded = ForwardedPacket {
            shard_id,
            packet,
            important,
        };

        if self.sender.send(forwarded).is_err() {
            warn!("Gateway receiver dropped, voice state packet lost");
        }
    }
}

/// An [`EventHandler`] backed by closures, for gateways exposing a direct
/// send method on their shards.
pub struct FnHandler<U, F> {
    user_id: U,
    forward: F,
}

impl<U, F> FnHandler<U, F>
where
    U: Fn() -> Option<u64> + Send + Sync + 'static,
    F: Fn(u64, VoiceStatePacket, bool) + Send + Sync + 'static,
{
    pub fn new(user_id: U, forward: F) -> Self {
        Self { user_id, forward }
    }
}

impl<U, F> EventHandler for FnHandler<U, F>
where
    U: Fn() -> Option<u64> + Send + Sync + 'static,
    F: Fn(u64, VoiceStatePacket, bool) + Send + Sync + 'static,
{
    fn user_id(&self) -> Option<u64> {
        (self.user_id)()
    }

    fn forward(&self, shard_id: u64, packet: VoiceStatePacket, important: bool) {
        (self.forward)(shard_id, packet, important)
    }
}
