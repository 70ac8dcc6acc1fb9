use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use super::{JoinOptions, Node, NodeConfig, NodeEvent, NodeSelector, Options, State};
use crate::model::{VoiceGatewayEvent, VoiceStatePacket};
use crate::player::Player;
use crate::{Error, EventHandler, Result};

/// Capacity of the node event channel. Slow subscribers lag behind and miss
/// the oldest events.
const EVENT_CAPACITY: usize = 256;

/// A pool of Lavalink nodes sharing one gateway handler.
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct NodeManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    handler: Box<dyn EventHandler>,
    options: Arc<Options>,
    user_id: Mutex<Option<u64>>,
    /// Registered nodes, in insertion order.
    nodes: Mutex<Vec<Node>>,
    events: broadcast::Sender<NodeEvent>,
}

/// A handle which does not keep the manager alive.
#[derive(Clone)]
pub(crate) struct WeakManager(Weak<ManagerInner>);

impl WeakManager {
    pub(crate) fn upgrade(&self) -> Option<NodeManager> {
        self.0.upgrade().map(|inner| NodeManager { inner })
    }
}

impl NodeManager {
    pub fn new(handler: impl EventHandler, options: Options) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(ManagerInner {
                handler: Box::new(handler),
                options: Arc::new(options),
                user_id: Mutex::new(None),
                nodes: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    /// Receives the lifecycle events of every node in the pool.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// The bot user id, once known.
    pub fn user_id(&self) -> Option<u64> {
        let known = *self.inner.user_id.lock();

        known.or_else(|| self.inner.handler.user_id())
    }

    /// Records the bot user id from the handler and connects the given
    /// nodes.
    ///
    /// Call this once the gateway has identified.
    pub fn ready(&self, configs: impl IntoIterator<Item = NodeConfig>) -> Result<()> {
        let user_id = self.inner.handler.user_id().ok_or(Error::ClientNotReady)?;
        *self.inner.user_id.lock() = Some(user_id);

        debug!("Client ready as user {}", user_id);

        for config in configs {
            self.add_node(config)?;
        }

        Ok(())
    }

    /// Registers a node and starts connecting to it.
    pub fn add_node(&self, config: NodeConfig) -> Result<Node> {
        let node = {
            let mut nodes = self.inner.nodes.lock();

            if nodes.iter().any(|node| node.name() == config.name) {
                return Err(Error::DuplicateNode(config.name));
            }

            let node = Node::new(
                config,
                Arc::clone(&self.inner.options),
                self.downgrade(),
                self.inner.events.clone(),
            )?;
            nodes.push(node.clone());

            node
        };

        if let Err(why) = node.connect() {
            trace!("Err adding node {}: {:?}", node.name(), why);
            self.inner.nodes.lock().retain(|other| !other.ptr_eq(&node));

            return Err(why);
        }

        Ok(node)
    }

    /// Gracefully disconnects a node and removes it from the pool.
    pub async fn remove_node(&self, name: &str, reason: &str) -> Result<()> {
        let node = self
            .node(name)
            .ok_or_else(|| Error::UnknownNode(name.to_owned()))?;

        node.disconnect(1000, reason).await;

        Ok(())
    }

    /// Disconnects every node.
    pub async fn close(&self) {
        for node in self.nodes() {
            node.disconnect(1000, "client closed").await;
        }
    }

    /// A registered node by name, whatever its state.
    pub fn node(&self, name: &str) -> Option<Node> {
        self.inner
            .nodes
            .lock()
            .iter()
            .find(|node| node.name() == name)
            .cloned()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.inner.nodes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.lock().is_empty()
    }

    /// Picks a node for the selector.
    ///
    /// `Auto` and `Group` pick the connected node with the lowest penalty,
    /// the first registered one winning ties.
    pub fn get_node(&self, selector: impl Into<NodeSelector>) -> Result<Node> {
        let nodes = self.inner.nodes.lock();

        if nodes.is_empty() {
            return Err(Error::NoNodes);
        }

        let connected = nodes.iter().filter(|node| node.state() == State::Connected);

        match selector.into() {
            NodeSelector::Auto => ideal(connected),
            NodeSelector::Group(groups) => ideal(connected.filter(|node| {
                node.group()
                    .map_or(false, |group| groups.iter().any(|wanted| wanted == group))
            })),
            NodeSelector::Name(name) => {
                let node = nodes
                    .iter()
                    .find(|node| node.name() == name)
                    .ok_or(Error::UnknownNode(name))?;

                if node.state() != State::Connected {
                    return Err(Error::NodeNotReady(node.name().to_owned()));
                }

                Ok(node.clone())
            },
        }
    }

    /// Joins a voice channel on a node picked by the selector.
    pub async fn join(&self, selector: impl Into<NodeSelector>, options: JoinOptions) -> Result<Player> {
        let node = self.get_node(selector)?;

        node.join_channel(options).await
    }

    /// Leaves the voice channel of a guild, wherever its player lives.
    pub async fn leave(&self, guild_id: u64) -> Result<()> {
        match self.get_player(guild_id) {
            Some(player) => player.connection().disconnect(true).await,
            None => Ok(()),
        }
    }

    /// Every player across the pool.
    pub fn players(&self) -> Vec<Player> {
        self.nodes().iter().flat_map(Node::players).collect()
    }

    pub fn get_player(&self, guild_id: u64) -> Option<Player> {
        self.nodes().iter().find_map(|node| node.get_player(guild_id))
    }

    /// Feeds a raw gateway packet to the pool.
    ///
    /// Only voice state and voice server updates are acted on; everything
    /// else is ignored.
    pub fn handle_raw(&self, packet: &Value) {
        let event = match VoiceGatewayEvent::from_packet(packet) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(why) => {
                warn!("Malformed voice packet from the gateway: {:?}", why);

                return;
            },
        };

        let user_id = match self.user_id() {
            Some(user_id) => user_id,
            None => {
                debug!("Dropping voice packet received before the client is ready");

                return;
            },
        };

        for node in self.nodes() {
            node.handle_voice_event(&event, user_id);
        }
    }

    pub(crate) fn forward(&self, shard_id: u64, packet: VoiceStatePacket, important: bool) {
        self.inner.handler.forward(shard_id, packet, important);
    }

    pub(crate) fn downgrade(&self) -> WeakManager {
        WeakManager(Arc::downgrade(&self.inner))
    }

    /// Drops a node that will never reconnect from the pool.
    pub(crate) fn remove_disconnected(&self, node: &Node, reason: String) {
        self.inner.nodes.lock().retain(|other| !other.ptr_eq(node));

        let _ = self.inner.events.send(NodeEvent::Disconnect {
            node: node.name().to_owned(),
            reason,
        });
    }

    /// Registers a node without connecting it.
    #[cfg(test)]
    pub(crate) fn insert_detached(&self, config: NodeConfig) -> Node {
        let node = Node::new(
            config,
            Arc::clone(&self.inner.options),
            self.downgrade(),
            self.inner.events.clone(),
        )
        .unwrap();
        self.inner.nodes.lock().push(node.clone());

        node
    }
}

fn ideal<'a>(nodes: impl Iterator<Item = &'a Node>) -> Result<Node> {
    nodes
        .min_by_key(|node| node.penalty())
        .cloned()
        .ok_or(Error::NotFound)
}
