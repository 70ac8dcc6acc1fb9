//! A tokio client for pools of Lavalink nodes.
//!
//! A [`NodeManager`] keeps one WebSocket per node, reconnecting when it drops
//! and optionally moving players off nodes that go away. Players are created
//! by joining a voice channel; the manager needs the gateway's voice packets
//! fed to [`NodeManager::handle_raw`] and writes its own voice state updates
//! through an [`EventHandler`].
//!
//! ```rust,no_run
//! use lavalink_tokio::nodes::{JoinOptions, NodeConfig, NodeManager, NodeSelector, Options};
//! use lavalink_tokio::player::PlayOptions;
//! use lavalink_tokio::ChannelHandler;
//!
//! # async fn run() -> lavalink_tokio::Result<()> {
//! let (handler, _gateway) = ChannelHandler::new(381880193700069377);
//! let manager = NodeManager::new(handler, Options::default());
//! manager.ready(vec![NodeConfig::new("main", "localhost:2333", "youshallnotpass")])?;
//!
//! let player = manager
//!     .join(NodeSelector::Auto, JoinOptions::new(381880193251409931, 0, 381880193700069380))
//!     .await?;
//! player.play("QAAAjQIAJFJpY2sgQXN0bGV5", PlayOptions::default()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`NodeManager`]: nodes/struct.NodeManager.html
//! [`NodeManager::handle_raw`]: nodes/struct.NodeManager.html#method.handle_raw
//! [`EventHandler`]: trait.EventHandler.html

#[macro_use] extern crate log;

pub mod model;
pub mod nodes;
pub mod player;

mod error;
mod event_handler;

pub use self::error::{Error, HandshakeError, Result};
pub use self::event_handler::{ChannelHandler, EventHandler, FnHandler, ForwardedPacket};
