//! Client library for Discord's local Rich Presence IPC channel.
//!
//! Connects to the Discord desktop client over its local IPC endpoint
//! (`discord-ipc-0..9` Unix sockets, or named pipes on Windows), advertises a
//! rich presence, and receives user-initiated events such as join requests.
//! No HTTP, no gateway: everything goes through the framed pipe protocol the
//! desktop client exposes.
//!
//! # Architecture
//!
//! A single worker thread owns the pipe and the protocol state machine
//! (disconnected → connecting → connected), reconnecting with bounded
//! backoff when the client restarts. Callers interact through
//! [`DiscordClient`]: commands are queued and transmitted in order by the
//! worker; inbound frames are translated into [`Message`]s and either polled
//! with [`DiscordClient::invoke`] (manual mode, the default) or dispatched to
//! the event handler on the worker thread (auto mode).
//!
//! # Example
//!
//! ```no_run
//! use discord_presence::{ClientOptions, DiscordClient, MessageKind, RichPresence};
//!
//! let mut client = DiscordClient::new(ClientOptions::new("424087019149328395"));
//! client.initialize()?;
//! client.set_presence(Some(
//!     RichPresence::new()
//!         .with_details("Ranked match")
//!         .with_party("4077", 2, 5),
//! ))?;
//!
//! for message in client.invoke()? {
//!     if let MessageKind::Ready { user, .. } = &message.kind {
//!         println!("presence visible for {:?}", user);
//!     }
//! }
//! # Ok::<(), discord_presence::DiscordError>(())
//! ```

pub mod error;
pub mod events;
pub mod models;
pub mod presence;
pub mod registry;
pub mod rpc;

mod client;

pub use client::{ClientOptions, DiscordClient};
pub use error::{DiscordError, Result};
pub use events::{EventDelivery, EventFlags, EventHandler};
pub use models::{Configuration, User, VoiceSettings};
pub use presence::{Assets, Button, Party, RichPresence, Secrets, Timestamps};
pub use registry::{ExternallyManagedScheme, SchemeRegistrar};
pub use rpc::{Message, MessageKind, RpcState, ServerEvent};
