//! Messages delivered to the caller.
//!
//! Everything the connection engine learns — lifecycle changes, command
//! responses, server-pushed events — is translated into one [`Message`] and
//! either queued for [`invoke`](crate::DiscordClient::invoke) or handed to
//! the event handler on the worker thread, depending on the delivery mode.

use std::time::SystemTime;

use crate::models::{Configuration, User, VoiceSettings};
use crate::presence::RichPresence;
use crate::rpc::payload::{ApplicationInfo, ServerEvent};

/// A timestamped message from the connection engine.
#[derive(Debug, Clone)]
pub struct Message {
    /// When the engine created this message.
    pub created_at: SystemTime,
    /// What happened.
    pub kind: MessageKind,
}

impl Message {
    /// Wrap `kind` with the current time.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            created_at: SystemTime::now(),
            kind,
        }
    }
}

impl From<MessageKind> for Message {
    fn from(kind: MessageKind) -> Self {
        Self::new(kind)
    }
}

/// The payload of a [`Message`].
#[derive(Debug, Clone)]
pub enum MessageKind {
    /// The transport connected to a pipe; the handshake is in flight.
    ConnectionEstablished {
        /// Endpoint index 0..=9 that accepted the connection.
        pipe: u8,
    },

    /// A connection attempt failed; the engine will back off and retry.
    ConnectionFailed {
        /// Endpoint index that was attempted.
        pipe: u8,
    },

    /// Handshake completed; the connection is usable.
    Ready {
        /// The logged-in user, when the client reported one.
        user: Option<User>,
        /// Endpoint configuration attached to user helpers.
        configuration: Configuration,
    },

    /// Discord closed the connection.
    Close {
        /// Close code.
        code: i32,
        /// Close reason.
        reason: String,
    },

    /// A command failed server-side. The connection stays up.
    Error {
        /// Discord RPC error code.
        code: i32,
        /// Error text.
        message: String,
    },

    /// Acknowledgment of a presence update, echoing the applied presence.
    Presence {
        /// The presence Discord now shows, `None` after a clear.
        presence: Option<RichPresence>,
    },

    /// Another user asks to join; answer with
    /// [`respond`](crate::DiscordClient::respond).
    JoinRequest {
        /// The requesting user, with configuration attached.
        user: User,
    },

    /// Our join invitation was accepted.
    Join {
        /// Secret the host application resolves to a session.
        secret: String,
    },

    /// Another user starts spectating.
    Spectate {
        /// Secret the host application resolves to a spectate session.
        secret: String,
    },

    /// A SUBSCRIBE was acknowledged.
    Subscribe {
        /// The now-subscribed event.
        event: ServerEvent,
    },

    /// An UNSUBSCRIBE was acknowledged.
    Unsubscribe {
        /// The now-unsubscribed event.
        event: ServerEvent,
    },

    /// AUTHORIZE completed.
    Authorize {
        /// OAuth2 authorization code for the out-of-band token exchange.
        code: String,
    },

    /// AUTHENTICATE completed.
    Authenticate {
        /// The authenticated user.
        user: User,
        /// Granted scopes.
        scopes: Vec<String>,
        /// Token expiry, RFC 3339.
        expires: String,
        /// Application the token belongs to.
        application: Option<ApplicationInfo>,
    },

    /// Voice settings snapshot from GET_ or SET_VOICE_SETTINGS.
    VoiceSettings {
        /// The user's current voice settings.
        settings: VoiceSettings,
    },
}
