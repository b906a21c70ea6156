//! Inbound payload types.
//!
//! Discord answers every command and pushes every event as a JSON envelope:
//!
//! ```text
//! {"cmd": "<COMMAND>", "evt": "<EVENT>"?, "nonce": "<n>"?, "data": {...}?}
//! ```
//!
//! The envelope header is decoded once; `data` stays a [`RawValue`] so each
//! router arm parses only the body shape it expects. Unknown fields are
//! ignored throughout, and unknown `cmd`/`evt` strings decode to an `Unknown`
//! variant so a newer Discord client cannot poison the stream.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::models::{Configuration, User, VoiceSettings};
use crate::presence::RichPresence;

/// Command names that appear in envelopes, both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    /// Server-initiated event carrier.
    Dispatch,
    /// Set or clear the rich presence.
    SetActivity,
    /// Accept a pending join request.
    SendActivityJoinInvite,
    /// Decline a pending join request.
    CloseActivityJoinRequest,
    /// Subscribe to a server event.
    Subscribe,
    /// Unsubscribe from a server event.
    Unsubscribe,
    /// Start the OAuth2 authorization flow.
    Authorize,
    /// Present an OAuth2 access token.
    Authenticate,
    /// Read the user's voice settings.
    GetVoiceSettings,
    /// Write the user's voice settings.
    SetVoiceSettings,
    /// Anything this crate does not know; logged and dropped by the router.
    #[serde(other)]
    Unknown,
}

/// Server event names carried in the `evt` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    /// Handshake completed; carries configuration and user.
    Ready,
    /// Command-level error.
    Error,
    /// Another user accepted our invite; carries the join secret.
    ActivityJoin,
    /// Another user spectates; carries the spectate secret.
    ActivitySpectate,
    /// Another user asks to join; carries their profile.
    ActivityJoinRequest,
    /// Unrecognized event name.
    #[serde(other)]
    Unknown,
}

/// Decoded envelope header of an inbound `Opcode::Frame`.
#[derive(Debug, Deserialize)]
pub struct EventPayload {
    /// Command this payload answers, or `Dispatch` for pushed events.
    pub cmd: CommandKind,
    /// Event discriminator for `Dispatch` payloads and subscription acks.
    #[serde(default)]
    pub evt: Option<ServerEvent>,
    /// Echo of the request nonce, absent on pushed events.
    #[serde(default)]
    pub nonce: Option<String>,
    /// Body, parsed lazily per router arm.
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

impl EventPayload {
    /// Parse the `data` body as `T`. `None` data parses as JSON `null`.
    pub fn data_as<'a, T: Deserialize<'a>>(&'a self) -> serde_json::Result<T> {
        match &self.data {
            Some(raw) => serde_json::from_str(raw.get()),
            None => serde_json::from_str("null"),
        }
    }
}

/// Body of an inbound `Opcode::Close`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClosePayload {
    /// Close code, 1000 for a normal farewell.
    #[serde(default)]
    pub code: i32,
    /// Human-readable close reason.
    #[serde(default)]
    pub message: String,
}

/// `data` of the READY dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyData {
    /// Protocol version, always 1.
    #[serde(default)]
    pub v: u32,
    /// Endpoint configuration for avatar and API helpers.
    pub config: Configuration,
    /// The logged-in user, absent on very old clients.
    #[serde(default)]
    pub user: Option<User>,
}

/// `data` of an `evt: ERROR` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    /// Discord RPC error code.
    #[serde(default)]
    pub code: i32,
    /// Human-readable error text.
    #[serde(default)]
    pub message: String,
}

/// `data` of an AUTHORIZE response.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeData {
    /// OAuth2 authorization code to exchange out-of-band for a token.
    pub code: String,
}

/// `data` of an AUTHENTICATE response.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticateData {
    /// The authenticated user.
    pub user: User,
    /// Scopes the token grants.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Token expiry, RFC 3339.
    #[serde(default)]
    pub expires: String,
    /// Application the token belongs to.
    #[serde(default)]
    pub application: Option<ApplicationInfo>,
}

/// Application descriptor inside an AUTHENTICATE response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationInfo {
    /// Application (client) id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Icon asset hash.
    #[serde(default)]
    pub icon: Option<String>,
    /// Store description.
    #[serde(default)]
    pub description: Option<String>,
}

/// `data` of ACTIVITY_JOIN / ACTIVITY_SPECTATE dispatches.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretData {
    /// Opaque secret the host application resolves to a session.
    pub secret: String,
}

/// `data` of an ACTIVITY_JOIN_REQUEST dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequestData {
    /// The requesting user.
    pub user: User,
}

/// `data` of SUBSCRIBE / UNSUBSCRIBE acknowledgments.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionData {
    /// The event the subscription change applies to.
    pub evt: ServerEvent,
}

/// `data` of a SET_ACTIVITY response: the presence as Discord now shows it,
/// or `null` after a clear.
pub type PresenceData = Option<RichPresence>;

/// `data` of GET_VOICE_SETTINGS / SET_VOICE_SETTINGS responses.
pub type VoiceSettingsData = VoiceSettings;

// ─── Tests ─────────────────────────────────────────────────────────────────
