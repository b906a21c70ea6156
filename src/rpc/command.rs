//! Outbound commands and their wire envelopes.
//!
//! Every user-visible operation becomes one [`Command`] in the outbound
//! queue. At transmit time the engine stamps a nonce and the command
//! serializes itself into the envelope Discord expects:
//!
//! ```text
//! {"cmd": "<COMMAND>", "nonce": "<decimal>", "args": {...}?, "evt": "<EVENT>"?}
//! ```
//!
//! Unset fields are omitted. [`Command::Close`] is an engine-internal
//! sentinel: it is never serialized through this envelope, the engine turns
//! it into the farewell frame instead.

use serde::Serialize;

use crate::models::VoiceSettings;
use crate::presence::RichPresence;
use crate::rpc::framing::{Frame, Opcode};
use crate::rpc::payload::{CommandKind, ServerEvent};

/// First frame after connect: `{"v":1,"client_id":"..."}`.
///
/// Also the body of the farewell frame sent under [`Opcode::Close`].
#[derive(Debug, Clone, Serialize)]
pub struct HandshakeBody {
    /// RPC protocol version.
    pub v: u32,
    /// Application (client) id the presence belongs to.
    pub client_id: String,
}

impl HandshakeBody {
    /// Version-1 handshake for `client_id`.
    pub fn new(client_id: &str) -> Self {
        Self {
            v: 1,
            client_id: client_id.to_owned(),
        }
    }
}

/// A queued outbound operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Set (`Some`) or clear (`None`) the rich presence.
    SetActivity {
        /// Process id of the host application.
        pid: u32,
        /// The presence to advertise.
        activity: Option<RichPresence>,
    },

    /// Answer a pending join request.
    Respond {
        /// Id of the user who asked to join.
        user_id: String,
        /// Accept or decline.
        accept: bool,
    },

    /// Change one event subscription.
    Subscribe {
        /// The event to (un)subscribe.
        event: ServerEvent,
        /// `true` sends UNSUBSCRIBE instead of SUBSCRIBE.
        unsubscribe: bool,
    },

    /// Start the OAuth2 authorization flow in the Discord client.
    Authorize {
        /// Application id to authorize.
        client_id: String,
        /// Requested OAuth2 scopes.
        scopes: Vec<String>,
    },

    /// Present an OAuth2 access token obtained out-of-band.
    Authenticate {
        /// The bearer token.
        access_token: String,
    },

    /// Read the user's voice settings.
    GetVoiceSettings,

    /// Write the user's voice settings.
    SetVoiceSettings {
        /// Settings to apply; unset fields are left untouched.
        settings: VoiceSettings,
    },

    /// Graceful-shutdown sentinel. Never serialized as a normal command; the
    /// write path replaces it with the farewell frame.
    Close,
}

/// Serialized envelope shell. `args` is pre-rendered JSON so one shape
/// covers every command body.
#[derive(Serialize)]
struct Envelope<'a> {
    cmd: CommandKind,
    nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    evt: Option<ServerEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<&'a serde_json::value::RawValue>,
}

impl Command {
    /// The wire command name this variant maps to.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetActivity { .. } => CommandKind::SetActivity,
            Command::Respond { accept: true, .. } => CommandKind::SendActivityJoinInvite,
            Command::Respond { accept: false, .. } => CommandKind::CloseActivityJoinRequest,
            Command::Subscribe { unsubscribe: false, .. } => CommandKind::Subscribe,
            Command::Subscribe { unsubscribe: true, .. } => CommandKind::Unsubscribe,
            Command::Authorize { .. } => CommandKind::Authorize,
            Command::Authenticate { .. } => CommandKind::Authenticate,
            Command::GetVoiceSettings => CommandKind::GetVoiceSettings,
            Command::SetVoiceSettings { .. } => CommandKind::SetVoiceSettings,
            // The sentinel has no wire name; Dispatch is a placeholder that
            // never reaches the pipe.
            Command::Close => CommandKind::Dispatch,
        }
    }

    /// Render the `args` object, or `None` for argument-less commands.
    fn args_json(&self) -> serde_json::Result<Option<serde_json::Value>> {
        let args = match self {
            Command::SetActivity { pid, activity } => Some(serde_json::json!({
                "pid": pid,
                "activity": activity,
            })),
            Command::Respond { user_id, .. } => Some(serde_json::json!({
                "user_id": user_id,
            })),
            Command::Subscribe { .. } => None,
            Command::Authorize { client_id, scopes } => Some(serde_json::json!({
                "client_id": client_id,
                "scopes": scopes,
            })),
            Command::Authenticate { access_token } => Some(serde_json::json!({
                "access_token": access_token,
            })),
            Command::GetVoiceSettings => None,
            Command::SetVoiceSettings { settings } => Some(serde_json::to_value(settings)?),
            Command::Close => None,
        };
        Ok(args)
    }

    /// Build the framed envelope for this command under `nonce`.
    ///
    /// Must not be called for [`Command::Close`]; the engine handles the
    /// sentinel on its own.
    pub fn to_frame(&self, nonce: u64) -> serde_json::Result<Frame> {
        debug_assert!(
            !matches!(self, Command::Close),
            "the Close sentinel is not a wire command"
        );

        let evt = match self {
            Command::Subscribe { event, .. } => Some(*event),
            _ => None,
        };

        let args = self.args_json()?;
        let raw_args = match &args {
            Some(value) => Some(serde_json::value::to_raw_value(value)?),
            None => None,
        };

        let envelope = Envelope {
            cmd: self.kind(),
            nonce: nonce.to_string(),
            evt,
            args: raw_args.as_deref(),
        };

        Frame::json(Opcode::Frame, &envelope)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::RichPresence;

    fn envelope_value(cmd: &Command, nonce: u64) -> serde_json::Value {
        let frame = cmd.to_frame(nonce).unwrap();
        assert_eq!(frame.opcode, Opcode::Frame);
        serde_json::from_slice(&frame.payload).unwrap()
    }

    #[test]
    fn handshake_body_shape() {
        let body = serde_json::to_string(&HandshakeBody::new("123")).unwrap();
        assert_eq!(body, r#"{"v":1,"client_id":"123"}"#);
    }

    #[test]
    fn set_activity_envelope() {
        let cmd = Command::SetActivity {
            pid: 4077,
            activity: Some(RichPresence::new().with_details("x")),
        };
        let value = envelope_value(&cmd, 1);

        assert_eq!(value["cmd"], "SET_ACTIVITY");
        assert_eq!(value["nonce"], "1");
        assert_eq!(value["args"]["pid"], 4077);
        assert_eq!(value["args"]["activity"]["details"], "x");
        assert!(value.get("evt").is_none());
    }

    #[test]
    fn clear_activity_serializes_null() {
        let cmd = Command::SetActivity { pid: 1, activity: None };
        let value = envelope_value(&cmd, 9);
        assert_eq!(value["args"]["activity"], serde_json::Value::Null);
    }

    #[test]
    fn respond_maps_accept_to_command_name() {
        let accept = Command::Respond { user_id: "u1".into(), accept: true };
        assert_eq!(envelope_value(&accept, 2)["cmd"], "SEND_ACTIVITY_JOIN_INVITE");

        let decline = Command::Respond { user_id: "u1".into(), accept: false };
        let value = envelope_value(&decline, 3);
        assert_eq!(value["cmd"], "CLOSE_ACTIVITY_JOIN_REQUEST");
        assert_eq!(value["args"]["user_id"], "u1");
    }

    #[test]
    fn subscribe_carries_evt_and_no_args() {
        let cmd = Command::Subscribe { event: ServerEvent::ActivityJoin, unsubscribe: false };
        let value = envelope_value(&cmd, 4);
        assert_eq!(value["cmd"], "SUBSCRIBE");
        assert_eq!(value["evt"], "ACTIVITY_JOIN");
        assert!(value.get("args").is_none());

        let cmd = Command::Subscribe { event: ServerEvent::ActivitySpectate, unsubscribe: true };
        assert_eq!(envelope_value(&cmd, 5)["cmd"], "UNSUBSCRIBE");
    }

    #[test]
    fn authorize_and_authenticate_envelopes() {
        let cmd = Command::Authorize {
            client_id: "123".into(),
            scopes: vec!["rpc".into(), "identify".into()],
        };
        let value = envelope_value(&cmd, 6);
        assert_eq!(value["cmd"], "AUTHORIZE");
        assert_eq!(value["args"]["scopes"][1], "identify");

        let cmd = Command::Authenticate { access_token: "tok".into() };
        let value = envelope_value(&cmd, 7);
        assert_eq!(value["cmd"], "AUTHENTICATE");
        assert_eq!(value["args"]["access_token"], "tok");
    }

    #[test]
    fn get_voice_settings_has_no_args() {
        let value = envelope_value(&Command::GetVoiceSettings, 8);
        assert_eq!(value["cmd"], "GET_VOICE_SETTINGS");
        assert!(value.get("args").is_none());
    }

    #[test]
    fn nonce_is_decimal_string() {
        let value = envelope_value(&Command::GetVoiceSettings, 18446744073709551615);
        assert_eq!(value["nonce"], "18446744073709551615");
    }
}
