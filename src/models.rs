//! Users, endpoint configuration, and voice settings.
//!
//! These arrive from Discord inside payload bodies; deserialization is
//! tolerant so newer client versions cannot break the connection.

use serde::{Deserialize, Serialize};

/// Endpoint configuration delivered with READY.
///
/// Opaque to the engine; attached to [`User`] values so avatar helpers can
/// build CDN URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// CDN hostname, e.g. `cdn.discordapp.com`.
    #[serde(default)]
    pub cdn_host: String,
    /// API endpoint, e.g. `//discord.com/api`.
    #[serde(default)]
    pub api_endpoint: String,
    /// Environment name, e.g. `production`.
    #[serde(default)]
    pub environment: Option<String>,
}

/// A Discord user as reported by READY, join requests, and AUTHENTICATE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Snowflake id.
    pub id: String,
    /// Account name.
    #[serde(default)]
    pub username: String,
    /// Legacy discriminator ("0001"); `None` or "0" on migrated accounts.
    #[serde(default)]
    pub discriminator: Option<String>,
    /// Avatar asset hash, `None` when the user has no custom avatar.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Endpoint configuration, attached by the client before delivery.
    /// Never part of the wire payload.
    #[serde(skip)]
    pub configuration: Option<Configuration>,
}

impl User {
    /// CDN URL of the user's avatar.
    ///
    /// Uses the custom avatar when one is set, otherwise one of the default
    /// avatars. Returns `None` before a READY supplied the configuration.
    pub fn avatar_url(&self) -> Option<String> {
        let config = self.configuration.as_ref()?;
        if config.cdn_host.is_empty() {
            return None;
        }

        match &self.avatar {
            Some(hash) => Some(format!(
                "https://{}/avatars/{}/{hash}.png",
                config.cdn_host, self.id
            )),
            None => {
                let index = self
                    .discriminator
                    .as_deref()
                    .and_then(|d| d.parse::<u32>().ok())
                    .map(|d| d % 5)
                    .unwrap_or(0);
                Some(format!(
                    "https://{}/embed/avatars/{index}.png",
                    config.cdn_host
                ))
            }
        }
    }
}

/// Voice settings snapshot, read and written through
/// GET_VOICE_SETTINGS / SET_VOICE_SETTINGS.
///
/// Every field is optional: a SET only transmits the fields to change, and a
/// GET response is taken as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    /// Input device and volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<VoiceDeviceSettings>,
    /// Output device and volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<VoiceDeviceSettings>,
    /// Voice activation / push-to-talk mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<VoiceMode>,
    /// Automatic gain control.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic_gain_control: Option<bool>,
    /// Echo cancellation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo_cancellation: Option<bool>,
    /// Noise suppression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_suppression: Option<bool>,
    /// Quality-of-service packet priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<bool>,
    /// Safety warning when silence is detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence_warning: Option<bool>,
    /// Self-deafened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deaf: Option<bool>,
    /// Self-muted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
}

/// One side (input or output) of the audio device settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceDeviceSettings {
    /// Selected device id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Volume, 0.0 to 100.0 (input) or 0.0 to 200.0 (output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    /// Devices the client can switch to; read-only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_devices: Vec<VoiceDevice>,
}

/// A selectable audio device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceDevice {
    /// Device id.
    pub id: String,
    /// Human-readable device name.
    #[serde(default)]
    pub name: String,
}

/// Voice input mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceMode {
    /// `VOICE_ACTIVITY` or `PUSH_TO_TALK`.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub mode_type: Option<String>,
    /// Whether the activation threshold adjusts itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_threshold: Option<bool>,
    /// Activation threshold in dB, -100.0 to 0.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    /// Push-to-talk release delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f32>,
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Configuration {
        Configuration {
            cdn_host: "cdn.discordapp.com".into(),
            api_endpoint: "//discord.com/api".into(),
            environment: Some("production".into()),
        }
    }

    #[test]
    fn user_tolerates_minimal_payload() {
        let user: User = serde_json::from_str(r#"{"id": "1"}"#).unwrap();
        assert_eq!(user.id, "1");
        assert!(user.username.is_empty());
        assert!(user.avatar.is_none());
    }

    #[test]
    fn custom_avatar_url() {
        let mut user: User =
            serde_json::from_str(r#"{"id": "53908232506183680", "avatar": "a_1cf8"}"#).unwrap();
        user.configuration = Some(config());
        assert_eq!(
            user.avatar_url().unwrap(),
            "https://cdn.discordapp.com/avatars/53908232506183680/a_1cf8.png"
        );
    }

    #[test]
    fn default_avatar_url_by_discriminator() {
        let mut user: User =
            serde_json::from_str(r#"{"id": "1", "discriminator": "0007"}"#).unwrap();
        user.configuration = Some(config());
        assert_eq!(
            user.avatar_url().unwrap(),
            "https://cdn.discordapp.com/embed/avatars/2.png"
        );
    }

    #[test]
    fn avatar_url_requires_configuration() {
        let user: User = serde_json::from_str(r#"{"id": "1"}"#).unwrap();
        assert!(user.avatar_url().is_none());
    }

    #[test]
    fn voice_settings_round_trip_is_sparse() {
        let settings = VoiceSettings {
            mute: Some(true),
            mode: Some(VoiceMode {
                mode_type: Some("PUSH_TO_TALK".into()),
                delay: Some(150.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["mute"], true);
        assert_eq!(value["mode"]["type"], "PUSH_TO_TALK");
        assert!(value.get("deaf").is_none());
        assert!(value.get("input").is_none());
    }

    #[test]
    fn voice_settings_tolerates_extra_fields() {
        let raw = r#"{
            "input": {"device_id": "default", "volume": 55.5,
                      "available_devices": [{"id": "default", "name": "Mic"}]},
            "mute": false,
            "some_future_field": {"x": 1}
        }"#;
        let settings: VoiceSettings = serde_json::from_str(raw).unwrap();
        let input = settings.input.unwrap();
        assert_eq!(input.volume, Some(55.5));
        assert_eq!(input.available_devices.len(), 1);
        assert_eq!(settings.mute, Some(false));
    }
}
