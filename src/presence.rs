//! Rich presence data model.
//!
//! The activity a host application advertises: state line, details line,
//! timestamps, image assets, party membership, join/spectate secrets, and
//! action buttons. Everything is optional; unset fields are omitted on the
//! wire so Discord falls back to its defaults.

use serde::{Deserialize, Serialize};

/// Maximum rendered length Discord accepts for text fields.
const MAX_TEXT_LEN: usize = 128;

/// The advertised activity.
///
/// Assemble with the `with_*` builders:
///
/// ```
/// use discord_presence::RichPresence;
///
/// let presence = RichPresence::new()
///     .with_details("Competitive")
///     .with_state("In a group")
///     .with_party("ae488379", 3, 5);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichPresence {
    /// The user's current party status, second line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// What the player is doing, first line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Elapsed/remaining time display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,

    /// Images and their hover texts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Assets>,

    /// Party id and size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<Party>,

    /// Join/spectate secrets. Mutually exclusive with buttons on Discord's
    /// side; secrets win.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Secrets>,

    /// Up to two clickable buttons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<Vec<Button>>,

    /// Whether this is an instanced game session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<bool>,
}

/// Unix timestamps (seconds) bounding the activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// Activity start; renders "elapsed".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    /// Activity end; renders "remaining" and overrides `start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

/// Large and small image with hover texts.
///
/// Image keys name assets uploaded to the application's developer portal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assets {
    /// Key of the large image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    /// Hover text of the large image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    /// Key of the small corner image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    /// Hover text of the small image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
}

/// Party membership: id plus `[current, max]` size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Opaque party id, required for join invitations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `(current, max)` member counts, serialized as a two-element array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<(u32, u32)>,
}

/// Secrets handed to other clients through join/spectate flows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secrets {
    /// Secret for join invitations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
    /// Secret for spectating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectate: Option<String>,
    /// Secret identifying the match itself.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
}

/// A clickable link button under the presence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    /// Button caption.
    pub label: String,
    /// Target URL.
    pub url: String,
}

impl RichPresence {
    /// An empty presence; every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the details line.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(truncate(details.into()));
        self
    }

    /// Set the state line.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(truncate(state.into()));
        self
    }

    /// Set the start timestamp (Unix seconds).
    pub fn with_start_time(mut self, start: u64) -> Self {
        self.timestamps.get_or_insert_with(Timestamps::default).start = Some(start);
        self
    }

    /// Set the end timestamp (Unix seconds).
    pub fn with_end_time(mut self, end: u64) -> Self {
        self.timestamps.get_or_insert_with(Timestamps::default).end = Some(end);
        self
    }

    /// Set the large image and optional hover text.
    pub fn with_large_image(
        mut self,
        key: impl Into<String>,
        text: Option<&str>,
    ) -> Self {
        let assets = self.assets.get_or_insert_with(Assets::default);
        assets.large_image = Some(key.into());
        assets.large_text = text.map(|t| truncate(t.to_owned()));
        self
    }

    /// Set the small image and optional hover text.
    pub fn with_small_image(
        mut self,
        key: impl Into<String>,
        text: Option<&str>,
    ) -> Self {
        let assets = self.assets.get_or_insert_with(Assets::default);
        assets.small_image = Some(key.into());
        assets.small_text = text.map(|t| truncate(t.to_owned()));
        self
    }

    /// Set the party id and `(current, max)` size.
    pub fn with_party(mut self, id: impl Into<String>, current: u32, max: u32) -> Self {
        self.party = Some(Party {
            id: Some(id.into()),
            size: Some((current, max)),
        });
        self
    }

    /// Set the join/spectate secrets.
    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Append a button. Discord renders at most two.
    pub fn with_button(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.buttons.get_or_insert_with(Vec::new).push(Button {
            label: label.into(),
            url: url.into(),
        });
        self
    }

    /// True when any secret is set.
    pub fn has_secrets(&self) -> bool {
        self.secrets
            .as_ref()
            .is_some_and(|s| s.join.is_some() || s.spectate.is_some() || s.game.is_some())
    }

    /// True when a party is described.
    pub fn has_party(&self) -> bool {
        self.party
            .as_ref()
            .is_some_and(|p| p.id.is_some() || p.size.is_some())
    }

    /// Party `(current, max)` size when set.
    pub fn party_size(&self) -> Option<(u32, u32)> {
        self.party.as_ref().and_then(|p| p.size)
    }

    /// Merge `incoming` into `self`: set fields of `incoming` win, unset
    /// fields keep the cached value. Whole sub-objects replace, matching how
    /// Discord echoes presence updates.
    pub fn merge(&mut self, incoming: &RichPresence) {
        if incoming.state.is_some() {
            self.state.clone_from(&incoming.state);
        }
        if incoming.details.is_some() {
            self.details.clone_from(&incoming.details);
        }
        if incoming.timestamps.is_some() {
            self.timestamps = incoming.timestamps;
        }
        if incoming.assets.is_some() {
            self.assets.clone_from(&incoming.assets);
        }
        if incoming.party.is_some() {
            self.party.clone_from(&incoming.party);
        }
        if incoming.secrets.is_some() {
            self.secrets.clone_from(&incoming.secrets);
        }
        if incoming.buttons.is_some() {
            self.buttons.clone_from(&incoming.buttons);
        }
        if incoming.instance.is_some() {
            self.instance = incoming.instance;
        }
    }
}

fn truncate(mut text: String) -> String {
    if text.chars().count() > MAX_TEXT_LEN {
        text = text.chars().take(MAX_TEXT_LEN).collect();
    }
    text
}

// ─── Tests ─────────────────────────────────────────────────────────────────
