//! The public client façade.
//!
//! [`DiscordClient`] owns the connection engine and layers the user-facing
//! rules on top of it: presence caching and dedup, validation, subscription
//! diffing, and resynchronization after every READY. All operations are
//! non-blocking; their effect is a command in the outbound queue.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{DiscordError, Result};
use crate::events::{EventDelivery, EventFlags, EventHandler};
use crate::models::{Configuration, User, VoiceSettings};
use crate::presence::{Assets, RichPresence, Secrets, Timestamps};
use crate::registry::SchemeRegistrar;
use crate::rpc::backoff::ReconnectBackoff;
use crate::rpc::command::Command;
use crate::rpc::connection::{
    CommandHandle, ConnShared, ConnectionOptions, MessageSink, RpcDriver, RpcState,
    DEFAULT_POLL_TIMEOUT,
};
use crate::rpc::message::{Message, MessageKind};
use crate::rpc::pipe::{PipeTransport, Transport};
use crate::rpc::queue::{DEFAULT_INBOUND_CAPACITY, DEFAULT_OUTBOUND_CAPACITY};

/// Construction parameters for [`DiscordClient`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Application (client) id from the developer portal.
    pub client_id: String,
    /// Fixed endpoint index 0..=9, or `None` to probe.
    pub target_pipe: Option<u8>,
    /// Directory to search for sockets instead of the conventional locations
    /// (sandboxed packagings, tests). Ignored on Windows.
    pub pipe_dir: Option<PathBuf>,
    /// Message delivery mode.
    pub delivery: EventDelivery,
    /// Suppress presence updates that deep-equal the cached presence.
    pub skip_identical_presence: bool,
    /// Outbound command queue capacity.
    pub outbound_capacity: usize,
    /// Inbound message queue capacity (manual mode only; auto mode never
    /// buffers).
    pub inbound_capacity: usize,
    /// Worker wakeup poll interval.
    pub poll_timeout: Duration,
    /// Smallest reconnect delay.
    pub backoff_min: Duration,
    /// Largest reconnect delay.
    pub backoff_max: Duration,
}

impl ClientOptions {
    /// Defaults for `client_id`: probe all pipes, manual delivery, dedup on.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            target_pipe: None,
            pipe_dir: None,
            delivery: EventDelivery::Manual,
            skip_identical_presence: true,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            backoff_min: Duration::from_millis(500),
            backoff_max: Duration::from_secs(60),
        }
    }

    /// Deliver messages through the event handler on the worker thread.
    pub fn auto_events(mut self) -> Self {
        self.delivery = EventDelivery::Auto;
        self
    }
}

/// Client-side state shared with the auto-mode dispatcher.
#[derive(Default)]
struct ClientState {
    presence: Option<RichPresence>,
    subscriptions: EventFlags,
    configuration: Option<Configuration>,
    user: Option<User>,
    scheme_registered: bool,
}

/// A Rich Presence client talking to the local Discord desktop app.
///
/// ```no_run
/// use discord_presence::{ClientOptions, DiscordClient, RichPresence};
///
/// let mut client = DiscordClient::new(ClientOptions::new("424087019149328395"));
/// client.initialize()?;
/// client.set_presence(Some(RichPresence::new().with_details("In the menus")))?;
///
/// for _ in 0..60 {
///     for message in client.invoke()? {
///         println!("{:?}", message.kind);
///     }
///     std::thread::sleep(std::time::Duration::from_millis(500));
/// }
/// # Ok::<(), discord_presence::DiscordError>(())
/// ```
pub struct DiscordClient {
    options: ClientOptions,
    pid: u32,
    state: Arc<Mutex<ClientState>>,
    handler: Option<Arc<EventHandler>>,
    driver: Option<RpcDriver>,
    disposed: bool,
}

impl DiscordClient {
    /// Create an unconnected client.
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            pid: std::process::id(),
            state: Arc::new(Mutex::new(ClientState::default())),
            handler: None,
            driver: None,
            disposed: false,
        }
    }

    /// Register the event handler. Must happen before
    /// [`initialize`](Self::initialize).
    pub fn on_event(
        &mut self,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Result<()> {
        if self.driver.is_some() {
            return Err(DiscordError::AlreadyInitialized);
        }
        self.handler = Some(Arc::new(handler));
        Ok(())
    }

    /// Register the `discord-<app_id>` URI scheme through `registrar` and
    /// record the outcome. Required before subscribing to events or setting
    /// a presence with secrets.
    pub fn register_uri_scheme(
        &mut self,
        registrar: &dyn SchemeRegistrar,
        steam_app_id: Option<&str>,
        executable: Option<&Path>,
    ) -> bool {
        let registered = registrar.register(&self.options.client_id, steam_app_id, executable);
        self.locked_state().scheme_registered = registered;
        if !registered {
            log::warn!("uri scheme registration failed; join/spectate disabled");
        }
        registered
    }

    /// Start the connection worker.
    ///
    /// # Errors
    ///
    /// `Disposed` after [`dispose`](Self::dispose), `AlreadyInitialized` on a
    /// second call, `InvalidOptions` for manual delivery with a zero-capacity
    /// inbound queue.
    pub fn initialize(&mut self) -> Result<()> {
        #[cfg(unix)]
        let transport = match &self.options.pipe_dir {
            Some(dir) => PipeTransport::with_base_dir(dir),
            None => PipeTransport::new(),
        };
        #[cfg(windows)]
        let transport = PipeTransport::new();

        self.initialize_with(Box::new(transport))
    }

    fn initialize_with(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        if self.disposed {
            return Err(DiscordError::Disposed);
        }
        if self.driver.is_some() {
            return Err(DiscordError::AlreadyInitialized);
        }
        if self.options.client_id.is_empty() {
            return Err(DiscordError::InvalidOptions("client_id is empty".into()));
        }

        let inbound_capacity = match self.options.delivery {
            EventDelivery::Auto => 0,
            EventDelivery::Manual => {
                if self.options.inbound_capacity == 0 {
                    return Err(DiscordError::InvalidOptions(
                        "manual delivery needs a buffered inbound queue".into(),
                    ));
                }
                self.options.inbound_capacity
            }
        };

        let shared = ConnShared::new(self.options.outbound_capacity, inbound_capacity);
        let sink = match self.options.delivery {
            EventDelivery::Manual => MessageSink::Queue,
            EventDelivery::Auto => {
                let state = Arc::clone(&self.state);
                let commands = CommandHandle::new(Arc::clone(&shared));
                let handler = self.handler.clone();
                let pid = self.pid;
                MessageSink::Callback(Box::new(move |message| {
                    apply_message(&state, &commands, handler.as_deref(), pid, message);
                }))
            }
        };

        let connection = ConnectionOptions {
            client_id: self.options.client_id.clone(),
            target_pipe: self.options.target_pipe,
            poll_timeout: self.options.poll_timeout,
            backoff: ReconnectBackoff::new(self.options.backoff_min, self.options.backoff_max),
        };

        self.driver = Some(RpcDriver::spawn(shared, connection, transport, sink));
        log::info!("discord client initialized (app {})", self.options.client_id);
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) has run.
    pub fn is_initialized(&self) -> bool {
        self.driver.is_some()
    }

    /// Current protocol state.
    pub fn state(&self) -> RpcState {
        self.driver
            .as_ref()
            .map_or(RpcState::Disconnected, RpcDriver::state)
    }

    /// Endpoint configuration from the last READY.
    pub fn configuration(&self) -> Option<Configuration> {
        self.locked_state().configuration.clone()
    }

    /// The logged-in user from the last READY.
    pub fn user(&self) -> Option<User> {
        self.locked_state().user.clone()
    }

    /// The cached presence.
    pub fn current_presence(&self) -> Option<RichPresence> {
        self.locked_state().presence.clone()
    }

    /// The acknowledged subscription mask.
    pub fn subscriptions(&self) -> EventFlags {
        self.locked_state().subscriptions
    }

    // ── Presence ──────────────────────────────────────────────────────────

    /// Advertise `presence`, or clear it with `None`.
    ///
    /// Validation happens before anything is queued: secrets demand a
    /// registered URI scheme, and a party cannot be larger than its maximum.
    /// A presence equal to the cached one is suppressed when
    /// `skip_identical_presence` is on.
    pub fn set_presence(&self, presence: Option<RichPresence>) -> Result<()> {
        let commands = self.commands()?;

        if let Some(presence) = &presence {
            self.validate_presence(presence)?;
        }

        {
            let mut state = self.locked_state();
            if self.options.skip_identical_presence && state.presence == presence {
                log::debug!("identical presence skipped");
                return Ok(());
            }
            state.presence = presence.clone();
        }

        commands.enqueue(Command::SetActivity {
            pid: self.pid,
            activity: presence,
        })
    }

    fn validate_presence(&self, presence: &RichPresence) -> Result<()> {
        if presence.has_secrets() && !self.locked_state().scheme_registered {
            return Err(DiscordError::InvalidPresence(
                "join/spectate secrets require a registered uri scheme".into(),
            ));
        }
        if let Some((current, max)) = presence.party_size() {
            if max < current {
                return Err(DiscordError::InvalidPresence(format!(
                    "party max {max} is below current size {current}"
                )));
            }
        }
        if presence.has_secrets() && !presence.has_party() {
            log::warn!("presence has secrets but no party; discord will not show join buttons");
        }
        Ok(())
    }

    /// Patch the details line of the cached presence.
    pub fn update_details(&self, details: impl Into<String>) -> Result<()> {
        let details = details.into();
        self.update_presence(move |p| p.details = Some(details))
    }

    /// Patch the state line of the cached presence.
    pub fn update_state(&self, state: impl Into<String>) -> Result<()> {
        let state = state.into();
        self.update_presence(move |p| p.state = Some(state))
    }

    /// Patch the timestamps of the cached presence.
    pub fn update_timestamps(&self, timestamps: Timestamps) -> Result<()> {
        self.update_presence(move |p| p.timestamps = Some(timestamps))
    }

    /// Patch the assets of the cached presence.
    pub fn update_assets(&self, assets: Assets) -> Result<()> {
        self.update_presence(move |p| p.assets = Some(assets))
    }

    /// Patch the party of the cached presence.
    pub fn update_party(&self, id: impl Into<String>, current: u32, max: u32) -> Result<()> {
        let id = id.into();
        self.update_presence(move |p| {
            p.party = Some(crate::presence::Party {
                id: Some(id),
                size: Some((current, max)),
            })
        })
    }

    /// Patch the secrets of the cached presence.
    pub fn update_secrets(&self, secrets: Secrets) -> Result<()> {
        self.update_presence(move |p| p.secrets = Some(secrets))
    }

    fn update_presence(&self, patch: impl FnOnce(&mut RichPresence)) -> Result<()> {
        let mut presence = self.current_presence().unwrap_or_default();
        patch(&mut presence);
        self.set_presence(Some(presence))
    }

    // ── Subscriptions ─────────────────────────────────────────────────────

    /// Subscribe to the events in `flags` that are not yet subscribed.
    pub fn subscribe(&self, flags: EventFlags) -> Result<()> {
        self.change_subscription(flags, false)
    }

    /// Unsubscribe from the events in `flags` that are currently subscribed.
    pub fn unsubscribe(&self, flags: EventFlags) -> Result<()> {
        self.change_subscription(flags, true)
    }

    fn change_subscription(&self, flags: EventFlags, unsubscribe: bool) -> Result<()> {
        let commands = self.commands()?;
        let state = self.locked_state();
        if !state.scheme_registered {
            return Err(DiscordError::SchemeNotRegistered);
        }

        let delta = if unsubscribe {
            flags & state.subscriptions
        } else {
            flags - state.subscriptions
        };
        drop(state);

        for event in delta.server_events() {
            commands.enqueue(Command::Subscribe { event, unsubscribe })?;
        }
        Ok(())
    }

    // ── Authenticated commands ────────────────────────────────────────────

    /// Ask the Discord client to authorize this application for `scopes`.
    /// The answer arrives as [`MessageKind::Authorize`] carrying the OAuth2
    /// code; exchanging it for a token happens out-of-band.
    pub fn authorize(&self, scopes: &[&str]) -> Result<()> {
        self.commands()?.enqueue(Command::Authorize {
            client_id: self.options.client_id.clone(),
            scopes: scopes.iter().map(|s| (*s).to_owned()).collect(),
        })
    }

    /// Present an OAuth2 access token. The answer arrives as
    /// [`MessageKind::Authenticate`].
    pub fn authenticate(&self, access_token: impl Into<String>) -> Result<()> {
        self.commands()?.enqueue(Command::Authenticate {
            access_token: access_token.into(),
        })
    }

    /// Request the voice settings snapshot (requires an authenticated
    /// connection with the `rpc` scope).
    pub fn get_voice_settings(&self) -> Result<()> {
        self.commands()?.enqueue(Command::GetVoiceSettings)
    }

    /// Change voice settings; only set fields are transmitted.
    pub fn set_voice_settings(&self, settings: VoiceSettings) -> Result<()> {
        self.commands()?
            .enqueue(Command::SetVoiceSettings { settings })
    }

    /// Answer a join request from `user_id`.
    pub fn respond(&self, user_id: impl Into<String>, accept: bool) -> Result<()> {
        self.commands()?.enqueue(Command::Respond {
            user_id: user_id.into(),
            accept,
        })
    }

    // ── Message pump ──────────────────────────────────────────────────────

    /// Drain pending messages, apply their state rules, and return them.
    ///
    /// Manual delivery mode only; in auto mode the worker thread already did
    /// both.
    pub fn invoke(&self) -> Result<Vec<Message>> {
        if self.options.delivery != EventDelivery::Manual {
            return Err(DiscordError::ManualInvokeInAutoMode);
        }
        let driver = self.driver.as_ref().ok_or(DiscordError::NotInitialized)?;
        let commands = self.commands()?;

        let pending = driver.dequeue_messages();
        let mut applied = Vec::with_capacity(pending.len());
        for message in pending {
            applied.push(apply_message(
                &self.state,
                &commands,
                self.handler.as_deref(),
                self.pid,
                message,
            ));
        }
        Ok(applied)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Begin a graceful shutdown: clear the presence, send the farewell, let
    /// Discord close the pipe. The worker exits on its own afterwards.
    pub fn shutdown(&self) -> Result<()> {
        let driver = self.driver.as_ref().ok_or(DiscordError::NotInitialized)?;
        driver.shutdown(self.pid);
        Ok(())
    }

    /// Shut down, then hard-abort and join the worker. The client cannot be
    /// reused afterwards.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(mut driver) = self.driver.take() {
            driver.shutdown(self.pid);
            driver.join();
        }
        self.disposed = true;
        log::debug!("discord client disposed");
    }

    fn commands(&self) -> Result<CommandHandle> {
        if self.disposed {
            return Err(DiscordError::Disposed);
        }
        self.driver
            .as_ref()
            .map(RpcDriver::handle)
            .ok_or(DiscordError::NotInitialized)
    }

    fn locked_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().expect("client state lock poisoned")
    }
}

impl Drop for DiscordClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Apply one message's state rules and hand it to the handler.
///
/// Runs on the worker thread in auto mode and on the calling thread inside
/// [`DiscordClient::invoke`] in manual mode. Returns the (possibly enriched)
/// message.
fn apply_message(
    state: &Mutex<ClientState>,
    commands: &CommandHandle,
    handler: Option<&EventHandler>,
    pid: u32,
    mut message: Message,
) -> Message {
    match &mut message.kind {
        MessageKind::Ready {
            user,
            configuration,
        } => {
            if let Some(user) = user.as_mut() {
                user.configuration = Some(configuration.clone());
            }

            let (presence, resubscribe) = {
                let mut locked = state.lock().expect("client state lock poisoned");
                locked.configuration = Some(configuration.clone());
                locked.user.clone_from(user);
                (
                    locked.presence.clone(),
                    locked
                        .scheme_registered
                        .then_some(locked.subscriptions)
                        .unwrap_or_default(),
                )
            };

            // Resynchronize: the new connection knows nothing about the
            // presence and subscriptions we advertised before the reconnect.
            if let Some(presence) = presence {
                let _ = commands.enqueue(Command::SetActivity {
                    pid,
                    activity: Some(presence),
                });
            }
            for event in resubscribe.server_events() {
                let _ = commands.enqueue(Command::Subscribe {
                    event,
                    unsubscribe: false,
                });
            }
        }

        MessageKind::Presence { presence } => {
            let mut locked = state.lock().expect("client state lock poisoned");
            match presence {
                Some(incoming) => {
                    let mut merged = locked.presence.clone().unwrap_or_default();
                    merged.merge(incoming);
                    locked.presence = Some(merged);
                }
                None => locked.presence = None,
            }
        }

        MessageKind::Subscribe { event } => {
            if let Some(flag) = EventFlags::from_server_event(*event) {
                state.lock().expect("client state lock poisoned").subscriptions |= flag;
            }
        }

        MessageKind::Unsubscribe { event } => {
            if let Some(flag) = EventFlags::from_server_event(*event) {
                state.lock().expect("client state lock poisoned").subscriptions &= !flag;
            }
        }

        MessageKind::JoinRequest { user } => {
            user.configuration = state
                .lock()
                .expect("client state lock poisoned")
                .configuration
                .clone();
        }

        _ => {}
    }

    if let Some(handler) = handler {
        handler(&message);
    }
    message
}

// ─── Tests ─────────────────────────────────────────────────────────────────
