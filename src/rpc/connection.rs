//! The RPC connection engine.
//!
//! One dedicated worker thread owns the transport and the protocol state
//! machine. Callers never touch the pipe: they enqueue [`Command`]s through a
//! [`CommandHandle`] and consume [`Message`]s from the inbound queue or a
//! callback.
//!
//! ```text
//! caller threads                     worker thread
//! ┌──────────────────┐              ┌────────────────────────────────────┐
//! │ CommandHandle    │─outbound────▶│ connect ─▶ handshake ─▶ inner loop │
//! │   .enqueue(cmd)  │   queue      │   read_frame ─▶ dispatch           │
//! │                  │◀─inbound─────│   write-drain (nonce, envelope)    │
//! │ invoke()/handler │   queue      │   wait(signal, 1s)                 │
//! └──────────────────┘              │ on drop: backoff ─▶ reconnect      │
//!                                   └────────────────────────────────────┘
//! ```
//!
//! Graceful shutdown replaces the outbound queue with a clear-presence
//! command and a farewell sentinel; the worker transmits both, sends the
//! handshake body under `Opcode::Close` ("handwave"), and exits without
//! reconnecting. Abort drops everything and exits at the next suspension
//! point.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{DiscordError, Result};
use crate::models::Configuration;
use crate::rpc::backoff::ReconnectBackoff;
use crate::rpc::command::{Command, HandshakeBody};
use crate::rpc::framing::{Frame, Opcode};
use crate::rpc::message::{Message, MessageKind};
use crate::rpc::payload::{
    AuthenticateData, AuthorizeData, ClosePayload, CommandKind, ErrorData, EventPayload,
    JoinRequestData, PresenceData, ReadyData, SecretData, ServerEvent, SubscriptionData,
    VoiceSettingsData,
};
use crate::rpc::pipe::Transport;
use crate::rpc::queue::{BoundedQueue, QueueSignal};

/// Default wait on the queue-update signal between loop iterations.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Protocol connection state, owned by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcState {
    /// No transport connection.
    Disconnected,
    /// Handshake written, waiting for READY.
    Connecting,
    /// READY received; commands flow.
    Connected,
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionOptions {
    /// Application id for the handshake.
    pub client_id: String,
    /// Fixed endpoint index, or `None` to probe 0..=9.
    pub target_pipe: Option<u8>,
    /// Queue-signal wait per loop iteration.
    pub poll_timeout: Duration,
    /// Reconnect delay policy.
    pub backoff: ReconnectBackoff,
}

/// Where the worker delivers translated messages.
pub(crate) enum MessageSink {
    /// Push into the inbound queue for [`invoke`](crate::DiscordClient::invoke).
    Queue,
    /// Invoke synchronously on the worker thread (auto-events mode).
    Callback(Box<dyn Fn(Message) + Send>),
}

/// State shared between the worker and caller threads.
pub(crate) struct ConnShared {
    outbound: BoundedQueue<Command>,
    inbound: BoundedQueue<Message>,
    signal: QueueSignal,
    state: Mutex<RpcState>,
    configuration: Mutex<Option<Configuration>>,
    abort: AtomicBool,
    shutdown: AtomicBool,
    next_nonce: AtomicU64,
}

impl ConnShared {
    pub fn new(outbound_capacity: usize, inbound_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            outbound: BoundedQueue::new(outbound_capacity, "outbound command"),
            inbound: BoundedQueue::new(inbound_capacity, "inbound message"),
            signal: QueueSignal::new(),
            state: Mutex::new(RpcState::Disconnected),
            configuration: Mutex::new(None),
            abort: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            next_nonce: AtomicU64::new(1),
        })
    }

    pub fn state(&self) -> RpcState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, state: RpcState) {
        let mut guard = self.state.lock().expect("state lock poisoned");
        if *guard != state {
            log::debug!("rpc state {:?} -> {:?}", *guard, state);
            *guard = state;
        }
    }

    pub fn configuration(&self) -> Option<Configuration> {
        self.configuration
            .lock()
            .expect("configuration lock poisoned")
            .clone()
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn take_nonce(&self) -> u64 {
        self.next_nonce.fetch_add(1, Ordering::SeqCst)
    }
}

/// Cloneable command entry point shared with the façade.
#[derive(Clone)]
pub(crate) struct CommandHandle {
    shared: Arc<ConnShared>,
}

impl CommandHandle {
    pub(crate) fn new(shared: Arc<ConnShared>) -> Self {
        Self { shared }
    }

    /// Queue a command for transmission and wake the worker.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` once graceful shutdown or abort has started.
    pub fn enqueue(&self, command: Command) -> Result<()> {
        if self.shared.shutting_down() || self.shared.aborted() {
            return Err(DiscordError::ShuttingDown);
        }
        if !self.shared.outbound.push(command) {
            // Drop-oldest already happened inside the queue; the caller is
            // producing faster than the pipe drains.
            log::error!("outbound command queue overflow, oldest command dropped");
        }
        self.shared.signal.notify();
        Ok(())
    }
}

/// Handle to the worker thread plus its shared state.
pub(crate) struct RpcDriver {
    shared: Arc<ConnShared>,
    worker: Option<JoinHandle<()>>,
}

impl RpcDriver {
    /// Start the worker.
    pub fn spawn(
        shared: Arc<ConnShared>,
        options: ConnectionOptions,
        transport: Box<dyn Transport>,
        sink: MessageSink,
    ) -> Self {
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("discord-rpc".into())
            .spawn(move || worker_loop(worker_shared, options, transport, sink))
            .expect("failed to spawn rpc worker thread");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    pub fn handle(&self) -> CommandHandle {
        CommandHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> RpcState {
        self.shared.state()
    }

    pub fn configuration(&self) -> Option<Configuration> {
        self.shared.configuration()
    }

    /// Atomically drain the inbound queue.
    pub fn dequeue_messages(&self) -> Vec<Message> {
        self.shared.inbound.dequeue_all()
    }

    /// Begin graceful shutdown: the pending queue is replaced by a
    /// clear-presence command and the farewell sentinel, and no further user
    /// commands are accepted.
    pub fn shutdown(&self, pid: u32) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("rpc shutdown requested");
        self.shared.outbound.replace(vec![
            Command::SetActivity {
                pid,
                activity: None,
            },
            Command::Close,
        ]);
        self.shared.signal.notify();
    }

    /// Hard abort: pending commands are dropped and the worker exits at its
    /// next suspension point.
    pub fn abort(&self) {
        if !self.shared.abort.swap(true, Ordering::SeqCst) {
            log::info!("rpc abort requested");
        }
        self.shared.signal.notify();
    }

    /// Abort and join the worker.
    pub fn join(&mut self) {
        self.abort();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for RpcDriver {
    fn drop(&mut self) {
        self.join();
    }
}

// ─── Worker ────────────────────────────────────────────────────────────────

/// How the inner loop ended, deciding whether the outer loop reconnects.
enum InnerExit {
    /// Transport dropped or protocol error; reconnect unless flagged off.
    Disconnected,
    /// The handwave went out; never reconnect.
    Farewell,
    /// Shutdown requested before the connection reached Connected.
    Shutdown,
    /// Abort flag observed.
    Abort,
}

enum DrainOutcome {
    /// Queue empty or nothing transmittable.
    Idle,
    /// Farewell written; leave the connection.
    Farewell,
    /// A write failed; head command stays queued for after the reconnect.
    WriteFailed,
}

fn deliver(shared: &ConnShared, sink: &MessageSink, kind: MessageKind) {
    let message = Message::new(kind);
    match sink {
        MessageSink::Queue => {
            shared.inbound.push(message);
        }
        MessageSink::Callback(callback) => callback(message),
    }
}

/// Sleep `duration` in small slices, bailing early on abort or shutdown.
/// Returns `true` when the sleep was interrupted.
fn interruptible_sleep(shared: &ConnShared, duration: Duration) -> bool {
    let slice = Duration::from_millis(100);
    let mut elapsed = Duration::ZERO;
    while elapsed < duration {
        if shared.aborted() || shared.shutting_down() {
            return true;
        }
        let step = slice.min(duration - elapsed);
        thread::sleep(step);
        elapsed += step;
    }
    shared.aborted() || shared.shutting_down()
}

fn worker_loop(
    shared: Arc<ConnShared>,
    options: ConnectionOptions,
    mut transport: Box<dyn Transport>,
    sink: MessageSink,
) {
    let handshake = HandshakeBody::new(&options.client_id);
    let mut backoff = options.backoff.clone();
    log::debug!("rpc worker started (client_id={})", options.client_id);

    while !shared.aborted() && !shared.shutting_down() {
        // Connect, or back off.
        let pipe = match transport.connect(options.target_pipe) {
            Ok(pipe) => pipe,
            Err(e) => {
                let attempted = options.target_pipe.unwrap_or(0);
                log::debug!("pipe connect failed: {e}");
                deliver(
                    &shared,
                    &sink,
                    MessageKind::ConnectionFailed { pipe: attempted },
                );
                if interruptible_sleep(&shared, backoff.next_delay()) {
                    break;
                }
                continue;
            }
        };

        log::info!("connected to discord ipc pipe {pipe}");
        deliver(&shared, &sink, MessageKind::ConnectionEstablished { pipe });

        // Handshake; only a successful write moves us to Connecting.
        let frame = match Frame::json(Opcode::Handshake, &handshake) {
            Ok(frame) => frame,
            Err(e) => {
                // Serializing two strings cannot fail in practice; treat it
                // as fatal rather than hot-looping.
                log::error!("handshake serialization failed: {e}");
                shared.abort.store(true, Ordering::SeqCst);
                break;
            }
        };
        if let Err(e) = transport.write_frame(&frame) {
            log::warn!("handshake write failed: {e}");
            transport.close();
            if interruptible_sleep(&shared, backoff.next_delay()) {
                break;
            }
            continue;
        }
        shared.set_state(RpcState::Connecting);

        let exit = inner_loop(
            &shared,
            transport.as_mut(),
            &sink,
            &options,
            &mut backoff,
            &handshake,
        );

        transport.close();
        shared.set_state(RpcState::Disconnected);

        match exit {
            InnerExit::Farewell => {
                log::info!("farewell sent, rpc worker leaving");
                break;
            }
            InnerExit::Shutdown | InnerExit::Abort => break,
            InnerExit::Disconnected => {
                if shared.shutting_down() {
                    break;
                }
                log::info!("connection lost, reconnecting");
                if interruptible_sleep(&shared, backoff.next_delay()) {
                    break;
                }
            }
        }
    }

    transport.close();
    shared.set_state(RpcState::Disconnected);
    log::debug!("rpc worker exited");
}

fn inner_loop(
    shared: &ConnShared,
    transport: &mut dyn Transport,
    sink: &MessageSink,
    options: &ConnectionOptions,
    backoff: &mut ReconnectBackoff,
    handshake: &HandshakeBody,
) -> InnerExit {
    let mut mainloop = true;

    while mainloop && !shared.aborted() && transport.is_connected() {
        let mut had_frame = false;

        match transport.read_frame() {
            Ok(Some(frame)) => {
                had_frame = true;
                match frame.opcode {
                    Opcode::Close => {
                        let close: ClosePayload = serde_json::from_slice(&frame.payload)
                            .unwrap_or_else(|e| {
                                log::warn!("malformed close payload: {e}");
                                ClosePayload {
                                    code: 0,
                                    message: String::new(),
                                }
                            });
                        log::info!("server closed connection: {} {}", close.code, close.message);
                        deliver(
                            shared,
                            sink,
                            MessageKind::Close {
                                code: close.code,
                                reason: close.message,
                            },
                        );
                        mainloop = false;
                    }
                    Opcode::Ping => {
                        let pong = Frame::new(Opcode::Pong, frame.payload);
                        if let Err(e) = transport.write_frame(&pong) {
                            log::warn!("pong write failed: {e}");
                            mainloop = false;
                        }
                    }
                    Opcode::Pong => {}
                    Opcode::Frame => {
                        if shared.shutting_down() {
                            // Responses during the farewell window are noise.
                        } else {
                            handle_event_frame(shared, sink, &frame.payload, backoff);
                        }
                    }
                    Opcode::Handshake => {
                        log::warn!("unexpected handshake opcode from server, dropping connection");
                        mainloop = false;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::debug!("transport read failed: {e}");
                mainloop = false;
            }
        }

        if !mainloop || shared.aborted() || !transport.is_connected() {
            break;
        }

        match write_drain(shared, transport, handshake) {
            DrainOutcome::Farewell => return InnerExit::Farewell,
            DrainOutcome::WriteFailed => break,
            DrainOutcome::Idle => {}
        }

        if shared.shutting_down() && shared.state() != RpcState::Connected {
            // Nothing to say goodbye with before READY; just leave.
            return InnerExit::Shutdown;
        }

        // Only park when the wire went quiet; back-to-back frames are
        // dispatched without waiting out the poll interval.
        if !had_frame {
            shared.signal.wait_timeout(options.poll_timeout);
        }
    }

    if shared.aborted() {
        InnerExit::Abort
    } else {
        InnerExit::Disconnected
    }
}

/// Decode and route one `Opcode::Frame` payload.
fn handle_event_frame(
    shared: &ConnShared,
    sink: &MessageSink,
    payload_bytes: &[u8],
    backoff: &mut ReconnectBackoff,
) {
    let payload: EventPayload = match serde_json::from_slice(payload_bytes) {
        Ok(payload) => payload,
        Err(e) => {
            log::warn!("dropping malformed frame payload: {e}");
            return;
        }
    };

    match shared.state() {
        RpcState::Connecting => {
            if payload.cmd == CommandKind::Dispatch && payload.evt == Some(ServerEvent::Ready) {
                match payload.data_as::<ReadyData>() {
                    Ok(ready) => {
                        *shared
                            .configuration
                            .lock()
                            .expect("configuration lock poisoned") = Some(ready.config.clone());
                        shared.set_state(RpcState::Connected);
                        backoff.reset();
                        log::info!("discord rpc ready (protocol v{})", ready.v);
                        deliver(
                            shared,
                            sink,
                            MessageKind::Ready {
                                user: ready.user,
                                configuration: ready.config,
                            },
                        );
                    }
                    Err(e) => log::warn!("malformed READY payload: {e}"),
                }
            } else {
                log::trace!("ignoring {:?} while connecting", payload.cmd);
            }
        }
        RpcState::Connected => route_response(shared, sink, payload),
        RpcState::Disconnected => {
            log::trace!("ignoring {:?} while disconnected", payload.cmd);
        }
    }
}

/// Dispatch a Connected-state payload to its message.
fn route_response(shared: &ConnShared, sink: &MessageSink, payload: EventPayload) {
    // A server-side error can ride on any command; it never changes state.
    if payload.evt == Some(ServerEvent::Error) {
        match payload.data_as::<ErrorData>() {
            Ok(err) => {
                log::warn!("server error {}: {}", err.code, err.message);
                deliver(
                    shared,
                    sink,
                    MessageKind::Error {
                        code: err.code,
                        message: err.message,
                    },
                );
            }
            Err(e) => log::warn!("malformed error payload: {e}"),
        }
        return;
    }

    match payload.cmd {
        CommandKind::Dispatch => match payload.evt {
            Some(ServerEvent::ActivityJoin) => match payload.data_as::<SecretData>() {
                Ok(data) => deliver(shared, sink, MessageKind::Join { secret: data.secret }),
                Err(e) => log::warn!("malformed join payload: {e}"),
            },
            Some(ServerEvent::ActivitySpectate) => match payload.data_as::<SecretData>() {
                Ok(data) => deliver(shared, sink, MessageKind::Spectate { secret: data.secret }),
                Err(e) => log::warn!("malformed spectate payload: {e}"),
            },
            Some(ServerEvent::ActivityJoinRequest) => {
                match payload.data_as::<JoinRequestData>() {
                    Ok(data) => deliver(shared, sink, MessageKind::JoinRequest { user: data.user }),
                    Err(e) => log::warn!("malformed join request payload: {e}"),
                }
            }
            Some(ServerEvent::Ready) => log::trace!("duplicate READY ignored"),
            other => log::debug!("dropping dispatch for unhandled event {other:?}"),
        },
        CommandKind::SetActivity => match payload.data_as::<PresenceData>() {
            Ok(presence) => deliver(shared, sink, MessageKind::Presence { presence }),
            Err(e) => log::warn!("malformed presence response: {e}"),
        },
        CommandKind::Authorize => match payload.data_as::<AuthorizeData>() {
            Ok(data) => deliver(shared, sink, MessageKind::Authorize { code: data.code }),
            Err(e) => log::warn!("malformed authorize response: {e}"),
        },
        CommandKind::Authenticate => match payload.data_as::<AuthenticateData>() {
            Ok(data) => deliver(
                shared,
                sink,
                MessageKind::Authenticate {
                    user: data.user,
                    scopes: data.scopes,
                    expires: data.expires,
                    application: data.application,
                },
            ),
            Err(e) => log::warn!("malformed authenticate response: {e}"),
        },
        CommandKind::GetVoiceSettings | CommandKind::SetVoiceSettings => {
            match payload.data_as::<VoiceSettingsData>() {
                Ok(settings) => deliver(shared, sink, MessageKind::VoiceSettings { settings }),
                Err(e) => log::warn!("malformed voice settings response: {e}"),
            }
        }
        CommandKind::Subscribe | CommandKind::Unsubscribe => {
            // The acknowledged event sits in `evt` or inside `data` depending
            // on client version; accept both.
            let event = payload
                .evt
                .or_else(|| payload.data_as::<SubscriptionData>().ok().map(|d| d.evt));
            match event {
                Some(event) => {
                    let kind = if payload.cmd == CommandKind::Subscribe {
                        MessageKind::Subscribe { event }
                    } else {
                        MessageKind::Unsubscribe { event }
                    };
                    deliver(shared, sink, kind);
                }
                None => log::warn!("subscription ack without an event"),
            }
        }
        CommandKind::SendActivityJoinInvite | CommandKind::CloseActivityJoinRequest => {
            log::debug!("join response acknowledged");
        }
        CommandKind::Unknown => log::debug!("dropping payload with unknown command"),
    }
}

/// Transmit queued commands until the queue is empty, a write fails, or the
/// farewell goes out.
fn write_drain(
    shared: &ConnShared,
    transport: &mut dyn Transport,
    handshake: &HandshakeBody,
) -> DrainOutcome {
    while transport.is_connected() && shared.state() == RpcState::Connected {
        let Some(command) = shared.outbound.peek() else {
            return DrainOutcome::Idle;
        };

        if matches!(command, Command::Close) {
            let farewell = match Frame::json(Opcode::Close, handshake) {
                Ok(frame) => frame,
                Err(e) => {
                    log::error!("farewell serialization failed: {e}");
                    shared.outbound.pop();
                    return DrainOutcome::Farewell;
                }
            };
            if let Err(e) = transport.write_frame(&farewell) {
                log::warn!("farewell write failed: {e}");
            }
            shared.outbound.pop();
            return DrainOutcome::Farewell;
        }

        if shared.aborted() {
            // Do not transmit on a dying client.
            shared.outbound.pop();
            continue;
        }

        let nonce = shared.take_nonce();
        let frame = match command.to_frame(nonce) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("command serialization failed, dropping: {e}");
                shared.outbound.pop();
                continue;
            }
        };

        match transport.write_frame(&frame) {
            Ok(()) => {
                log::debug!("sent {:?} (nonce {nonce})", command.kind());
                shared.outbound.pop();
            }
            Err(e) => {
                log::warn!("command write failed, retrying after reconnect: {e}");
                return DrainOutcome::WriteFailed;
            }
        }
    }
    DrainOutcome::Idle
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::testing::{ready_frame, wait_for, MockTransport};

    fn test_options() -> ConnectionOptions {
        ConnectionOptions {
            client_id: "123".into(),
            target_pipe: None,
            poll_timeout: Duration::from_millis(20),
            backoff: ReconnectBackoff::new(
                Duration::from_millis(10),
                Duration::from_millis(40),
            ),
        }
    }

    fn spawn_driver(transport: MockTransport) -> RpcDriver {
        let shared = ConnShared::new(64, 64);
        RpcDriver::spawn(
            shared,
            test_options(),
            Box::new(transport),
            MessageSink::Queue,
        )
    }

    #[test]
    fn handshake_then_ready_reaches_connected() {
        let transport = MockTransport::new();
        let driver = spawn_driver(transport.clone());

        wait_for(|| !transport.written().is_empty(), "handshake write");
        let written = transport.written();
        assert_eq!(written[0].opcode, Opcode::Handshake);
        let body: serde_json::Value = serde_json::from_slice(&written[0].payload).unwrap();
        assert_eq!(body["v"], 1);
        assert_eq!(body["client_id"], "123");
        wait_for(|| driver.state() == RpcState::Connecting, "connecting state");

        transport.push_inbound(ready_frame());
        wait_for(|| driver.state() == RpcState::Connected, "connected state");

        let messages = driver.dequeue_messages();
        assert!(matches!(
            messages[0].kind,
            MessageKind::ConnectionEstablished { pipe: 0 }
        ));
        assert!(
            matches!(&messages[1].kind, MessageKind::Ready { user: Some(u), configuration }
                if u.id == "u1" && configuration.cdn_host == "c")
        );
        assert!(driver.configuration().is_some());
    }

    #[test]
    fn connect_failure_surfaces_and_retries() {
        let transport = MockTransport::new();
        transport.lock().fail_connects = 2;
        let driver = spawn_driver(transport.clone());

        wait_for(
            || transport.lock().connect_attempts >= 3,
            "retry after failures",
        );
        wait_for(|| driver.state() == RpcState::Connecting, "eventual connect");

        let messages = driver.dequeue_messages();
        let failures = messages
            .iter()
            .filter(|m| matches!(m.kind, MessageKind::ConnectionFailed { pipe: 0 }))
            .count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn ping_answered_with_identical_payload() {
        let transport = MockTransport::new();
        let driver = spawn_driver(transport.clone());

        wait_for(|| !transport.written().is_empty(), "handshake write");
        transport.push_inbound(Frame::new(Opcode::Ping, vec![0xDE, 0xAD]));

        wait_for(
            || {
                transport
                    .written()
                    .iter()
                    .any(|f| f.opcode == Opcode::Pong)
            },
            "pong reply",
        );
        let written = transport.written();
        let pong = written.iter().find(|f| f.opcode == Opcode::Pong).unwrap();
        assert_eq!(pong.payload, vec![0xDE, 0xAD]);
        drop(driver);
    }

    #[test]
    fn commands_are_sent_with_increasing_nonces() {
        let transport = MockTransport::new();
        let driver = spawn_driver(transport.clone());

        wait_for(|| !transport.written().is_empty(), "handshake write");
        transport.push_inbound(ready_frame());
        wait_for(|| driver.state() == RpcState::Connected, "connected state");

        let handle = driver.handle();
        handle.enqueue(Command::GetVoiceSettings).unwrap();
        handle
            .enqueue(Command::Authenticate {
                access_token: "tok".into(),
            })
            .unwrap();

        wait_for(
            || {
                transport
                    .written()
                    .iter()
                    .filter(|f| f.opcode == Opcode::Frame)
                    .count()
                    >= 2
            },
            "commands written",
        );

        let written = transport.written();
        let nonces: Vec<String> = written
            .iter()
            .filter(|f| f.opcode == Opcode::Frame)
            .map(|f| {
                let value: serde_json::Value = serde_json::from_slice(&f.payload).unwrap();
                value["nonce"].as_str().unwrap().to_owned()
            })
            .collect();
        assert_eq!(nonces, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn server_error_event_does_not_drop_connection() {
        let transport = MockTransport::new();
        let driver = spawn_driver(transport.clone());

        wait_for(|| !transport.written().is_empty(), "handshake write");
        transport.push_inbound(ready_frame());
        wait_for(|| driver.state() == RpcState::Connected, "connected state");

        transport.push_inbound(Frame::new(
            Opcode::Frame,
            br#"{"cmd":"SET_ACTIVITY","evt":"ERROR","nonce":"1",
                "data":{"code":4002,"message":"nope"}}"#
                .to_vec(),
        ));

        wait_for(
            || {
                driver
                    .dequeue_messages()
                    .iter()
                    .any(|m| matches!(m.kind, MessageKind::Error { code: 4002, .. }))
            },
            "error message",
        );
        assert_eq!(driver.state(), RpcState::Connected);
    }

    #[test]
    fn malformed_json_payload_is_dropped_quietly() {
        let transport = MockTransport::new();
        let driver = spawn_driver(transport.clone());

        wait_for(|| !transport.written().is_empty(), "handshake write");
        transport.push_inbound(ready_frame());
        wait_for(|| driver.state() == RpcState::Connected, "connected state");

        transport.push_inbound(Frame::new(Opcode::Frame, b"{not json".to_vec()));
        transport.push_inbound(Frame::new(
            Opcode::Frame,
            br#"{"cmd":"SET_ACTIVITY","nonce":"1","data":null}"#.to_vec(),
        ));

        // The frame after the bad one still arrives: the connection survived.
        wait_for(
            || {
                driver
                    .dequeue_messages()
                    .iter()
                    .any(|m| matches!(m.kind, MessageKind::Presence { presence: None }))
            },
            "presence after malformed frame",
        );
        assert_eq!(driver.state(), RpcState::Connected);
    }

    #[test]
    fn close_frame_triggers_reconnect() {
        let transport = MockTransport::new();
        let driver = spawn_driver(transport.clone());

        wait_for(|| !transport.written().is_empty(), "handshake write");
        transport.push_inbound(ready_frame());
        wait_for(|| driver.state() == RpcState::Connected, "connected state");

        let attempts_before = transport.lock().connect_attempts;
        transport.push_inbound(Frame::new(
            Opcode::Close,
            br#"{"code":4000,"message":"going away"}"#.to_vec(),
        ));

        wait_for(
            || transport.lock().connect_attempts > attempts_before,
            "reconnect after close",
        );
        let messages = driver.dequeue_messages();
        assert!(messages
            .iter()
            .any(|m| matches!(&m.kind, MessageKind::Close { code: 4000, reason } if reason == "going away")));
    }

    #[test]
    fn shutdown_sends_clear_presence_then_handwave() {
        let transport = MockTransport::new();
        let driver = spawn_driver(transport.clone());

        wait_for(|| !transport.written().is_empty(), "handshake write");
        transport.push_inbound(ready_frame());
        wait_for(|| driver.state() == RpcState::Connected, "connected state");

        driver.shutdown(777);
        assert!(matches!(
            driver.handle().enqueue(Command::GetVoiceSettings),
            Err(DiscordError::ShuttingDown)
        ));

        wait_for(
            || {
                transport
                    .written()
                    .iter()
                    .any(|f| f.opcode == Opcode::Close)
            },
            "handwave write",
        );

        let written = transport.written();
        let frames: Vec<&Frame> = written
            .iter()
            .filter(|f| f.opcode != Opcode::Handshake)
            .collect();
        // Clear-presence first, then the farewell carrying the handshake body.
        let clear: serde_json::Value = serde_json::from_slice(&frames[0].payload).unwrap();
        assert_eq!(clear["cmd"], "SET_ACTIVITY");
        assert_eq!(clear["args"]["pid"], 777);
        assert_eq!(clear["args"]["activity"], serde_json::Value::Null);

        let farewell = frames[1];
        assert_eq!(farewell.opcode, Opcode::Close);
        let body: serde_json::Value = serde_json::from_slice(&farewell.payload).unwrap();
        assert_eq!(body["client_id"], "123");

        // Worker exits without reconnecting.
        let attempts = transport.lock().connect_attempts;
        thread::sleep(Duration::from_millis(100));
        assert_eq!(transport.lock().connect_attempts, attempts);
    }

    #[test]
    fn abort_drops_queued_commands() {
        let transport = MockTransport::new();
        let mut driver = spawn_driver(transport.clone());

        wait_for(|| !transport.written().is_empty(), "handshake write");
        transport.push_inbound(ready_frame());
        wait_for(|| driver.state() == RpcState::Connected, "connected state");

        driver.join();

        // Only handshake and possibly already-drained frames were written;
        // nothing new goes out after abort.
        let written_after = transport.written().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(transport.written().len(), written_after);
        assert_eq!(driver.state(), RpcState::Disconnected);
    }

    #[test]
    fn transport_loss_reconnects_with_fresh_handshake() {
        let transport = MockTransport::new();
        let driver = spawn_driver(transport.clone());

        wait_for(|| !transport.written().is_empty(), "handshake write");
        transport.push_inbound(ready_frame());
        wait_for(|| driver.state() == RpcState::Connected, "connected state");

        transport.drop_connection();
        wait_for(
            || {
                transport
                    .written()
                    .iter()
                    .filter(|f| f.opcode == Opcode::Handshake)
                    .count()
                    >= 2
            },
            "second handshake",
        );
        transport.push_inbound(ready_frame());
        wait_for(|| driver.state() == RpcState::Connected, "reconnected");
    }
}
