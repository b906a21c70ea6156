//! Local IPC transport to the Discord desktop client.
//!
//! Discord listens on up to ten well-known endpoints, one per running client
//! instance (Stable, PTB, Canary, ...):
//!
//! - Unix/macOS: `discord-ipc-<N>` sockets under `$XDG_RUNTIME_DIR`,
//!   `$TMPDIR`, `$TMP`, `$TEMP` or `/tmp`, including the Flatpak
//!   (`app/com.discordapp.Discord/`) and Snap (`snap.discord/`) subdirectories
//! - Windows: named pipes `\\.\pipe\discord-ipc-<N>`
//!
//! The transport connects to one endpoint (a fixed index, or the first of
//! 0..=9 that accepts), then moves whole frames. Reads poll: a read that
//! produces no complete frame within the poll window returns `Ok(None)` so
//! the connection engine can interleave its write work. Connection failures
//! are reported, never retried here; the engine owns the retry policy.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::rpc::framing::{Frame, FrameDecoder, MAX_FRAME_SIZE};

/// Number of candidate endpoints.
pub const PIPE_COUNT: u8 = 10;

/// How long one read call waits for bytes before yielding.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-call read buffer size.
const READ_CHUNK_SIZE: usize = 2048;

/// Abstract framed transport the connection engine drives.
///
/// Implemented by [`PipeTransport`] for the real pipe and by in-memory fakes
/// in tests. Implementations must not retry internally.
pub trait Transport: Send {
    /// Connect to endpoint `target`, or probe 0..=9 in order when `None`.
    /// Returns the index that accepted.
    fn connect(&mut self, target: Option<u8>) -> io::Result<u8>;

    /// Read one complete frame.
    ///
    /// `Ok(None)` means no frame arrived within the poll window, or the peer
    /// closed cleanly (distinguish with [`is_connected`](Self::is_connected)).
    /// `Err` means the stream is no longer usable.
    fn read_frame(&mut self) -> io::Result<Option<Frame>>;

    /// Write one complete frame.
    fn write_frame(&mut self, frame: &Frame) -> io::Result<()>;

    /// Whether the transport believes the connection is still up.
    fn is_connected(&self) -> bool;

    /// Drop the current connection, keeping the transport reusable.
    fn close(&mut self);
}

#[cfg(unix)]
type RawPipe = std::os::unix::net::UnixStream;

#[cfg(windows)]
type RawPipe = std::fs::File;

/// Framed transport over the platform's local IPC primitive.
#[derive(Debug)]
pub struct PipeTransport {
    stream: Option<RawPipe>,
    alive: bool,
    connected_pipe: Option<u8>,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
    /// Test/packaging override for the socket directory search.
    #[cfg(unix)]
    base_dir: Option<std::path::PathBuf>,
}

impl Default for PipeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeTransport {
    /// Create a disconnected transport.
    pub fn new() -> Self {
        Self {
            stream: None,
            alive: false,
            connected_pipe: None,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            #[cfg(unix)]
            base_dir: None,
        }
    }

    /// Create a transport that only searches `dir` for sockets.
    ///
    /// Used by tests and by sandboxed packagings whose runtime dir is not
    /// discoverable through the environment.
    #[cfg(unix)]
    pub fn with_base_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        let mut transport = Self::new();
        transport.base_dir = Some(dir.into());
        transport
    }

    /// Index of the endpoint the current connection used.
    pub fn connected_pipe(&self) -> Option<u8> {
        self.connected_pipe
    }

    #[cfg(unix)]
    fn candidate_paths(&self, index: u8) -> Vec<std::path::PathBuf> {
        use std::path::PathBuf;

        let name = format!("discord-ipc-{index}");
        let mut bases: Vec<PathBuf> = Vec::new();

        if let Some(dir) = &self.base_dir {
            bases.push(dir.clone());
        } else {
            for var in ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"] {
                if let Ok(value) = std::env::var(var) {
                    if !value.is_empty() {
                        bases.push(PathBuf::from(value));
                    }
                }
            }
            bases.push(PathBuf::from("/tmp"));
        }

        let mut paths = Vec::with_capacity(bases.len() * 3);
        for base in bases {
            paths.push(base.join(&name));
            // Sandboxed Discord builds put the socket one level down.
            paths.push(base.join("app/com.discordapp.Discord").join(&name));
            paths.push(base.join("snap.discord").join(&name));
        }
        paths
    }

    #[cfg(unix)]
    fn open_pipe(&self, index: u8) -> io::Result<RawPipe> {
        let mut last_err = None;
        for path in self.candidate_paths(index) {
            match RawPipe::connect(&path) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;
                    log::debug!("connected to {}", path.display());
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no candidate socket path")
        }))
    }

    #[cfg(windows)]
    fn open_pipe(&self, index: u8) -> io::Result<RawPipe> {
        let path = format!(r"\\.\pipe\discord-ipc-{index}");
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
    }

    /// One poll-bounded read into the decoder.
    ///
    /// `Ok(0)` from here means "no bytes this window"; end-of-stream is
    /// reported by flipping `alive` off.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pipe not connected"))?;

        #[cfg(unix)]
        {
            stream.read(buf)
        }

        #[cfg(windows)]
        {
            // Blocking file handles to named pipes have no read timeout, so
            // poll for available bytes before committing to a read.
            use std::os::windows::io::AsRawHandle;
            use windows_sys::Win32::System::Pipes::PeekNamedPipe;

            let deadline = std::time::Instant::now() + READ_POLL_INTERVAL;
            loop {
                let mut available = 0u32;
                let ok = unsafe {
                    PeekNamedPipe(
                        stream.as_raw_handle() as _,
                        std::ptr::null_mut(),
                        0,
                        std::ptr::null_mut(),
                        &mut available,
                        std::ptr::null_mut(),
                    )
                };
                if ok == 0 {
                    return Err(io::Error::last_os_error());
                }
                if available > 0 {
                    return stream.read(buf);
                }
                if std::time::Instant::now() >= deadline {
                    return Err(io::Error::from(io::ErrorKind::WouldBlock));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }
}

impl Transport for PipeTransport {
    fn connect(&mut self, target: Option<u8>) -> io::Result<u8> {
        self.close();

        let candidates: Vec<u8> = match target {
            Some(index) => vec![index.min(PIPE_COUNT - 1)],
            None => (0..PIPE_COUNT).collect(),
        };

        let mut last_err = None;
        for index in candidates {
            match self.open_pipe(index) {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.alive = true;
                    self.connected_pipe = Some(index);
                    return Ok(index);
                }
                Err(e) => {
                    log::trace!("pipe {index} unavailable: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no discord ipc endpoint found")
        }))
    }

    fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        if let Some(frame) = self.ready.pop_front() {
            return Ok(Some(frame));
        }
        if !self.alive {
            return Ok(None);
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.read_chunk(&mut chunk) {
                Ok(0) => {
                    // Peer closed. Mid-frame EOF is a hard failure.
                    self.alive = false;
                    if self.decoder.has_partial() {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed inside a frame",
                        ));
                    }
                    return Ok(None);
                }
                Ok(n) => {
                    let frames = self.decoder.feed(&chunk[..n]).map_err(|e| {
                        self.alive = false;
                        io::Error::new(io::ErrorKind::InvalidData, e)
                    })?;
                    self.ready.extend(frames);
                    if let Some(frame) = self.ready.pop_front() {
                        return Ok(Some(frame));
                    }
                    // Partial frame buffered; keep reading until it completes
                    // or the poll window closes.
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::BrokenPipe
                        || e.kind() == io::ErrorKind::ConnectionReset =>
                {
                    self.alive = false;
                    return Ok(None);
                }
                Err(e) => {
                    self.alive = false;
                    return Err(e);
                }
            }
        }
    }

    fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        if frame.payload.len() > MAX_FRAME_SIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame payload of {} bytes exceeds the limit", frame.payload.len()),
            ));
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "pipe not connected"))?;

        let bytes = frame.encode();
        match stream.write_all(&bytes).and_then(|()| stream.flush()) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.alive = false;
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.alive && self.stream.is_some()
    }

    fn close(&mut self) {
        #[cfg(unix)]
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        #[cfg(windows)]
        {
            self.stream = None;
        }
        self.alive = false;
        self.connected_pipe = None;
        self.decoder.reset();
        self.ready.clear();
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::rpc::framing::Opcode;
    use std::os::unix::net::UnixListener;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "discord-presence-test-{}-{tag}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn connect_to_fixed_index() {
        let dir = temp_dir("fixed");
        let listener = UnixListener::bind(dir.join("discord-ipc-3")).unwrap();

        let mut transport = PipeTransport::with_base_dir(&dir);
        let pipe = transport.connect(Some(3)).unwrap();
        assert_eq!(pipe, 3);
        assert_eq!(transport.connected_pipe(), Some(3));
        assert!(transport.is_connected());

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn probe_finds_first_live_endpoint() {
        let dir = temp_dir("probe");
        // Endpoints 0..=1 missing; 2 is live.
        let listener = UnixListener::bind(dir.join("discord-ipc-2")).unwrap();

        let mut transport = PipeTransport::with_base_dir(&dir);
        let pipe = transport.connect(None).unwrap();
        assert_eq!(pipe, 2);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_fails_when_nothing_listens() {
        let dir = temp_dir("empty");
        let mut transport = PipeTransport::with_base_dir(&dir);
        assert!(transport.connect(None).is_err());
        assert!(!transport.is_connected());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn frame_round_trip_over_socket() {
        let dir = temp_dir("roundtrip");
        let listener = UnixListener::bind(dir.join("discord-ipc-0")).unwrap();

        let mut transport = PipeTransport::with_base_dir(&dir);
        transport.connect(Some(0)).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        // Client -> server
        let outbound = Frame::new(Opcode::Handshake, br#"{"v":1,"client_id":"1"}"#.to_vec());
        transport.write_frame(&outbound).unwrap();

        let mut buf = vec![0u8; 256];
        let n = server.read(&mut buf).unwrap();
        let mut decoder = FrameDecoder::new();
        let received = decoder.feed(&buf[..n]).unwrap();
        assert_eq!(received, vec![outbound]);

        // Server -> client
        let inbound = Frame::new(Opcode::Ping, vec![0xDE, 0xAD]);
        server.write_all(&inbound.encode()).unwrap();

        let frame = wait_for_frame(&mut transport);
        assert_eq!(frame, inbound);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_returns_none_within_poll_window() {
        let dir = temp_dir("poll");
        let listener = UnixListener::bind(dir.join("discord-ipc-0")).unwrap();

        let mut transport = PipeTransport::with_base_dir(&dir);
        transport.connect(Some(0)).unwrap();
        let _server = listener.accept().unwrap();

        assert_eq!(transport.read_frame().unwrap(), None);
        assert!(transport.is_connected());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn peer_close_is_detected() {
        let dir = temp_dir("close");
        let listener = UnixListener::bind(dir.join("discord-ipc-0")).unwrap();

        let mut transport = PipeTransport::with_base_dir(&dir);
        transport.connect(Some(0)).unwrap();
        let (server, _) = listener.accept().unwrap();
        drop(server);

        // Drain until EOF surfaces.
        let mut connected = true;
        for _ in 0..20 {
            let _ = transport.read_frame();
            if !transport.is_connected() {
                connected = false;
                break;
            }
        }
        assert!(!connected, "transport failed to notice peer close");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn eof_inside_frame_is_an_error() {
        let dir = temp_dir("shortread");
        let listener = UnixListener::bind(dir.join("discord-ipc-0")).unwrap();

        let mut transport = PipeTransport::with_base_dir(&dir);
        transport.connect(Some(0)).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        // Header promises 100 payload bytes but only 3 arrive before close.
        let mut partial = Vec::new();
        partial.extend_from_slice(&1u32.to_le_bytes());
        partial.extend_from_slice(&100u32.to_le_bytes());
        partial.extend_from_slice(&[1, 2, 3]);
        server.write_all(&partial).unwrap();
        drop(server);

        let mut saw_error = false;
        for _ in 0..20 {
            match transport.read_frame() {
                Err(e) => {
                    assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof);
                    saw_error = true;
                    break;
                }
                Ok(Some(_)) => panic!("partial frame must not decode"),
                Ok(None) => {}
            }
        }
        assert!(saw_error, "mid-frame EOF was not reported");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn oversized_outbound_frame_rejected() {
        let dir = temp_dir("oversize");
        let listener = UnixListener::bind(dir.join("discord-ipc-0")).unwrap();

        let mut transport = PipeTransport::with_base_dir(&dir);
        transport.connect(Some(0)).unwrap();
        let _server = listener.accept().unwrap();

        let frame = Frame::new(Opcode::Frame, vec![0u8; MAX_FRAME_SIZE as usize + 1]);
        let err = transport.write_frame(&frame).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        // The connection itself is untouched.
        assert!(transport.is_connected());
        let _ = std::fs::remove_dir_all(&dir);
    }

    fn wait_for_frame(transport: &mut PipeTransport) -> Frame {
        for _ in 0..40 {
            if let Some(frame) = transport.read_frame().unwrap() {
                return frame;
            }
        }
        panic!("no frame arrived within the poll window");
    }
}
