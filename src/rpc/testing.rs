//! Shared test doubles for the connection engine and the client façade.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::rpc::framing::Frame;
use crate::rpc::pipe::Transport;

/// Scriptable in-memory transport shared between the worker and the test.
#[derive(Default)]
pub struct MockState {
    pub connected: bool,
    pub fail_connects: usize,
    pub connect_attempts: usize,
    pub inbound: VecDeque<Frame>,
    pub written: Vec<Frame>,
}

#[derive(Clone, Default)]
pub struct MockTransport(Arc<Mutex<MockState>>);

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    pub fn push_inbound(&self, frame: Frame) {
        self.lock().inbound.push_back(frame);
    }

    pub fn written(&self) -> Vec<Frame> {
        self.lock().written.clone()
    }

    pub fn drop_connection(&self) {
        self.lock().connected = false;
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, target: Option<u8>) -> io::Result<u8> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(io::Error::new(io::ErrorKind::NotFound, "no pipe"));
        }
        state.connected = true;
        Ok(target.unwrap_or(0))
    }

    fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        let frame = self.lock().inbound.pop_front();
        if frame.is_none() {
            // Emulate the poll window so the worker does not spin hot.
            thread::sleep(Duration::from_millis(2));
        }
        Ok(frame)
    }

    fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        }
        state.written.push(frame.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn close(&mut self) {
        self.lock().connected = false;
    }
}

/// A READY dispatch frame with a small but realistic body.
pub fn ready_frame() -> Frame {
    Frame::new(
        crate::rpc::framing::Opcode::Frame,
        br#"{"cmd":"DISPATCH","evt":"READY","data":{"v":1,
            "config":{"cdn_host":"c","api_endpoint":"a"},
            "user":{"id":"u1","username":"wumpus"}}}"#
            .to_vec(),
    )
}

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_for(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}
