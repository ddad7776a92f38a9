//! In-memory fakes standing in for TCP in tests.
//!
//! `TestSocket` is a scripted non-blocking socket: reads drain what the test
//! pushed (then report `WouldBlock`, or `Ok(0)` after `close_read`), writes
//! land in an inspectable buffer. Handles are cheap clones over shared
//! state, so a test can keep one while the server owns another.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Version};

use crate::protocol::{Method, Query, Request};
use crate::server::Listen;

#[derive(Default)]
struct SocketState {
    input: VecDeque<u8>,
    output: Vec<u8>,
    read_closed: bool,
    read_limit: Option<usize>,
    write_limit: Option<usize>,
}

/// A scripted in-memory socket.
#[derive(Clone, Default)]
pub(crate) struct TestSocket {
    state: Rc<RefCell<SocketState>>,
}

impl TestSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for the server to read.
    pub fn push_data(&self, bytes: &[u8]) {
        self.state.borrow_mut().input.extend(bytes.iter().copied());
    }

    /// Makes further reads report an orderly close once the input drains.
    pub fn close_read(&self) {
        self.state.borrow_mut().read_closed = true;
    }

    /// Caps bytes returned per read call.
    #[allow(dead_code)]
    pub fn set_read_limit(&self, limit: usize) {
        self.state.borrow_mut().read_limit = Some(limit);
    }

    /// Caps bytes consumed per write call; zero makes writes block.
    pub fn set_write_limit(&self, limit: usize) {
        self.state.borrow_mut().write_limit = Some(limit);
    }

    /// Everything the server wrote so far.
    pub fn output(&self) -> Vec<u8> {
        self.state.borrow().output.clone()
    }
}

impl io::Read for TestSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();

        if state.input.is_empty() {
            return if state.read_closed {
                Ok(0)
            } else {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "no scripted input"))
            };
        }

        let want = buf.len().min(state.read_limit.unwrap_or(usize::MAX)).min(state.input.len());
        if want == 0 {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "read limit reached"));
        }

        for slot in buf.iter_mut().take(want) {
            *slot = state.input.pop_front().unwrap();
        }
        Ok(want)
    }
}

impl io::Write for TestSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();

        let want = buf.len().min(state.write_limit.unwrap_or(usize::MAX));
        if want == 0 {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "write limit reached"));
        }

        state.output.extend_from_slice(&buf[..want]);
        Ok(want)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A scripted accept queue.
#[derive(Clone, Default)]
pub(crate) struct TestListener {
    pending: Rc<RefCell<VecDeque<TestSocket>>>,
}

impl TestListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a client the next tick will accept.
    pub fn enqueue(&self, sock: TestSocket) {
        self.pending.borrow_mut().push_back(sock);
    }
}

impl Listen for TestListener {
    type Conn = TestSocket;

    fn poll_accept(&mut self) -> io::Result<Option<(TestSocket, SocketAddr)>> {
        Ok(self.pending.borrow_mut().pop_front().map(|sock| (sock, test_peer())))
    }
}

pub(crate) fn test_peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

pub(crate) fn test_config() -> crate::server::ServerConfig {
    crate::server::ServerConfig::default()
}

/// A plain GET request for handler-level tests.
pub(crate) fn get_request(path: &str) -> Request {
    get_request_with_headers(path, &[])
}

pub(crate) fn get_request_with_headers(path: &str, headers: &[(&str, &str)]) -> Request {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(
            name.parse::<HeaderName>().unwrap(),
            value.parse::<HeaderValue>().unwrap(),
        );
    }
    Request::new(Method::Get, path.to_owned(), Query::default(), Version::HTTP_11, map, Bytes::new())
}
