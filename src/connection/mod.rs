//! The per-client connection coroutine.
//!
//! A connection advances through the request lifecycle one bounded step per
//! [`Connection::poll`] call: at most one non-blocking read or write attempt
//! plus a small amount of parsing work. The scheduler calls `poll` once per
//! tick for every live connection, so no client can stall another.

mod reader;
mod writer;

pub(crate) use reader::BoundedReader;
pub(crate) use writer::{ResponseWriter, WriteSink};

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use http::StatusCode;
use tracing::{error, info, trace, warn};

use crate::codec::{DecodePhase, RequestDecoder};
use crate::protocol::{HttpError, Request, Response};
use crate::router::{RouteKind, Router};
use crate::server::ServerConfig;
use crate::step::Step;
use crate::websocket::{upgrade_response, WsDriver, WsHandler};

/// The socket seam: call-level non-blocking reads and writes, with
/// `ErrorKind::WouldBlock` as the suspend signal. Blanket-implemented for
/// everything `io::Read + io::Write`, TCP streams and test fakes alike.
pub(crate) trait Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

impl<T: io::Read + io::Write> Transport for T {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(self, buf)
    }
}

/// Observable lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    ReadingRequestLine,
    ReadingHeaders,
    ReadingBody,
    Dispatching,
    WritingResponse,
    WsOpen,
    Closing,
    Closed,
}

pub(crate) struct Limits {
    head: usize,
    body: usize,
    timeout: Duration,
}

/// One accepted client: socket, buffers, deadline and the state machine.
pub struct Connection<S> {
    sock: S,
    peer: SocketAddr,
    deadline: Option<Instant>,
    limits: Limits,
    reader: BoundedReader,
    sink: WriteSink,
    decoder: RequestDecoder,
    state: State,
}

enum State {
    Reading,
    Dispatching { request: Request },
    Writing { writer: ResponseWriter, keep_alive: bool, upgrade: Option<Box<dyn WsHandler>> },
    WsOpen { driver: WsDriver },
    Closing,
    Closed,
}

impl<S: io::Read + io::Write> Connection<S> {
    pub(crate) fn new(sock: S, peer: SocketAddr, config: &ServerConfig, now: Instant) -> Self {
        Self {
            sock,
            peer,
            deadline: Some(now + config.request_timeout),
            limits: Limits {
                head: config.max_request_line_size,
                body: config.max_body_bytes,
                timeout: config.request_timeout,
            },
            reader: BoundedReader::new(config.recv_buffer_size, config.max_request_line_size),
            sink: WriteSink::new(config.send_buffer_size),
            decoder: RequestDecoder::new(config.max_request_line_size, config.max_body_bytes),
            state: State::Reading,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        match &self.state {
            State::Reading => match self.decoder.phase() {
                DecodePhase::RequestLine => ConnectionState::ReadingRequestLine,
                DecodePhase::Headers => ConnectionState::ReadingHeaders,
                DecodePhase::Body => ConnectionState::ReadingBody,
            },
            State::Dispatching { .. } => ConnectionState::Dispatching,
            State::Writing { .. } => ConnectionState::WritingResponse,
            State::WsOpen { .. } => ConnectionState::WsOpen,
            State::Closing => ConnectionState::Closing,
            State::Closed => ConnectionState::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Forces the connection toward `Closing`, flushing what it can.
    pub(crate) fn begin_close(&mut self, now: Instant) {
        if !matches!(self.state, State::Closed) {
            self.state = self.enter_closing(now);
        }
    }

    /// Advances the connection by exactly one step.
    pub(crate) fn poll(&mut self, now: Instant, router: &Router) {
        let state = mem::replace(&mut self.state, State::Closed);
        self.state = match state {
            State::Reading => self.step_read(now),
            State::Dispatching { request } => self.step_dispatch(request, now, router),
            State::Writing { writer, keep_alive, upgrade } => {
                self.step_write(writer, keep_alive, upgrade, now)
            }
            State::WsOpen { driver } => self.step_ws(driver, now),
            State::Closing => self.step_closing(now),
            State::Closed => State::Closed,
        };
    }

    /// One read attempt, with a decode pass before and after so a request
    /// completes on the step that receives its last byte.
    fn step_read(&mut self, now: Instant) -> State {
        match self.decoder.decode(self.reader.buffer()) {
            Ok(Some(request)) => return State::Dispatching { request },
            Ok(None) => {}
            Err(e) => return self.fail_pre_response(e, now),
        }

        let cap = match self.decoder.phase() {
            DecodePhase::RequestLine | DecodePhase::Headers => self.limits.head,
            DecodePhase::Body => self.limits.body,
        };

        match self.reader.poll_fill(&mut self.sock, now, self.deadline, cap) {
            Ok(Step::Ready(_)) => match self.decoder.decode(self.reader.buffer()) {
                Ok(Some(request)) => State::Dispatching { request },
                Ok(None) => State::Reading,
                Err(e) => self.fail_pre_response(e, now),
            },
            Ok(Step::Pending) => State::Reading,
            Err(e) => self.fail_pre_response(e, now),
        }
    }

    fn step_dispatch(&mut self, request: Request, now: Instant, router: &Router) -> State {
        trace!(peer = %self.peer, method = %request.method(), path = request.path(), "dispatching");

        match router.at(request.method(), request.path()) {
            Some(RouteKind::Http(handler)) => match handler(&request) {
                Ok(response) => self.start_response(&request, response),
                Err(cause) => {
                    error!(peer = %self.peer, error = %cause, "handler failed");
                    self.start_error_response(StatusCode::INTERNAL_SERVER_ERROR)
                }
            },

            Some(RouteKind::Websocket(factory)) => {
                // the decoder only labels a request WEBSOCKET when the key
                // header is present
                let Some(key) = request.header("sec-websocket-key") else {
                    return self.start_error_response(StatusCode::BAD_REQUEST);
                };
                let response = upgrade_response(key);
                let session = factory(&request);
                let writer = ResponseWriter::new(response, true, &mut self.sink);
                State::Writing { writer, keep_alive: false, upgrade: Some(session) }
            }

            None => self.start_response(&request, Response::not_found()),
        }
    }

    fn step_write(
        &mut self,
        mut writer: ResponseWriter,
        keep_alive: bool,
        upgrade: Option<Box<dyn WsHandler>>,
        now: Instant,
    ) -> State {
        match writer.poll_write(&mut self.sock, &mut self.sink, now, self.deadline) {
            Ok(Step::Pending) => State::Writing { writer, keep_alive, upgrade },
            Ok(Step::Ready(())) => {
                if let Some(session) = upgrade {
                    info!(peer = %self.peer, "websocket established");
                    // sessions outlive the request deadline
                    self.deadline = None;
                    State::WsOpen { driver: WsDriver::new(session, self.limits.body) }
                } else if keep_alive {
                    self.deadline = Some(now + self.limits.timeout);
                    State::Reading
                } else {
                    self.enter_closing(now)
                }
            }
            Err(error) => {
                warn!(peer = %self.peer, %error, "response write failed");
                State::Closed
            }
        }
    }

    fn step_ws(&mut self, mut driver: WsDriver, now: Instant) -> State {
        match driver.poll(&mut self.sock, &mut self.reader, &mut self.sink, now) {
            Ok(Step::Pending) => State::WsOpen { driver },
            Ok(Step::Ready(())) => {
                info!(peer = %self.peer, "websocket session finished");
                self.enter_closing(now)
            }
            Err(error) => {
                warn!(peer = %self.peer, %error, "websocket failed");
                self.enter_closing(now)
            }
        }
    }

    fn step_closing(&mut self, now: Instant) -> State {
        match self.sink.poll_flush(&mut self.sock, now, self.deadline) {
            Ok(Step::Ready(())) => State::Closed,
            Ok(Step::Pending) => State::Closing,
            Err(_) => State::Closed,
        }
    }

    /// Translates a read-path failure into a one-shot error response when
    /// the status is mappable, otherwise closes outright. An orderly close
    /// before a complete request is not a failure and stays silent.
    fn fail_pre_response(&mut self, error: HttpError, now: Instant) -> State {
        if matches!(error, HttpError::ConnectionClosed) {
            trace!(peer = %self.peer, "peer closed before a complete request");
            return self.enter_closing(now);
        }

        match error.response_status() {
            Some(status) => {
                warn!(peer = %self.peer, %error, status = status.as_u16(), "rejecting request");
                // grant a fresh write budget; the old deadline may already
                // have fired (that is how timeouts get here)
                self.deadline = Some(now + self.limits.timeout);
                self.start_error_response(status)
            }
            None => {
                warn!(peer = %self.peer, %error, "closing connection");
                self.enter_closing(now)
            }
        }
    }

    fn start_response(&mut self, request: &Request, response: Response) -> State {
        // a response without a knowable length is close-delimited
        let keep_alive = request.keep_alive_requested()
            && !response.close_requested()
            && response.body_len().is_some();
        let writer = ResponseWriter::new(response, keep_alive, &mut self.sink);
        State::Writing { writer, keep_alive, upgrade: None }
    }

    fn start_error_response(&mut self, status: StatusCode) -> State {
        let writer = ResponseWriter::new(Response::new(status).close(), false, &mut self.sink);
        State::Writing { writer, keep_alive: false, upgrade: None }
    }

    fn enter_closing(&mut self, now: Instant) -> State {
        if self.deadline.is_none() {
            // bound the time spent draining the sink
            self.deadline = Some(now + self.limits.timeout);
        }
        State::Closing
    }
}
