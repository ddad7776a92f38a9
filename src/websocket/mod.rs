//! WebSocket (RFC 6455) support layered on the cooperative substrate.
//!
//! After a successful upgrade the connection hands its socket and buffers to
//! a [`WsHandler`] session. The session drives a [`WsLink`], whose
//! operations follow the crate-wide step contract: `poll_message` performs
//! at most one socket read per call, `poll_flush` one write, and the `send_*`
//! family only queues frames into the connection's send buffer.
//!
//! Control frames never reach the handler: the engine answers Ping with
//! Pong, swallows Pong, and echoes Close before reporting end-of-stream.
//! Fragmented messages are reassembled, so a handler sees exactly one
//! message per exchange. Outbound frames are never masked and never
//! fragmented.

mod frame;
mod handshake;

pub use handshake::accept_key;
pub(crate) use handshake::upgrade_response;

use std::io;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::trace;

use crate::connection::{BoundedReader, Transport, WriteSink};
use crate::ensure;
use crate::protocol::{BoxError, HttpError};
use crate::step::Step;
use frame::{encode_frame, Frame, FrameDecoder};

/// Frame opcodes defined by RFC 6455 §5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Opcode> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    /// Control frames occupy the 0x8..=0xF opcode space.
    #[inline]
    pub fn is_control(self) -> bool {
        self as u8 & 0x8 != 0
    }
}

/// A complete data message after reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(Bytes),
    Binary(Bytes),
}

impl Message {
    fn from_parts(opcode: Opcode, payload: Bytes) -> Self {
        match opcode {
            Opcode::Binary => Message::Binary(payload),
            _ => Message::Text(payload),
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            Message::Text(payload) | Message::Binary(payload) => payload,
        }
    }

    /// The payload as text, for `Text` messages holding valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(payload) => std::str::from_utf8(payload).ok(),
            Message::Binary(_) => None,
        }
    }
}

/// WebSocket-level failures. Any of these terminates the one connection.
#[derive(Debug, Error)]
pub enum WsError {
    /// The peer violated RFC 6455 framing rules.
    #[error("protocol violation: {reason}")]
    Protocol { reason: &'static str },

    /// A frame or reassembled message exceeded the configured ceiling.
    #[error("message too large: exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// The peer closed the exchange (close frame or TCP close).
    #[error("connection closed")]
    ConnectionClosed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// A failure escaping the session handler.
    #[error("handler error: {cause}")]
    Handler { cause: BoxError },
}

impl WsError {
    fn protocol(reason: &'static str) -> Self {
        Self::Protocol { reason }
    }
}

fn transport_error(error: HttpError) -> WsError {
    match error {
        HttpError::ConnectionClosed => WsError::ConnectionClosed,
        HttpError::Io { source } => WsError::Io { source },
        HttpError::RequestTooLarge { limit, .. } => WsError::TooLarge { limit },
        other => WsError::Io { source: io::Error::new(io::ErrorKind::Other, other.to_string()) },
    }
}

/// A resumable WebSocket session provided per connection by a route factory.
pub trait WsHandler {
    /// Advances the session one bounded step. `Ready(())` ends the session
    /// and closes the connection.
    fn poll(&mut self, ws: &mut WsLink<'_>) -> Result<Step<()>, BoxError>;
}

/// Frame-level state shared by the link across steps: decoder, fragment
/// reassembly and close bookkeeping.
pub(crate) struct WsEngine {
    decoder: FrameDecoder,
    fragments: Option<(Opcode, BytesMut)>,
    max_message: usize,
    close_sent: bool,
    peer_closed: bool,
}

impl WsEngine {
    fn new(max_message: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(max_message),
            fragments: None,
            max_message,
            close_sent: false,
            peer_closed: false,
        }
    }

    /// Absorbs one frame; returns a message once a full one is assembled.
    fn on_frame(&mut self, frame: Frame, sink: &mut WriteSink) -> Result<Option<Message>, WsError> {
        match frame.opcode {
            Opcode::Ping => {
                trace!("answering ping");
                encode_frame(Opcode::Pong, &frame.payload, sink.buffer());
                Ok(None)
            }

            Opcode::Pong => Ok(None),

            Opcode::Close => {
                self.peer_closed = true;
                if !self.close_sent {
                    // echo the status code, RFC 6455 §5.5.1
                    let code = &frame.payload[..frame.payload.len().min(2)];
                    encode_frame(Opcode::Close, code, sink.buffer());
                    self.close_sent = true;
                }
                Ok(None)
            }

            Opcode::Text | Opcode::Binary => {
                ensure!(
                    self.fragments.is_none(),
                    WsError::protocol("data frame interleaved with fragmented message")
                );
                if frame.fin {
                    Ok(Some(Message::from_parts(frame.opcode, frame.payload)))
                } else {
                    self.fragments = Some((frame.opcode, BytesMut::from(&frame.payload[..])));
                    Ok(None)
                }
            }

            Opcode::Continuation => match self.fragments.take() {
                None => Err(WsError::protocol("continuation without a started message")),
                Some((opcode, mut buffer)) => {
                    ensure!(
                        buffer.len() + frame.payload.len() <= self.max_message,
                        WsError::TooLarge { limit: self.max_message }
                    );
                    buffer.extend_from_slice(&frame.payload);
                    if frame.fin {
                        Ok(Some(Message::from_parts(opcode, buffer.freeze())))
                    } else {
                        self.fragments = Some((opcode, buffer));
                        Ok(None)
                    }
                }
            },
        }
    }
}

/// The session's handle on its connection.
pub struct WsLink<'a> {
    sock: &'a mut (dyn Transport + 'a),
    reader: &'a mut BoundedReader,
    sink: &'a mut WriteSink,
    engine: &'a mut WsEngine,
    now: Instant,
}

impl<'a> WsLink<'a> {
    /// One step of the receive path.
    ///
    /// `Ready(Some(_))` delivers a complete data message, `Ready(None)`
    /// means the peer ended the exchange (close frame or TCP close).
    pub fn poll_message(&mut self) -> Result<Step<Option<Message>>, WsError> {
        let mut filled = false;

        loop {
            if self.engine.peer_closed {
                return Ok(Step::Ready(None));
            }

            match self.engine.decoder.decode(self.reader.buffer())? {
                Some(frame) => {
                    if let Some(message) = self.engine.on_frame(frame, self.sink)? {
                        return Ok(Step::Ready(Some(message)));
                    }
                }
                None => {
                    if filled {
                        return Ok(Step::Pending);
                    }
                    match self.reader.poll_fill(
                        self.sock,
                        self.now,
                        None,
                        self.engine.decoder.frame_cap(),
                    ) {
                        Ok(Step::Ready(_)) => filled = true,
                        Ok(Step::Pending) => return Ok(Step::Pending),
                        Err(HttpError::ConnectionClosed) => return Ok(Step::Ready(None)),
                        Err(e) => return Err(transport_error(e)),
                    }
                }
            }
        }
    }

    /// One write attempt against queued outbound frames.
    pub fn poll_flush(&mut self) -> Result<Step<()>, WsError> {
        self.sink.poll_flush(self.sock, self.now, None).map_err(transport_error)
    }

    /// Queues a text frame.
    pub fn send_text(&mut self, text: &str) -> Result<(), WsError> {
        self.ensure_open()?;
        encode_frame(Opcode::Text, text.as_bytes(), self.sink.buffer());
        Ok(())
    }

    /// Queues a binary frame.
    pub fn send_binary(&mut self, data: &[u8]) -> Result<(), WsError> {
        self.ensure_open()?;
        encode_frame(Opcode::Binary, data, self.sink.buffer());
        Ok(())
    }

    /// Queues an unsolicited pong (solicited ones are sent automatically).
    pub fn send_pong(&mut self, payload: &[u8]) -> Result<(), WsError> {
        self.ensure_open()?;
        ensure!(payload.len() <= 125, WsError::protocol("control frame payload over 125 bytes"));
        encode_frame(Opcode::Pong, payload, self.sink.buffer());
        Ok(())
    }

    /// Queues a close frame: the status code followed by the reason,
    /// truncated so the payload stays within the 125-byte control limit.
    pub fn send_close(&mut self, code: u16, reason: &str) -> Result<(), WsError> {
        self.ensure_open()?;

        let reason = reason.as_bytes();
        let mut payload = Vec::with_capacity(2 + reason.len().min(123));
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(&reason[..reason.len().min(123)]);

        encode_frame(Opcode::Close, &payload, self.sink.buffer());
        self.engine.close_sent = true;
        Ok(())
    }

    /// True once either side has initiated the closing handshake.
    pub fn is_closed(&self) -> bool {
        self.engine.peer_closed || self.engine.close_sent
    }

    fn ensure_open(&self) -> Result<(), WsError> {
        ensure!(!self.is_closed(), WsError::ConnectionClosed);
        Ok(())
    }
}

/// Owns the engine and session for one upgraded connection and exposes the
/// single `poll` the connection state machine drives.
pub(crate) struct WsDriver {
    engine: WsEngine,
    session: Box<dyn WsHandler>,
    finishing: bool,
}

impl WsDriver {
    pub fn new(session: Box<dyn WsHandler>, max_message: usize) -> Self {
        Self { engine: WsEngine::new(max_message), session, finishing: false }
    }

    pub fn poll(
        &mut self,
        sock: &mut (dyn Transport + '_),
        reader: &mut BoundedReader,
        sink: &mut WriteSink,
        now: Instant,
    ) -> Result<Step<()>, WsError> {
        if self.finishing {
            // drain the goodbye frames, then let the connection close
            return sink.poll_flush(sock, now, None).map_err(transport_error);
        }

        let mut link =
            WsLink { sock: &mut *sock, reader: &mut *reader, sink: &mut *sink, engine: &mut self.engine, now };
        match self.session.poll(&mut link) {
            Ok(Step::Pending) => Ok(Step::Pending),
            Ok(Step::Ready(())) => {
                if !self.engine.close_sent {
                    encode_frame(Opcode::Close, &1000u16.to_be_bytes(), sink.buffer());
                    self.engine.close_sent = true;
                }
                self.finishing = true;
                Ok(Step::Pending)
            }
            Err(cause) => Err(WsError::Handler { cause }),
        }
    }
}
