//! Cooperative response writing.
//!
//! [`WriteSink`] is the coalescing send buffer every outgoing byte passes
//! through (or past: body chunks at or above [`DIRECT_SEND_MIN`] are written
//! straight from their own buffer once the sink is drained, avoiding the
//! copy). [`ResponseWriter`] streams one response through it: head first,
//! then body chunks pulled one per step from the body source.

use std::io;
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::ResponseEncoder;
use crate::connection::Transport;
use crate::protocol::{BodySource, ChunkSource, HttpError, Response};
use crate::ready;
use crate::step::Step;

/// Body chunks at least this large skip the coalescing copy.
const DIRECT_SEND_MIN: usize = 1024;

/// The connection's send buffer. One write attempt per step.
pub(crate) struct WriteSink {
    buf: BytesMut,
}

impl WriteSink {
    pub fn new(reserve: usize) -> Self {
        Self { buf: BytesMut::with_capacity(reserve) }
    }

    /// Queued bytes; encoders serialize directly into this.
    pub fn buffer(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// One non-blocking write attempt against the queued bytes.
    ///
    /// An incomplete write still pending past the deadline is an I/O error:
    /// at that point the response can no longer be delivered coherently.
    pub fn poll_flush(
        &mut self,
        sock: &mut (dyn Transport + '_),
        now: Instant,
        deadline: Option<Instant>,
    ) -> Result<Step<()>, HttpError> {
        if self.buf.is_empty() {
            return Ok(Step::Ready(()));
        }

        if deadline.is_some_and(|d| now >= d) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "write deadline exceeded").into());
        }

        match sock.write(&self.buf) {
            Ok(0) => Err(HttpError::ConnectionClosed),
            Ok(n) => {
                self.buf.advance(n);
                Ok(if self.buf.is_empty() { Step::Ready(()) } else { Step::Pending })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Step::Pending),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Step::Pending),
            Err(e) => Err(e.into()),
        }
    }
}

/// Streams one response: coalesced head, then the body chunk by chunk.
pub(crate) struct ResponseWriter {
    body: BodySource,
    pending: Option<(Bytes, usize)>,
    body_done: bool,
}

impl ResponseWriter {
    /// Encodes the head into the sink and takes ownership of the body.
    pub fn new(response: Response, keep_alive: bool, sink: &mut WriteSink) -> Self {
        ResponseEncoder::encode_head(&response, keep_alive, sink.buffer());
        let (_, _, body, _) = response.into_parts();
        let body_done = matches!(body, BodySource::Empty);
        Self { body, pending: None, body_done }
    }

    /// One step: a write attempt when bytes are queued, otherwise one pull
    /// from the body source. `Ready` once every byte has reached the socket.
    pub fn poll_write(
        &mut self,
        sock: &mut (dyn Transport + '_),
        sink: &mut WriteSink,
        now: Instant,
        deadline: Option<Instant>,
    ) -> Result<Step<()>, HttpError> {
        if !sink.is_empty() {
            ready!(sink.poll_flush(sock, now, deadline)?);
            return Ok(if self.finished() { Step::Ready(()) } else { Step::Pending });
        }

        if let Some((chunk, offset)) = &mut self.pending {
            if deadline.is_some_and(|d| now >= d) {
                return Err(
                    io::Error::new(io::ErrorKind::TimedOut, "write deadline exceeded").into()
                );
            }

            return match sock.write(&chunk[*offset..]) {
                Ok(0) => Err(HttpError::ConnectionClosed),
                Ok(n) => {
                    *offset += n;
                    if *offset == chunk.len() {
                        self.pending = None;
                    }
                    Ok(if self.finished() { Step::Ready(()) } else { Step::Pending })
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Step::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Step::Pending),
                Err(e) => Err(e.into()),
            };
        }

        match self.next_chunk()? {
            Step::Pending => Ok(Step::Pending),
            Step::Ready(None) => {
                self.body_done = true;
                Ok(Step::Ready(()))
            }
            Step::Ready(Some(chunk)) => {
                if chunk.len() >= DIRECT_SEND_MIN {
                    self.pending = Some((chunk, 0));
                } else {
                    sink.buffer().extend_from_slice(&chunk);
                }
                Ok(Step::Pending)
            }
        }
    }

    fn finished(&self) -> bool {
        self.body_done && self.pending.is_none()
    }

    fn next_chunk(&mut self) -> Result<Step<Option<Bytes>>, HttpError> {
        match &mut self.body {
            BodySource::Empty => Ok(Step::Ready(None)),
            BodySource::Bytes(bytes) => {
                let chunk = std::mem::take(bytes);
                self.body = BodySource::Empty;
                Ok(Step::Ready(if chunk.is_empty() { None } else { Some(chunk) }))
            }
            BodySource::File(file) => file.poll_chunk().map_err(HttpError::handler),
            BodySource::Stream(stream) => stream.poll_chunk().map_err(HttpError::handler),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BoxError, ChunkSource};
    use crate::testutil::TestSocket;

    fn drive(writer: &mut ResponseWriter, sink: &mut WriteSink, sock: &mut TestSocket) -> usize {
        let now = Instant::now();
        for steps in 1..200 {
            if writer.poll_write(sock, sink, now, None).unwrap().is_ready() {
                return steps;
            }
        }
        panic!("writer did not finish");
    }

    #[test]
    fn writes_head_and_small_body_coalesced() {
        let mut sock = TestSocket::new();
        let mut sink = WriteSink::new(2048);
        let mut writer = ResponseWriter::new(Response::text("hi"), true, &mut sink);

        drive(&mut writer, &mut sink, &mut sock);

        assert_eq!(
            sock.output(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nContent-Type: text/plain\r\n\r\nhi"
        );
    }

    #[test]
    fn resumes_across_partial_writes() {
        let mut sock = TestSocket::new();
        sock.set_write_limit(3);
        let mut sink = WriteSink::new(2048);
        let mut writer = ResponseWriter::new(Response::text("hello world"), true, &mut sink);

        drive(&mut writer, &mut sink, &mut sock);

        let output = sock.output();
        assert!(output.ends_with(b"\r\n\r\nhello world"));
    }

    #[test]
    fn large_chunks_take_the_direct_path() {
        let big = vec![b'x'; DIRECT_SEND_MIN * 2];
        let mut sock = TestSocket::new();
        let mut sink = WriteSink::new(2048);
        let mut writer =
            ResponseWriter::new(Response::text(Bytes::from(big.clone())), true, &mut sink);

        drive(&mut writer, &mut sink, &mut sock);

        assert!(sock.output().ends_with(&big));
    }

    #[test]
    fn streams_a_cooperative_body_source() {
        struct Chunks(Vec<&'static [u8]>);
        impl ChunkSource for Chunks {
            fn poll_chunk(&mut self) -> Result<Step<Option<Bytes>>, BoxError> {
                Ok(Step::Ready(if self.0.is_empty() {
                    None
                } else {
                    Some(Bytes::from_static(self.0.remove(0)))
                }))
            }
        }

        let response = Response::new(http::StatusCode::OK)
            .body(BodySource::Stream(Box::new(Chunks(vec![b"one ", b"two ", b"three"]))));

        let mut sock = TestSocket::new();
        let mut sink = WriteSink::new(2048);
        // stream bodies have no knowable length, so the connection closes
        let mut writer = ResponseWriter::new(response, false, &mut sink);

        drive(&mut writer, &mut sink, &mut sock);

        assert_eq!(sock.output(), b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\none two three");
    }

    #[test]
    fn write_deadline_expiry_is_an_io_error() {
        let mut sock = TestSocket::new();
        sock.set_write_limit(0);
        let mut sink = WriteSink::new(2048);
        let mut writer = ResponseWriter::new(Response::text("hi"), true, &mut sink);

        let start = Instant::now();
        assert!(writer
            .poll_write(&mut sock, &mut sink, start, Some(start + std::time::Duration::from_secs(10)))
            .unwrap()
            .is_pending());

        let err = writer
            .poll_write(
                &mut sock,
                &mut sink,
                start + std::time::Duration::from_secs(11),
                Some(start + std::time::Duration::from_secs(10)),
            )
            .unwrap_err();
        assert!(matches!(err, HttpError::Io { .. }));
    }
}
