//! Bounded cooperative socket reader.

use std::io;
use std::time::Instant;

use bytes::BytesMut;

use crate::connection::Transport;
use crate::ensure;
use crate::protocol::HttpError;
use crate::step::Step;

/// Fills an accumulation buffer from a non-blocking socket, one read per
/// step, under a byte cap and an optional deadline.
///
/// The staging chunk and the accumulation region are allocated once; every
/// received fragment is copied into the reserved region rather than turned
/// into a fresh allocation.
pub(crate) struct BoundedReader {
    chunk: Box<[u8]>,
    buf: BytesMut,
}

impl BoundedReader {
    /// `chunk_size` bounds one socket read; `reserve` pre-sizes the
    /// accumulation region.
    pub fn new(chunk_size: usize, reserve: usize) -> Self {
        Self { chunk: vec![0u8; chunk_size].into_boxed_slice(), buf: BytesMut::with_capacity(reserve) }
    }

    /// The accumulated unparsed bytes, for a decoder to consume.
    pub fn buffer(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// One non-blocking read attempt.
    ///
    /// The deadline is checked on every resumption, so a stalled peer turns
    /// into `Timeout` on the first tick past it. `cap` bounds the bytes that
    /// may sit unparsed in the buffer; exceeding it is `RequestTooLarge`.
    pub fn poll_fill(
        &mut self,
        sock: &mut (dyn Transport + '_),
        now: Instant,
        deadline: Option<Instant>,
        cap: usize,
    ) -> Result<Step<usize>, HttpError> {
        if deadline.is_some_and(|d| now >= d) {
            return Err(HttpError::Timeout);
        }

        match sock.read(&mut self.chunk) {
            Ok(0) => Err(HttpError::ConnectionClosed),
            Ok(n) => {
                ensure!(self.buf.len() + n <= cap, HttpError::too_large("buffered input", cap));
                self.buf.extend_from_slice(&self.chunk[..n]);
                Ok(Step::Ready(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Step::Pending),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Step::Pending),
            Err(e) => Err(e.into()),
        }
    }
}
