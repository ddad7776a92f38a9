//! Response model and body sources.
//!
//! A body is one of: nothing, a byte buffer, a file streamed in fixed-size
//! chunks, or an arbitrary cooperative chunk producer. The first three have
//! a knowable length and get a synthesized `Content-Length`; a streaming
//! body is close-delimited (chunked transfer encoding is out of scope) and
//! therefore forces the connection to close after it.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use http::StatusCode;

use crate::protocol::BoxError;
use crate::step::Step;

/// Bytes per read when streaming a file body.
pub(crate) const FILE_CHUNK_SIZE: usize = 4096;

/// An HTTP response under construction or being written.
pub struct Response {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: BodySource,
    close: bool,
}

impl Response {
    /// An empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: Vec::new(), body: BodySource::Empty, close: false }
    }

    /// A `200 OK` plain-text response.
    pub fn text(body: impl Into<Bytes>) -> Self {
        Response::new(StatusCode::OK)
            .header("Content-Type", "text/plain")
            .body(BodySource::Bytes(body.into()))
    }

    /// A `200 OK` HTML response.
    pub fn html(body: impl Into<Bytes>) -> Self {
        Response::new(StatusCode::OK)
            .header("Content-Type", "text/html")
            .body(BodySource::Bytes(body.into()))
    }

    /// The response synthesized when no route matches.
    pub fn not_found() -> Self {
        Response::new(StatusCode::NOT_FOUND)
            .header("Content-Type", "text/plain")
            .body(BodySource::Bytes(Bytes::from_static(b"Not Found")))
    }

    /// Appends a header; emission preserves registration order.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replaces the body.
    pub fn body(mut self, body: BodySource) -> Self {
        self.body = body;
        self
    }

    /// Marks the connection for closing once this response is written.
    pub fn close(mut self) -> Self {
        self.close = true;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// True when the caller already supplied `name` (case-insensitive).
    pub(crate) fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.close
    }

    pub(crate) fn body_len(&self) -> Option<u64> {
        self.body.len()
    }

    pub(crate) fn into_parts(self) -> (StatusCode, Vec<(String, String)>, BodySource, bool) {
        (self.status, self.headers, self.body, self.close)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("close", &self.close)
            .finish()
    }
}

/// Where the response body bytes come from.
pub enum BodySource {
    /// No body.
    Empty,
    /// A buffer sent as-is.
    Bytes(Bytes),
    /// A file streamed in [`FILE_CHUNK_SIZE`] chunks.
    File(FileBody),
    /// A cooperative chunk producer; length unknowable, close-delimited.
    Stream(Box<dyn ChunkSource>),
}

impl BodySource {
    /// The body length, when knowable at header-emission time.
    pub(crate) fn len(&self) -> Option<u64> {
        match self {
            BodySource::Empty => Some(0),
            BodySource::Bytes(bytes) => Some(bytes.len() as u64),
            BodySource::File(file) => Some(file.len()),
            BodySource::Stream(_) => None,
        }
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Empty => f.write_str("Empty"),
            BodySource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            BodySource::File(file) => write!(f, "File({} bytes left)", file.len()),
            BodySource::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for BodySource {
    fn from(bytes: Bytes) -> Self {
        BodySource::Bytes(bytes)
    }
}

/// A resumable producer of response-body chunks.
///
/// Each call performs one bounded unit of work. `Ready(None)` ends the body.
pub trait ChunkSource {
    fn poll_chunk(&mut self) -> Result<Step<Option<Bytes>>, BoxError>;
}

/// Streams a file in fixed-size chunks without ever loading it whole.
pub struct FileBody {
    file: File,
    remaining: u64,
}

impl FileBody {
    /// Opens `path` and records its size for `Content-Length`.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let remaining = file.metadata()?.len();
        Ok(Self { file, remaining })
    }

    /// Bytes not yet produced.
    pub fn len(&self) -> u64 {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }
}

impl ChunkSource for FileBody {
    fn poll_chunk(&mut self) -> Result<Step<Option<Bytes>>, BoxError> {
        if self.remaining == 0 {
            return Ok(Step::Ready(None));
        }

        let want = FILE_CHUNK_SIZE.min(self.remaining as usize);
        let mut chunk = vec![0u8; want];
        let n = self.file.read(&mut chunk)?;
        if n == 0 {
            // announced length can no longer be honored
            return Err("file truncated while streaming".into());
        }

        chunk.truncate(n);
        self.remaining -= n as u64;
        Ok(Step::Ready(Some(Bytes::from(chunk))))
    }
}
