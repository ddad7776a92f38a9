//! The fully received request handed to route handlers.

use bytes::Bytes;
use http::{HeaderMap, Version};

use crate::protocol::{Method, Query};

/// A complete request: effective method, decoded target and buffered body.
///
/// Header lookup is case-insensitive and, for duplicated header names,
/// returns the first value seen on the wire. The body is fully buffered and
/// bounded by the server's `max_body_bytes`.
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Query,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        path: String,
        query: Query,
        version: Version,
        headers: HeaderMap,
        body: Bytes,
    ) -> Self {
        Self { method, path, query, version, headers, body }
    }

    /// The effective method: `Method::Websocket` after upgrade detection,
    /// the wire method otherwise.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded query parameters in wire order.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// First query value registered under `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name`, when it is valid visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// True when the client did not opt out of connection reuse
    /// (HTTP/1.1 defaults to keep-alive, HTTP/1.0 to close).
    pub(crate) fn keep_alive_requested(&self) -> bool {
        match self.header("connection") {
            Some(value) => {
                let mut tokens = value.split(',').map(|t| t.trim());
                if tokens.any(|t| t.eq_ignore_ascii_case("close")) {
                    false
                } else if value.split(',').any(|t| t.trim().eq_ignore_ascii_case("keep-alive")) {
                    true
                } else {
                    self.version == Version::HTTP_11
                }
            }
            None => self.version == Version::HTTP_11,
        }
    }
}
