//! Response head serialization.
//!
//! The status line and every header are coalesced into a single buffer
//! region so the connection can push the whole head with as few socket
//! writes as the peer permits, instead of one write per line.

use bytes::{BufMut, BytesMut};

use crate::protocol::Response;

const INIT_HEAD_SIZE: usize = 512;

pub struct ResponseEncoder;

impl ResponseEncoder {
    /// Serializes the status line, framing headers and caller headers.
    ///
    /// `Content-Length` is synthesized whenever the body length is knowable
    /// and the caller did not set one; `Connection: close` is appended when
    /// keep-alive was not negotiated. Informational responses (the 101
    /// upgrade) carry neither, per RFC 7230 §3.3.
    pub fn encode_head(response: &Response, keep_alive: bool, dst: &mut BytesMut) {
        dst.reserve(INIT_HEAD_SIZE);

        let status = response.status();
        dst.put_slice(b"HTTP/1.1 ");
        dst.put_slice(status.as_str().as_bytes());
        dst.put_slice(b" ");
        dst.put_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes());
        dst.put_slice(b"\r\n");

        if !status.is_informational() {
            if let Some(length) = response.body_len() {
                if !response.has_header("content-length") {
                    dst.put_slice(b"Content-Length: ");
                    dst.put_slice(length.to_string().as_bytes());
                    dst.put_slice(b"\r\n");
                }
            }
        }

        for (name, value) in response.headers() {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }

        if !keep_alive && !status.is_informational() {
            dst.put_slice(b"Connection: close\r\n");
        }

        dst.put_slice(b"\r\n");
    }
}
