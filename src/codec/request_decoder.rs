//! Incremental request decoder.
//!
//! Drives three phases over the connection's receive buffer: request line,
//! header block, then exactly `Content-Length` body bytes. Each `decode`
//! call makes bounded progress and returns `Ok(None)` until a complete
//! [`Request`] is available, so a connection can advance one step per tick
//! no matter how the client fragments its bytes.

use std::mem;

use bytes::{Buf, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, SEC_WEBSOCKET_KEY, UPGRADE};
use http::{HeaderMap, HeaderName, HeaderValue, Version};
use httparse::Status;
use tracing::trace;

use crate::ensure;
use crate::protocol::{HttpError, Method, Query, Request};

const MAX_HEADERS: usize = 32;

/// Which read phase the decoder is in, mirrored by the connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    RequestLine,
    Headers,
    Body,
}

/// Streaming decoder for one request after another on a connection.
pub struct RequestDecoder {
    phase: Phase,
    head_limit: usize,
    body_limit: usize,
}

enum Phase {
    RequestLine,
    Headers { line: RequestLine, line_bytes: usize },
    Body { line: RequestLine, headers: HeaderMap, upgraded: bool, remaining: usize, body: BytesMut },
}

struct RequestLine {
    method: Method,
    path: String,
    query: Query,
    version: Version,
}

impl RequestDecoder {
    /// `head_limit` caps request-line + headers bytes, `body_limit` caps the
    /// declared `Content-Length`.
    pub fn new(head_limit: usize, body_limit: usize) -> Self {
        Self { phase: Phase::RequestLine, head_limit, body_limit }
    }

    /// The phase the next `decode` call will work on.
    pub fn phase(&self) -> DecodePhase {
        match self.phase {
            Phase::RequestLine => DecodePhase::RequestLine,
            Phase::Headers { .. } => DecodePhase::Headers,
            Phase::Body { .. } => DecodePhase::Body,
        }
    }

    /// Discards phase state, ready for the next request on a kept-alive
    /// connection.
    pub fn reset(&mut self) {
        self.phase = Phase::RequestLine;
    }

    /// Consumes buffered bytes; returns a request once one is complete.
    ///
    /// Failures leave the decoder reset; the connection answers them with a
    /// final response and closes, so no further decoding happens.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, HttpError> {
        loop {
            match mem::replace(&mut self.phase, Phase::RequestLine) {
                Phase::RequestLine => {
                    let Some(end) = find_crlf(src) else {
                        ensure!(
                            src.len() <= self.head_limit,
                            HttpError::too_large("request head", self.head_limit)
                        );
                        return Ok(None);
                    };

                    let line_bytes = end + 2;
                    ensure!(
                        line_bytes <= self.head_limit,
                        HttpError::too_large("request head", self.head_limit)
                    );

                    let raw = src.split_to(line_bytes);
                    let line = parse_request_line(&raw[..end])?;
                    trace!(method = %line.method, path = %line.path, "parsed request line");
                    self.phase = Phase::Headers { line, line_bytes };
                }

                Phase::Headers { line, line_bytes } => {
                    let mut parsed = [httparse::EMPTY_HEADER; MAX_HEADERS];

                    let (consumed, headers) = match httparse::parse_headers(&src[..], &mut parsed) {
                        Ok(Status::Complete((consumed, parsed))) => {
                            ensure!(
                                line_bytes + consumed <= self.head_limit,
                                HttpError::too_large("request head", self.head_limit)
                            );
                            (consumed, build_header_map(parsed)?)
                        }
                        Ok(Status::Partial) => {
                            ensure!(
                                line_bytes + src.len() <= self.head_limit,
                                HttpError::too_large("request head", self.head_limit)
                            );
                            self.phase = Phase::Headers { line, line_bytes };
                            return Ok(None);
                        }
                        Err(httparse::Error::TooManyHeaders) => {
                            return Err(HttpError::bad_request("too many headers"));
                        }
                        Err(e) => return Err(HttpError::bad_request(e)),
                    };

                    src.advance(consumed);

                    let remaining = content_length(&headers, self.body_limit)?;
                    let upgraded = upgrade_requested(&headers);
                    trace!(header_count = headers.len(), body_size = remaining, "parsed header block");

                    self.phase = Phase::Body {
                        line,
                        headers,
                        upgraded,
                        remaining,
                        body: BytesMut::with_capacity(remaining),
                    };
                }

                Phase::Body { line, headers, upgraded, mut remaining, mut body } => {
                    if remaining > 0 && !src.is_empty() {
                        let take = remaining.min(src.len());
                        body.extend_from_slice(&src.split_to(take));
                        remaining -= take;
                    }

                    if remaining > 0 {
                        self.phase = Phase::Body { line, headers, upgraded, remaining, body };
                        return Ok(None);
                    }

                    let method = if upgraded { Method::Websocket } else { line.method };
                    return Ok(Some(Request::new(
                        method,
                        line.path,
                        line.query,
                        line.version,
                        headers,
                        body.freeze(),
                    )));
                }
            }
        }
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(2).position(|window| window == b"\r\n")
}

fn parse_request_line(raw: &[u8]) -> Result<RequestLine, HttpError> {
    let line =
        std::str::from_utf8(raw).map_err(|_| HttpError::bad_request("request line is not ascii"))?;

    let mut parts = line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None) => (method, target, version),
        _ => return Err(HttpError::bad_request("malformed request line")),
    };

    let method = Method::from_token(method)?;

    ensure!(!target.is_empty(), HttpError::bad_request("empty request target"));
    let (path, raw_query) = target.split_once('?').unwrap_or((target, ""));
    let query = Query::parse(raw_query)?;

    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        _ => return Err(HttpError::bad_request("unsupported http version")),
    };

    Ok(RequestLine { method, path: path.to_owned(), query, version })
}

fn build_header_map(parsed: &[httparse::Header<'_>]) -> Result<HeaderMap, HttpError> {
    let mut headers = HeaderMap::with_capacity(parsed.len());

    for header in parsed {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| HttpError::bad_request("invalid header name"))?;
        let value = HeaderValue::from_bytes(trim_ascii_ws(header.value))
            .map_err(|_| HttpError::bad_request("invalid header value"))?;
        headers.append(name, value);
    }

    Ok(headers)
}

fn trim_ascii_ws(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

fn content_length(headers: &HeaderMap, body_limit: usize) -> Result<usize, HttpError> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(0);
    };

    let length: u64 = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| HttpError::bad_request("invalid content-length"))?;

    ensure!(length <= body_limit as u64, HttpError::too_large("request body", body_limit));
    Ok(length as usize)
}

/// RFC 6455 upgrade detection: all three markers must be present for the
/// effective method to become `WEBSOCKET`.
fn upgrade_requested(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    let connection = headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")));

    upgrade && connection && headers.contains_key(SEC_WEBSOCKET_KEY)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use proptest::prelude::*;

    use super::*;

    fn decoder() -> RequestDecoder {
        RequestDecoder::new(2048, 16384)
    }

    #[test]
    fn from_curl() {
        let wire = indoc! {"
            GET /index.html HTTP/1.1
            Host: 127.0.0.1:8080
            User-Agent: curl/7.79.1
            Accept: */*

        "}
        .replace('\n', "\r\n");
        let mut buf = BytesMut::from(wire.as_bytes());

        let request = decoder().decode(&mut buf).unwrap().unwrap();

        assert_eq!(request.method(), &Method::Get);
        assert_eq!(request.path(), "/index.html");
        assert_eq!(request.version(), Version::HTTP_11);
        assert_eq!(request.headers().len(), 3);
        assert_eq!(request.header("host"), Some("127.0.0.1:8080"));
        assert_eq!(request.header("user-agent"), Some("curl/7.79.1"));
        assert_eq!(request.header("accept"), Some("*/*"));
    }

    #[test]
    fn decodes_a_get_request() {
        let mut buf = BytesMut::from(&b"GET /hello?name=world HTTP/1.1\r\nHost: x\r\n\r\n"[..]);

        let request = decoder().decode(&mut buf).unwrap().unwrap();

        assert_eq!(request.method(), &Method::Get);
        assert_eq!(request.path(), "/hello");
        assert_eq!(request.query_param("name"), Some("world"));
        assert_eq!(request.version(), Version::HTTP_11);
        assert_eq!(request.header("host"), Some("x"));
        assert!(request.body().is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn decodes_incrementally_byte_by_byte() {
        let wire = b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\nabc";
        let mut decoder = decoder();
        let mut buf = BytesMut::new();

        for (i, byte) in wire.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let decoded = decoder.decode(&mut buf).unwrap();
            if i < wire.len() - 1 {
                assert!(decoded.is_none(), "complete too early at byte {i}");
            } else {
                let request = decoded.unwrap();
                assert_eq!(request.method(), &Method::Post);
                assert_eq!(&request.body()[..], b"abc");
            }
        }
    }

    #[test]
    fn leaves_pipelined_bytes_in_the_buffer() {
        let mut buf = BytesMut::from(
            &b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n"[..],
        );
        let mut decoder = decoder();

        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.path(), "/a");

        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.path(), "/b");
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_head() {
        let mut decoder = RequestDecoder::new(64, 16384);
        let long_header = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "y".repeat(128));
        let mut buf = BytesMut::from(long_header.as_bytes());

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, HttpError::RequestTooLarge { .. }));
    }

    #[test]
    fn rejects_unterminated_head_past_the_limit() {
        let mut decoder = RequestDecoder::new(32, 16384);
        let mut buf = BytesMut::from("GET /aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".as_bytes());

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, HttpError::RequestTooLarge { .. }));
    }

    #[test]
    fn rejects_content_length_over_the_body_limit() {
        let mut decoder = RequestDecoder::new(2048, 16384);
        let mut buf =
            BytesMut::from(&b"POST /upload HTTP/1.1\r\nContent-Length: 1000000\r\n\r\n"[..]);

        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(matches!(err, HttpError::RequestTooLarge { what: "request body", .. }));
    }

    #[test]
    fn rejects_malformed_content_length() {
        let mut buf = BytesMut::from(&b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n"[..]);
        let err = decoder().decode(&mut buf).unwrap_err();
        assert!(matches!(err, HttpError::BadRequest { .. }));
    }

    #[test]
    fn rejects_bad_request_line() {
        for wire in
            ["GET /\r\n\r\n", "get / HTTP/1.1\r\n\r\n", "GET / HTTP/2.0\r\n\r\n", "GET  / HTTP/1.1\r\n\r\n"]
        {
            let mut buf = BytesMut::from(wire.as_bytes());
            assert!(decoder().decode(&mut buf).is_err(), "accepted {wire:?}");
        }
    }

    #[test]
    fn relabels_upgrade_requests_as_websocket() {
        let mut buf = BytesMut::from(
            &b"GET /ws HTTP/1.1\r\n\
               Host: x\r\n\
               Upgrade: websocket\r\n\
               Connection: keep-alive, Upgrade\r\n\
               Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"[..],
        );

        let request = decoder().decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.method(), &Method::Websocket);
        assert_eq!(request.header("sec-websocket-key"), Some("dGhlIHNhbXBsZSBub25jZQ=="));
    }

    #[test]
    fn upgrade_needs_all_three_markers() {
        let mut buf = BytesMut::from(
            &b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n"[..],
        );

        let request = decoder().decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.method(), &Method::Get);
    }

    #[test]
    fn header_values_are_trimmed() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost:   spaced out  \r\n\r\n"[..]);
        let request = decoder().decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.header("host"), Some("spaced out"));
    }

    proptest! {
        /// Whatever the peer sends, the decoder never buffers past the head
        /// cap: it either consumes, asks for more, or fails.
        #[test]
        fn arbitrary_streams_stay_within_the_caps(
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..32),
        ) {
            let mut decoder = RequestDecoder::new(256, 512);
            let mut buf = BytesMut::new();

            for chunk in &chunks {
                buf.extend_from_slice(chunk);
                match decoder.decode(&mut buf) {
                    // needing more bytes means the head cap held
                    Ok(None) => prop_assert!(buf.len() <= 256),
                    Ok(Some(_)) => {}
                    Err(_) => return Ok(()),
                }
            }
        }

        /// Serializing headers and parsing them back yields the same
        /// case-insensitive first-value mapping.
        #[test]
        fn header_round_trip(
            headers in proptest::collection::vec(
                ("x-[a-z][a-z0-9-]{0,12}", "[a-zA-Z0-9 !#$*+.^_`|~-]{0,24}"),
                0..8,
            ),
        ) {
            let mut wire = String::from("GET / HTTP/1.1\r\n");
            for (name, value) in &headers {
                wire.push_str(name);
                wire.push_str(": ");
                wire.push_str(value);
                wire.push_str("\r\n");
            }
            wire.push_str("\r\n");

            let mut buf = BytesMut::from(wire.as_bytes());
            let request = RequestDecoder::new(4096, 512).decode(&mut buf).unwrap().unwrap();

            let mut expected: Vec<(String, &str)> = Vec::new();
            for (name, value) in &headers {
                let folded = name.to_ascii_lowercase();
                if !expected.iter().any(|(n, _)| n == &folded) {
                    expected.push((folded, value.trim()));
                }
            }

            prop_assert_eq!(request.headers().keys_len(), expected.len());
            for (name, value) in expected {
                prop_assert_eq!(request.header(&name), Some(value));
            }
        }
    }
}
