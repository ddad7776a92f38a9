//! Static file responses with transparent pre-compressed variant selection.
//!
//! Files are streamed through the connection's writer in fixed-size chunks;
//! nothing is ever loaded whole. When the client advertises gzip support and
//! a sibling `<path>.gz` exists, that variant is served instead with
//! `Content-Encoding: gzip` — the server itself never compresses anything.
//! MIME guessing is out of scope: the caller supplies the content type.

use std::path::Path;

use http::StatusCode;
use tracing::{debug, trace};

use crate::protocol::{BodySource, FileBody, Request, Response};

/// Builds the response for `path`, honoring `Accept-Encoding: gzip` via a
/// pre-compressed sibling. A missing or unreadable file is `404 Not Found`.
pub fn serve_file(req: &Request, path: impl AsRef<Path>, content_type: &str) -> Response {
    let path = path.as_ref();

    if accepts_gzip(req) {
        let gz_path = {
            let mut os = path.as_os_str().to_owned();
            os.push(".gz");
            os
        };
        if let Ok(file) = FileBody::open(&gz_path) {
            trace!(path = %path.display(), "serving pre-compressed variant");
            return file_response(file, content_type).header("Content-Encoding", "gzip");
        }
    }

    match FileBody::open(path) {
        Ok(file) => file_response(file, content_type),
        Err(error) => {
            debug!(path = %path.display(), %error, "file not served");
            Response::not_found()
        }
    }
}

fn file_response(file: FileBody, content_type: &str) -> Response {
    Response::new(StatusCode::OK)
        .header("Content-Type", content_type)
        .body(BodySource::File(file))
}

/// True when the request's `Accept-Encoding` lists gzip.
fn accepts_gzip(req: &Request) -> bool {
    req.header("accept-encoding").is_some_and(|value| {
        value
            .split(',')
            .filter_map(|entry| entry.split(';').next())
            .any(|coding| coding.trim().eq_ignore_ascii_case("gzip"))
    })
}
