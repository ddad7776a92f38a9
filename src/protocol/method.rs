use std::fmt;

use crate::ensure;
use crate::protocol::error::HttpError;

/// Request method as used for routing.
///
/// `Websocket` is a routing-only tag: it is never accepted from the wire but
/// assigned as the *effective* method when a request carries the RFC 6455
/// upgrade headers. Unknown wire methods pass through as `Other` so they can
/// be routed by equality; since routes are registered with the named
/// variants, an `Other` request falls through to `404 Not Found`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    /// Effective method of an upgraded request; reserved on the wire.
    Websocket,
    /// Any other uppercase token received on the wire.
    Other(String),
}

impl Method {
    /// Parses a request-line method token.
    ///
    /// The token must be uppercase ASCII. The literal `WEBSOCKET` is
    /// reserved for upgrade detection and rejected if a client sends it.
    pub(crate) fn from_token(token: &str) -> Result<Self, HttpError> {
        ensure!(
            !token.is_empty() && token.bytes().all(|b| b.is_ascii_uppercase()),
            HttpError::bad_request("malformed request method")
        );

        Ok(match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "PATCH" => Method::Patch,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "WEBSOCKET" => return Err(HttpError::bad_request("WEBSOCKET is a reserved method")),
            _ => Method::Other(token.to_owned()),
        })
    }

    /// The wire representation of this method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Websocket => "WEBSOCKET",
            Method::Other(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
