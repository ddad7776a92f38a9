//! Route table matched in registration order.
//!
//! Patterns are regular expressions compiled at registration time and
//! anchored so a route matches the whole request path, never a prefix. The
//! first entry whose method equals the request's effective method and whose
//! pattern matches wins. A method mismatch on an otherwise matching path is
//! indistinguishable from no match: the connection answers `404 Not Found`
//! either way, and no `405` is ever emitted.

use regex::Regex;
use thiserror::Error;

use crate::protocol::{BoxError, Method, Request, Response};
use crate::websocket::WsHandler;

/// Handler for an HTTP route.
pub type HttpHandler = Box<dyn Fn(&Request) -> Result<Response, BoxError>>;

/// Per-connection session factory for a WEBSOCKET route.
pub type WsFactory = Box<dyn Fn(&Request) -> Box<dyn WsHandler>>;

pub(crate) enum RouteKind {
    Http(HttpHandler),
    Websocket(WsFactory),
}

struct Route {
    method: Method,
    pattern: Regex,
    kind: RouteKind,
}

/// The immutable route table consulted on every dispatch.
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder { routes: Vec::new(), error: None }
    }

    /// First route matching the effective method and the full path.
    pub(crate) fn at(&self, method: &Method, path: &str) -> Option<&RouteKind> {
        self.routes
            .iter()
            .find(|route| &route.method == method && route.pattern.is_match(path))
            .map(|route| &route.kind)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Registers routes one `route`/`websocket` call at a time; order matters.
pub struct RouterBuilder {
    routes: Vec<Route>,
    error: Option<RouterBuildError>,
}

#[derive(Debug, Error)]
pub enum RouterBuildError {
    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl RouterBuilder {
    /// Registers an HTTP route.
    pub fn route<H>(mut self, method: Method, pattern: &str, handler: H) -> Self
    where
        H: Fn(&Request) -> Result<Response, BoxError> + 'static,
    {
        self.push(method, pattern, RouteKind::Http(Box::new(handler)));
        self
    }

    /// Registers a WEBSOCKET route; the factory builds one session per
    /// accepted upgrade.
    pub fn websocket<F>(mut self, pattern: &str, factory: F) -> Self
    where
        F: Fn(&Request) -> Box<dyn WsHandler> + 'static,
    {
        self.push(Method::Websocket, pattern, RouteKind::Websocket(Box::new(factory)));
        self
    }

    pub fn build(self) -> Result<Router, RouterBuildError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(Router { routes: self.routes }),
        }
    }

    fn push(&mut self, method: Method, pattern: &str, kind: RouteKind) {
        if self.error.is_some() {
            return;
        }

        // anchor so routes match the whole path, never a prefix
        match Regex::new(&format!(r"\A(?:{pattern})\z")) {
            Ok(compiled) => self.routes.push(Route { method, pattern: compiled, kind }),
            Err(source) => {
                self.error =
                    Some(RouterBuildError::InvalidPattern { pattern: pattern.to_owned(), source });
            }
        }
    }
}
