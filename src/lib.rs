//! # tick-http
//!
//! A cooperative, non-blocking HTTP/1.1 server with optional WebSocket
//! (RFC 6455) support, aimed at single-core hosts that have no preemptive
//! runtime or async scheduler: the whole server advances in bounded steps so
//! the host can interleave its own real-time work (driving peripherals,
//! animating displays) between ticks.
//!
//! # Architecture
//!
//! Everything cooperative in this crate is a *step producer*: a state struct
//! with a `poll` method that performs at most one non-blocking I/O attempt
//! plus a small amount of parsing work, then reports [`step::Step::Pending`]
//! or [`step::Step::Ready`]. The layers are:
//!
//! - [`codec`]: sans-io incremental decoders and encoders over `BytesMut`
//! - [`connection`]: the per-client state machine (parse, dispatch, respond,
//!   keep-alive, upgrade)
//! - [`router`]: regex route table consulted in registration order
//! - [`server`]: the scheduler that accepts clients and advances every
//!   connection one step per tick
//! - [`websocket`]: RFC 6455 handshake, frame engine and handler sessions
//! - [`static_files`]: file responses with pre-compressed `.gz` selection
//!
//! # Example
//!
//! ```no_run
//! use tick_http::{Method, Request, Response, Router, Server, ServerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let router = Router::builder()
//!     .route(Method::Get, "/hello", |_req: &Request| Ok(Response::text("hi")))
//!     .build()?;
//!
//! let mut server = Server::builder()
//!     .config(ServerConfig::default())
//!     .router(router)
//!     .bind("0.0.0.0:8080")?;
//!
//! loop {
//!     server.tick();
//!     // host work between ticks: update displays, poll sensors, ...
//! }
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod protocol;
pub mod router;
pub mod server;
pub mod static_files;
pub mod step;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testutil;

pub use protocol::{BodySource, BoxError, HttpError, Method, Request, Response};
pub use router::Router;
pub use server::{Listen, Server, ServerBuilder, ServerConfig};
pub use step::Step;

pub(crate) use help::{ensure, ready};

mod help {

    macro_rules! ensure {
        ($predicate:expr, $error:expr) => {
            if !$predicate {
                return Err($error);
            }
        };
    }

    /// Unwraps a `Step`, propagating `Pending` to the caller.
    macro_rules! ready {
        ($step:expr) => {
            match $step {
                $crate::step::Step::Ready(value) => value,
                $crate::step::Step::Pending => return Ok($crate::step::Step::Pending),
            }
        };
    }

    pub(crate) use {ensure, ready};
}
