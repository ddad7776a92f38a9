//! The cooperative scheduler.
//!
//! One [`Server::tick`] performs one accept attempt, advances every live
//! connection by exactly one step in round-robin order, then reaps closed
//! connections. The server never sleeps and never spins on one client; the
//! host decides the cadence between ticks and interleaves its own work.

use std::io;
use std::net::{TcpListener, ToSocketAddrs};
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::connection::Connection;
use crate::router::Router;
use crate::server::{Listen, ServerConfig};

/// Builds a [`Server`] from a router, a config and a listener.
pub struct ServerBuilder {
    config: ServerConfig,
    router: Option<Router>,
}

#[derive(Debug, Error)]
pub enum ServerBuildError {
    #[error("router must be set")]
    MissingRouter,

    #[error("bind error: {source}")]
    Bind {
        #[from]
        source: io::Error,
    },
}

impl ServerBuilder {
    fn new() -> Self {
        Self { config: ServerConfig::default(), router: None }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Binds a non-blocking TCP listener on `addr`.
    pub fn bind<A: ToSocketAddrs>(self, addr: A) -> Result<Server<TcpListener>, ServerBuildError> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        self.serve(listener)
    }

    /// Uses an already prepared listener (a custom [`Listen`] impl, or a
    /// test fake).
    pub fn serve<L: Listen>(self, listener: L) -> Result<Server<L>, ServerBuildError> {
        let router = self.router.ok_or(ServerBuildError::MissingRouter)?;
        Ok(Server { listener: Some(listener), router, config: self.config, connections: Vec::new() })
    }
}

/// The server: listener, route table and every live connection.
pub struct Server<L: Listen> {
    listener: Option<L>,
    router: Router,
    config: ServerConfig,
    connections: Vec<Connection<L::Conn>>,
}

impl Server<TcpListener> {
    /// Entry point: configure a builder, then `bind` or `serve`.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }
}

impl<L: Listen> Server<L> {
    /// Advances all work by one scheduler step. Returns the number of live
    /// connections, so a stopping host can tick until it reaches zero.
    pub fn tick(&mut self) -> usize {
        self.tick_at(Instant::now())
    }

    /// [`Self::tick`] against a caller-supplied clock reading; deadlines
    /// compare against `now`.
    pub fn tick_at(&mut self, now: Instant) -> usize {
        if let Some(listener) = &mut self.listener {
            match listener.poll_accept() {
                Ok(Some((sock, peer))) => {
                    info!(%peer, "accepted connection");
                    self.connections.push(Connection::new(sock, peer, &self.config, now));
                }
                Ok(None) => {}
                Err(error) => warn!(%error, "accept failed"),
            }
        }

        for conn in &mut self.connections {
            conn.poll(now, &self.router);
        }

        self.connections.retain(|conn| !conn.is_closed());
        self.connections.len()
    }

    /// Closes the listening socket and pushes every connection toward
    /// `Closing`. Keep ticking to drain them.
    pub fn stop(&mut self) {
        if self.listener.take().is_some() {
            info!("server stopping");
        }
        let now = Instant::now();
        for conn in &mut self.connections {
            conn.begin_close(now);
        }
    }

    /// True once `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.listener.is_none()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
