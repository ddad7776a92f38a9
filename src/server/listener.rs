//! The accept seam between the scheduler and the host's socket layer.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};

/// A non-blocking source of client connections.
///
/// `poll_accept` must never block: it returns `Ok(None)` when no client is
/// waiting. Connections it hands out must already be in non-blocking mode,
/// reporting `ErrorKind::WouldBlock` from reads and writes that cannot
/// progress.
pub trait Listen {
    type Conn: io::Read + io::Write;

    /// One accept attempt.
    fn poll_accept(&mut self) -> io::Result<Option<(Self::Conn, SocketAddr)>>;
}

impl Listen for TcpListener {
    type Conn = TcpStream;

    fn poll_accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                Ok(Some((stream, peer)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
