use std::time::Duration;

/// Server tuning knobs, immutable once the server is built.
///
/// Together these bound the per-connection working set: a connection never
/// uses more than `recv_buffer_size + send_buffer_size +
/// max_request_line_size + max_body_bytes` bytes of buffer space, so the
/// host controls the total ceiling by bounding how many clients it accepts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Byte cap for the request line plus all headers.
    pub max_request_line_size: usize,
    /// Byte cap for a request body (and for a WebSocket message).
    pub max_body_bytes: usize,
    /// Wall-clock budget for one request/response exchange.
    pub request_timeout: Duration,
    /// Listen backlog, for [`super::Listen`] implementations that can apply
    /// it; the std listener records it only.
    pub backlog: u32,
    /// Bytes per socket read.
    pub recv_buffer_size: usize,
    /// Size of the coalescing send buffer.
    pub send_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_request_line_size: 2048,
            max_body_bytes: 16384,
            request_timeout: Duration::from_secs(10),
            backlog: 8,
            recv_buffer_size: 1024,
            send_buffer_size: 2048,
        }
    }
}
