//! Sans-io codecs for the HTTP wire format.
//!
//! Both directions follow the same contract the transport expects: the
//! decoder consumes from a `BytesMut` the connection fills from its socket
//! and returns `Ok(None)` while more bytes are needed; the encoder
//! serializes into the `BytesMut` the connection drains to its socket. No
//! I/O happens here, which keeps every state machine unit-testable with
//! plain buffers.

mod request_decoder;
mod response_encoder;

pub use request_decoder::{DecodePhase, RequestDecoder};
pub use response_encoder::ResponseEncoder;
