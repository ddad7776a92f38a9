//! Protocol-level types: methods, requests, responses and the error taxonomy.

pub mod error;

mod method;
mod query;
mod request;
mod response;

pub use error::HttpError;
pub use method::Method;
pub use query::Query;
pub use request::Request;
pub use response::{BodySource, ChunkSource, FileBody, Response};

/// Boxed error type returned by user handlers and streaming bodies.
pub type BoxError = Box<dyn std::error::Error>;
