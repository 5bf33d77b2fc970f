//! Wire adapter — translation between the host's native HTTP representation
//! and the sandbox's fetch-style representation.
//!
//! Purely a translation layer: no retained state, no buffering of bodies.
//! Request bodies flow into the sandbox as half-duplex streams; response
//! bodies flow back out with backpressure, and translation only completes
//! once the host sink has drained the final chunk.

mod adapter;
mod error;
mod types;

pub use adapter::{byte_stream, into_http_response, to_host_response, to_sandbox_request};
pub use error::WireError;
pub use types::{ByteStream, HostSink, SandboxRequest, SandboxResponse};
