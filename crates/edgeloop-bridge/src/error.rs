//! Bridge error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// No live sandbox instance: either disposed, or a restart is in
    /// progress and the request arrived on the losing side of it.
    #[error("sandbox is not serving")]
    NotServing,

    /// Escalated module path has no owning package manifest up to the
    /// project root. Fatal to the escalation — the loop cannot fix this by
    /// restarting.
    #[error(transparent)]
    Package(#[from] edgeloop_core::package::PackageError),

    /// The in-flight dispatch failed (e.g. the instance went away under a
    /// restart). Surfaced as a clean failure, never a hang.
    #[error("sandbox dispatch failed: {0}")]
    Dispatch(String),

    #[error("sandbox factory failed: {0}")]
    Factory(String),

    #[error(transparent)]
    Wire(#[from] edgeloop_wire::WireError),
}
