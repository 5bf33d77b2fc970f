//! Resolver error types.

use thiserror::Error;

/// Errors surfaced by the resolver service.
///
/// Bundler diagnostics are carried as response content, never thrown across
/// the host/sandbox boundary — the sandbox has no way to receive a host-side
/// error object.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Raised before any filesystem access.
    #[error("specifier is required")]
    MissingSpecifier,

    #[error("cannot resolve '{specifier}' from {referrer}")]
    NotFound { specifier: String, referrer: String },

    #[error("bundling failed:\n{diagnostic}")]
    Bundle { diagnostic: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ResolveResult<T> = Result<T, ResolveError>;
