//! Host-injected sandbox primitives.
//!
//! The embedding host supplies implementations of these traits when it
//! creates the sandbox; the runner owns only the loading logic layered on
//! top of them.

use async_trait::async_trait;
use thiserror::Error;

use edgeloop_core::types::ResolveRequest;

use crate::module::ModuleNamespace;

/// Failure inside an injected primitive, tagged at the point it is caught on
/// the sandbox side so the boundary never has to inspect error shapes.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A nested import could not be resolved; carries the attempted path.
    #[error("failed to import {path}")]
    Import { path: String },

    /// Any other evaluation failure, with its structured description.
    #[error("{description}")]
    Script { description: String },
}

/// The unsafe-eval primitive: compiles wrapped module source into a callable
/// over the fixed context bindings, runs it, and returns the populated
/// export namespace.
#[async_trait]
pub trait UnsafeEval: Send + Sync {
    async fn eval(&self, code: &str, filename: &str) -> Result<ModuleNamespace, EvalError>;
}

/// The sandbox's own dynamic import, used for host-external packages.
#[async_trait]
pub trait NativeImport: Send + Sync {
    async fn import(&self, specifier: &str) -> Result<ModuleNamespace, EvalError>;
}

/// What the fetch-module transport answered for one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Re-request under this corrected specifier.
    Redirect(String),
    /// Transpiled source to evaluate in the sandbox.
    Inline { name: String, source: String },
    /// Raw bytes of a binary asset.
    Binary { name: String, bytes: Vec<u8> },
    /// The host chose not to inline; load through the native import.
    External { specifier: String },
    /// Host-side resolution failed; carried as content, not an exception.
    Diagnostic { status: u16, body: String },
}

/// The fetch-module primitive: asks the host to resolve, bundle, or read a
/// module on the sandbox's behalf.
#[async_trait]
pub trait FetchModule: Send + Sync {
    async fn fetch(&self, request: &ResolveRequest) -> Result<FetchOutcome, EvalError>;
}
