//! edgeloop-resolver — the module fallback service.
//!
//! Host-side HTTP endpoint, reachable only from the sandbox module runner
//! over loopback. Given a specifier, a referrer, and the specifier text as
//! written in source, it answers with one of:
//!
//! | Case | Response |
//! |---|---|
//! | Bare specifier, not on disk | `301` + `Location: /<resolved path>` |
//! | `.wasm` asset | `200` JSON `{name, wasm: number[]}` |
//! | Bundleable module | `200` JSON `{name, esModule}` |
//! | Bundler failure | `422` with the bundler diagnostic as plain text |

pub mod bundler;
pub mod error;
pub mod node_resolve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use tracing::{debug, warn};

use edgeloop_core::specifier::{ResolveMethod, host_path, is_path_specifier, normalize_specifier};
use edgeloop_core::types::{
    BinaryPayload, InlinePayload, MODULE_DIGEST_HEADER, RESOLVE_METHOD_HEADER, ResolutionResult,
};

pub use error::{ResolveError, ResolveResult};

/// Shared resolver state.
#[derive(Clone)]
pub struct ResolverState {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    bundler: PathBuf,
}

impl ResolverState {
    pub fn new(root: impl Into<PathBuf>, bundler: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                bundler: bundler.into(),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }
}

/// Build the resolver router. Every path and method is handled by the same
/// endpoint; the sandbox loader only varies query parameters and the
/// `X-Resolve-Method` header.
pub fn build_router(state: ResolverState) -> Router {
    Router::new().fallback(resolve_handler).with_state(state)
}

/// Serve the resolver on an already-bound listener (the caller binds to a
/// loopback address so the service is unreachable from outside the host).
pub async fn serve(
    state: ResolverState,
    listener: tokio::net::TcpListener,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

/// Query parameters of a resolver request.
#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub specifier: Option<String>,
    pub referrer: Option<String>,
    #[serde(rename = "rawSpecifier")]
    pub raw_specifier: Option<String>,
}

async fn resolve_handler(
    State(state): State<ResolverState>,
    headers: HeaderMap,
    Query(params): Query<ResolveParams>,
) -> Response {
    let method = headers
        .get(RESOLVE_METHOD_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or(ResolveMethod::Import, ResolveMethod::parse);

    match resolve(&state, method, &params).await {
        Ok(result) => into_response(result),
        Err(e) => error_response(&e),
    }
}

/// Core resolution algorithm, independent of the HTTP surface.
pub async fn resolve(
    state: &ResolverState,
    method: ResolveMethod,
    params: &ResolveParams,
) -> ResolveResult<ResolutionResult> {
    // Fail fast, before any filesystem access.
    let specifier = params
        .specifier
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(ResolveError::MissingSpecifier)?;

    let raw = params.raw_specifier.as_deref().unwrap_or(specifier);
    let normalized = normalize_specifier(specifier);
    if normalized.is_empty() {
        return Err(ResolveError::MissingSpecifier);
    }
    let referrer = normalize_specifier(params.referrer.as_deref().unwrap_or(""));
    let raw_normalized = normalize_specifier(raw);

    debug!(method = method.as_str(), specifier = %normalized, referrer = %referrer, raw, "resolve");

    let target = host_path(&normalized);

    // A bare specifier that does not exist on disk needs dependency
    // resolution against the referrer; the sandbox loader re-requests the
    // corrected path from the redirect.
    if !is_path_specifier(raw) && !target.exists() {
        let referrer_dir = host_path(&referrer);
        let referrer_dir = referrer_dir.parent().unwrap_or(state.root());
        let resolved = node_resolve::resolve_bare(raw, referrer_dir, method)?;
        let resolved = normalize_specifier(&resolved.to_string_lossy());
        return Ok(ResolutionResult::Redirect(resolved));
    }

    if raw_normalized.ends_with(".wasm") {
        let bytes = std::fs::read(&target).map_err(|source| ResolveError::Io {
            path: target.display().to_string(),
            source,
        })?;
        return Ok(ResolutionResult::BinaryAsset {
            name: normalized,
            bytes,
        });
    }

    let source = bundler::bundle_entry(&state.inner.bundler, &target, &normalized).await?;
    let digest = bundler::source_digest(&source);
    Ok(ResolutionResult::InlineModule {
        name: normalized,
        source,
        digest,
    })
}

fn into_response(result: ResolutionResult) -> Response {
    match result {
        ResolutionResult::Redirect(path) => (
            StatusCode::MOVED_PERMANENTLY,
            [(header::LOCATION, format!("/{path}"))],
        )
            .into_response(),
        ResolutionResult::BinaryAsset { name, bytes } => {
            Json(BinaryPayload { name, wasm: bytes }).into_response()
        }
        ResolutionResult::InlineModule {
            name,
            source,
            digest,
        } => (
            [(MODULE_DIGEST_HEADER, digest)],
            Json(InlinePayload {
                name,
                es_module: source,
            }),
        )
            .into_response(),
    }
}

fn error_response(error: &ResolveError) -> Response {
    let status = match error {
        ResolveError::MissingSpecifier => StatusCode::BAD_REQUEST,
        ResolveError::NotFound { .. } => StatusCode::NOT_FOUND,
        ResolveError::Bundle { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ResolveError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(%error, "resolver failure");
    }
    (status, error.to_string()).into_response()
}
