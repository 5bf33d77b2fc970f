//! The module runner and its request entry point.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderValue, StatusCode};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use edgeloop_core::specifier::{ResolveMethod, normalize_specifier};
use edgeloop_core::types::{BUNDLE_HEADER, ENTRY_HEADER, ResolveRequest};
use edgeloop_wire::{SandboxRequest, SandboxResponse};

use crate::module::{ModuleNamespace, wrap_module};
use crate::primitives::{EvalError, FetchModule, FetchOutcome, NativeImport, UnsafeEval};

const MAX_REDIRECTS: usize = 8;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// A host-external package could not be imported; carries the attempted
    /// specifier so the host can map it to its owning package.
    #[error("failed to import {path}")]
    Import { path: String },

    #[error("module evaluation failed: {description}")]
    Eval { description: String },

    #[error("fetch-module transport failed: {description}")]
    Transport { description: String },

    #[error("resolver answered {status}: {body}")]
    Resolver { status: u16, body: String },

    #[error("too many redirects while resolving {0}")]
    TooManyRedirects(String),

    #[error("namespace is frozen")]
    FrozenNamespace,
}

/// Host environment bindings exposed to the handler.
#[derive(Debug, Clone, Default)]
pub struct HandlerEnv {
    vars: HashMap<String, String>,
}

impl HandlerEnv {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

/// Lifecycle callbacks handed to the handler. Deferred work and
/// pass-through-on-exception are not meaningful in this single-shot
/// emulation; both are no-ops.
#[derive(Debug, Default)]
pub struct LifecycleContext;

impl LifecycleContext {
    pub fn wait_until<F>(&self, _work: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
    }

    pub fn pass_through_on_exception(&self) {}
}

/// A fetch-style request handler, the shape an entry module's default export
/// must have.
#[async_trait]
pub trait FetchHandler: Send + Sync {
    async fn fetch(
        &self,
        request: SandboxRequest,
        env: &HandlerEnv,
        ctx: &LifecycleContext,
    ) -> anyhow::Result<SandboxResponse>;
}

/// Loads and executes modules inside the sandbox.
///
/// Holds a per-instance module cache keyed by normalized specifier; the
/// cache is cold on every sandbox restart.
pub struct ModuleRunner {
    transport: Arc<dyn FetchModule>,
    eval: Arc<dyn UnsafeEval>,
    native: Arc<dyn NativeImport>,
    cache: Mutex<HashMap<String, Arc<ModuleNamespace>>>,
}

impl ModuleRunner {
    pub fn new(
        transport: Arc<dyn FetchModule>,
        eval: Arc<dyn UnsafeEval>,
        native: Arc<dyn NativeImport>,
    ) -> Self {
        Self {
            transport,
            eval,
            native,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Import one module, following redirects and caching the result.
    pub async fn import(&self, specifier: &str) -> Result<Arc<ModuleNamespace>, RunnerError> {
        let mut key = normalize_specifier(specifier);

        for _ in 0..MAX_REDIRECTS {
            if let Some(cached) = self.cache.lock().await.get(&key) {
                return Ok(cached.clone());
            }

            let request = ResolveRequest {
                method: ResolveMethod::Import,
                specifier: key.clone(),
                referrer: String::new(),
                raw_specifier: specifier.to_string(),
            };
            let outcome = self
                .transport
                .fetch(&request)
                .await
                .map_err(|e| RunnerError::Transport {
                    description: e.to_string(),
                })?;

            match outcome {
                FetchOutcome::Redirect(path) => {
                    debug!(from = %key, to = %path, "redirect");
                    key = normalize_specifier(&path);
                }
                FetchOutcome::Inline { name, source } => {
                    let wrapped = wrap_module(&source);
                    let mut ns = self.eval.eval(&wrapped, &name).await.map_err(map_eval)?;
                    ns.freeze();
                    return Ok(self.store(key, ns).await);
                }
                FetchOutcome::Binary { name: _, bytes } => {
                    let mut ns = ModuleNamespace::binary(bytes);
                    ns.freeze();
                    return Ok(self.store(key, ns).await);
                }
                FetchOutcome::External { specifier } => {
                    let ns = self
                        .native
                        .import(&specifier)
                        .await
                        .map_err(|_| RunnerError::Import {
                            path: specifier.clone(),
                        })?;
                    return Ok(self.store(key, ns).await);
                }
                FetchOutcome::Diagnostic { status, body } => {
                    return Err(RunnerError::Resolver { status, body });
                }
            }
        }

        Err(RunnerError::TooManyRedirects(specifier.to_string()))
    }

    async fn store(&self, key: String, ns: ModuleNamespace) -> Arc<ModuleNamespace> {
        let ns = Arc::new(ns);
        self.cache.lock().await.insert(key, ns.clone());
        ns
    }

    /// Top-level entry: import the module named by the request's entry
    /// header and invoke its fetch handler. Never panics and never lets an
    /// error escape as anything other than a diagnostic response; an
    /// unresolvable native import is signalled through the escalation
    /// header for the host to act on.
    pub async fn handle_fetch(&self, request: SandboxRequest, env: &HandlerEnv) -> SandboxResponse {
        let Some(entry) = request.header(ENTRY_HEADER).map(str::to_string) else {
            return SandboxResponse::text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("missing {ENTRY_HEADER} header"),
            );
        };

        match self.import(&entry).await {
            Ok(ns) => {
                let Some(handler) = ns.default_handler() else {
                    return SandboxResponse::text(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Module does not have a fetch handler",
                    );
                };
                match handler.fetch(request, env, &LifecycleContext).await {
                    Ok(response) => response,
                    Err(e) => {
                        SandboxResponse::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                    }
                }
            }
            Err(RunnerError::Import { path }) => {
                let mut response = SandboxResponse::text(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("failed to import {path}"),
                );
                match HeaderValue::from_str(&path) {
                    Ok(value) => {
                        response.headers.insert(BUNDLE_HEADER, value);
                    }
                    // Without the header the host cannot act on the failure;
                    // make the drop visible instead of silently looping.
                    Err(e) => warn!(%path, error = %e, "import path is not header-safe; escalation dropped"),
                }
                response
            }
            Err(e) => SandboxResponse::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

fn map_eval(error: EvalError) -> RunnerError {
    match error {
        EvalError::Import { path } => RunnerError::Import { path },
        EvalError::Script { description } => RunnerError::Eval { description },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ExportValue;
    use http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct MapTransport {
        routes: HashMap<String, FetchOutcome>,
        fetches: AtomicUsize,
    }

    impl MapTransport {
        fn new(routes: Vec<(&str, FetchOutcome)>) -> Arc<Self> {
            Arc::new(Self {
                routes: routes
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FetchModule for MapTransport {
        async fn fetch(&self, request: &ResolveRequest) -> Result<FetchOutcome, EvalError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.routes
                .get(&request.specifier)
                .cloned()
                .ok_or_else(|| EvalError::Script {
                    description: format!("no route for {}", request.specifier),
                })
        }
    }

    struct EchoEval;

    #[async_trait]
    impl UnsafeEval for EchoEval {
        async fn eval(&self, code: &str, filename: &str) -> Result<ModuleNamespace, EvalError> {
            assert!(code.starts_with("'use strict';async("));
            let mut ns = ModuleNamespace::new();
            if filename.ends_with("handler.ts") {
                struct Echo;
                #[async_trait]
                impl FetchHandler for Echo {
                    async fn fetch(
                        &self,
                        request: SandboxRequest,
                        _env: &HandlerEnv,
                        _ctx: &LifecycleContext,
                    ) -> anyhow::Result<SandboxResponse> {
                        Ok(SandboxResponse::text(
                            StatusCode::OK,
                            format!("{} {}", request.method, request.url.path()),
                        ))
                    }
                }
                ns.insert("default", ExportValue::Handler(Arc::new(Echo)))
                    .unwrap();
            }
            Ok(ns)
        }
    }

    struct FailingNative;

    #[async_trait]
    impl NativeImport for FailingNative {
        async fn import(&self, specifier: &str) -> Result<ModuleNamespace, EvalError> {
            Err(EvalError::Script {
                description: format!("No such module: {specifier}"),
            })
        }
    }

    fn runner(transport: Arc<MapTransport>) -> ModuleRunner {
        ModuleRunner::new(transport, Arc::new(EchoEval), Arc::new(FailingNative))
    }

    fn request_for(entry: &str) -> SandboxRequest {
        let mut req = SandboxRequest::new(
            Method::GET,
            Url::parse("http://localhost:5173/app").unwrap(),
        );
        req.headers
            .insert(ENTRY_HEADER, HeaderValue::from_str(entry).unwrap());
        req
    }

    #[tokio::test]
    async fn inline_module_evaluates_and_freezes() {
        let transport = MapTransport::new(vec![(
            "app/handler.ts",
            FetchOutcome::Inline {
                name: "app/handler.ts".into(),
                source: "export default handler;".into(),
            },
        )]);
        let r = runner(transport);
        let ns = r.import("/app/handler.ts").await.unwrap();
        assert!(ns.is_frozen());
        assert!(ns.default_handler().is_some());
    }

    #[tokio::test]
    async fn redirect_is_followed_and_cached_under_final_key() {
        let transport = MapTransport::new(vec![
            ("my-pkg", FetchOutcome::Redirect("/srv/node_modules/my-pkg/handler.ts".into())),
            (
                "srv/node_modules/my-pkg/handler.ts",
                FetchOutcome::Inline {
                    name: "srv/node_modules/my-pkg/handler.ts".into(),
                    source: "export default handler;".into(),
                },
            ),
        ]);
        let r = runner(transport.clone());
        let first = r.import("my-pkg").await.unwrap();
        // Re-requesting the final path hits the cache, not the transport.
        let before = transport.fetches.load(Ordering::SeqCst);
        let second = r.import("/srv/node_modules/my-pkg/handler.ts").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.fetches.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn redirect_loop_is_bounded() {
        let transport = MapTransport::new(vec![
            ("a", FetchOutcome::Redirect("b".into())),
            ("b", FetchOutcome::Redirect("a".into())),
        ]);
        let err = runner(transport).import("a").await.unwrap_err();
        assert!(matches!(err, RunnerError::TooManyRedirects(_)));
    }

    #[tokio::test]
    async fn external_import_failure_is_tagged_with_path() {
        let transport = MapTransport::new(vec![(
            "native-pkg",
            FetchOutcome::External {
                specifier: "/project/node_modules/native-pkg/index.js".into(),
            },
        )]);
        let err = runner(transport).import("native-pkg").await.unwrap_err();
        match err {
            RunnerError::Import { path } => {
                assert_eq!(path, "/project/node_modules/native-pkg/index.js");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn binary_module_exposes_bytes() {
        let transport = MapTransport::new(vec![(
            "app/lib.wasm",
            FetchOutcome::Binary {
                name: "app/lib.wasm".into(),
                bytes: vec![0, 97, 115, 109],
            },
        )]);
        let ns = runner(transport).import("/app/lib.wasm").await.unwrap();
        match ns.get("default") {
            Some(ExportValue::Bytes(b)) => assert_eq!(b, &vec![0, 97, 115, 109]),
            other => panic!("unexpected export: {other:?}"),
        }
    }

    #[tokio::test]
    async fn handle_fetch_invokes_default_handler() {
        let transport = MapTransport::new(vec![(
            "app/handler.ts",
            FetchOutcome::Inline {
                name: "app/handler.ts".into(),
                source: "export default handler;".into(),
            },
        )]);
        let mut response = runner(transport)
            .handle_fetch(request_for("/app/handler.ts"), &HandlerEnv::default())
            .await;
        assert_eq!(response.status, StatusCode::OK);
        let body = response.collect_body().await.unwrap();
        assert_eq!(&body[..], b"GET /app");
    }

    #[tokio::test]
    async fn import_error_sets_escalation_header() {
        let transport = MapTransport::new(vec![(
            "app/handler.ts",
            FetchOutcome::External {
                specifier: "/project/node_modules/native-pkg/index.js".into(),
            },
        )]);
        let response = runner(transport)
            .handle_fetch(request_for("/app/handler.ts"), &HandlerEnv::default())
            .await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.header(BUNDLE_HEADER),
            Some("/project/node_modules/native-pkg/index.js")
        );
    }

    #[tokio::test]
    async fn header_unsafe_import_path_yields_plain_diagnostic() {
        let transport = MapTransport::new(vec![(
            "app/handler.ts",
            FetchOutcome::External {
                specifier: "/project/node_modules/bad\npkg/index.js".into(),
            },
        )]);
        let response = runner(transport)
            .handle_fetch(request_for("/app/handler.ts"), &HandlerEnv::default())
            .await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.header(BUNDLE_HEADER).is_none());
    }

    #[tokio::test]
    async fn non_handler_module_is_a_plain_diagnostic() {
        let transport = MapTransport::new(vec![(
            "app/data.ts",
            FetchOutcome::Inline {
                name: "app/data.ts".into(),
                source: "export const x = 1;".into(),
            },
        )]);
        let mut response = runner(transport)
            .handle_fetch(request_for("/app/data.ts"), &HandlerEnv::default())
            .await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.header(BUNDLE_HEADER).is_none());
        let body = response.collect_body().await.unwrap();
        assert_eq!(&body[..], b"Module does not have a fetch handler");
    }

    #[tokio::test]
    async fn missing_entry_header_is_a_diagnostic() {
        let transport = MapTransport::new(vec![]);
        let req = SandboxRequest::new(
            Method::GET,
            Url::parse("http://localhost:5173/").unwrap(),
        );
        let response = runner(transport)
            .handle_fetch(req, &HandlerEnv::default())
            .await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
