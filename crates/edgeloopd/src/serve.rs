//! Bridge assembly and the developer-facing HTTP front server.
//!
//! `run` wires the pieces together: the loopback resolver service, the
//! process sandbox factory under the convergence controller, the entry
//! watcher, and an http1 accept loop that translates each host request into
//! sandbox form and streams the sandbox response back.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use edgeloop_bridge::{
    BridgeError, ConvergenceController, Dispatch, spawn_reload_task,
};
use edgeloop_core::BridgeConfig;
use edgeloop_resolver::ResolverState;
use edgeloop_wire::{SandboxRequest, WireError, into_http_response, to_sandbox_request};

use crate::sandbox::ProcessFactory;
use crate::watch::spawn_entry_watch;

pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let root = config.root();
    let root = root.canonicalize().unwrap_or(root);

    // Resolver service, loopback only: the bind address is the access control.
    let resolver_port = config.resolver_port();
    let resolver_listener = TcpListener::bind(("127.0.0.1", resolver_port))
        .await
        .with_context(|| format!("failed to bind resolver port {resolver_port}"))?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let resolver_state = ResolverState::new(root.clone(), config.bundler());
    tokio::spawn(async move {
        if let Err(e) = edgeloop_resolver::serve(resolver_state, resolver_listener, shutdown_rx).await
        {
            error!(error = %e, "resolver service failed");
        }
    });
    info!(port = resolver_port, "resolver service listening on loopback");

    // The sandbox process listens one port above the resolver.
    let sandbox_port = resolver_port + 1;
    let factory = ProcessFactory::new(resolver_port, sandbox_port);
    let controller = Arc::new(ConvergenceController::new(config.clone(), Box::new(factory)));
    controller.start().await?;

    if let Some(entry) = config.entry() {
        let reload = spawn_entry_watch(root.join(entry));
        spawn_reload_task(controller.clone(), reload);
    }

    let front_port = config.front_port();
    let listener = TcpListener::bind(("127.0.0.1", front_port))
        .await
        .with_context(|| format!("failed to bind dev server port {front_port}"))?;
    info!("dev bridge listening on http://127.0.0.1:{front_port}");

    let mut shutdown = std::pin::pin!(shutdown_signal());
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let controller = controller.clone();
                tokio::spawn(async move {
                    let service =
                        service_fn(move |req| handle_request(controller.clone(), req));
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(%peer, error = %e, "connection ended with error");
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    controller.dispose().await;
    Ok(())
}

async fn handle_request(
    controller: Arc<ConvergenceController>,
    req: Request<Incoming>,
) -> Result<Response<BoxBody<Bytes, WireError>>, Infallible> {
    let request = match to_sandbox_request(req) {
        Ok(request) => request,
        Err(e) => return Ok(text(StatusCode::BAD_REQUEST, e.to_string())),
    };

    // A bodiless request can be replayed after a restart; one with a body
    // cannot, because its stream was consumed by the first dispatch.
    let replay = request.body.is_none().then(|| {
        (
            request.method.clone(),
            request.url.clone(),
            request.headers.clone(),
        )
    });

    let dispatch = match controller.handle(request).await {
        Ok(Dispatch::Restarted { package }) => match replay {
            Some((method, url, headers)) => {
                info!(%package, "replaying request against restarted sandbox");
                let mut retry = SandboxRequest::new(method, url);
                retry.headers = headers;
                controller.handle(retry).await
            }
            None => return Ok(retry_later(&package)),
        },
        other => other,
    };

    Ok(match dispatch {
        Ok(Dispatch::Response(response)) => into_http_response(response)
            .unwrap_or_else(|e| text(StatusCode::BAD_GATEWAY, e.to_string())),
        // A second escalation straight after a restart; let the client retry.
        Ok(Dispatch::Restarted { package }) => retry_later(&package),
        Err(BridgeError::NotServing) => {
            text(StatusCode::SERVICE_UNAVAILABLE, "sandbox is not serving")
        }
        Err(e) => {
            error!(error = %e, "dispatch failed");
            text(StatusCode::BAD_GATEWAY, e.to_string())
        }
    })
}

fn text(status: StatusCode, body: impl Into<String>) -> Response<BoxBody<Bytes, WireError>> {
    let body = Full::new(Bytes::from(body.into())).map_err(|never| match never {});
    let mut resp = Response::new(BoxBody::new(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

/// 503 telling the client to reissue immediately: the sandbox was restarted
/// mid-request and the original body is gone.
fn retry_later(package: &str) -> Response<BoxBody<Bytes, WireError>> {
    let mut resp = text(
        StatusCode::SERVICE_UNAVAILABLE,
        format!("sandbox restarted after inlining '{package}'; retry the request"),
    );
    resp.headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from_static("0"));
    resp
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
