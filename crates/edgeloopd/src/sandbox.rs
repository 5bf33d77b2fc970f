//! Process-backed sandbox: spawns the configured emulator command and
//! forwards dispatches to it over loopback HTTP.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use edgeloop_bridge::{SandboxFactory, SandboxInstance};
use edgeloop_core::BridgeConfig;
use edgeloop_wire::{SandboxRequest, SandboxResponse, WireError};

/// How long to wait for the sandbox process to accept connections.
const READY_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL: Duration = Duration::from_millis(100);

pub struct ProcessFactory {
    resolver_port: u16,
    sandbox_port: u16,
}

impl ProcessFactory {
    pub fn new(resolver_port: u16, sandbox_port: u16) -> Self {
        Self {
            resolver_port,
            sandbox_port,
        }
    }
}

#[async_trait]
impl SandboxFactory for ProcessFactory {
    async fn create(
        &self,
        config: &BridgeConfig,
        no_external: &[String],
    ) -> anyhow::Result<Arc<dyn SandboxInstance>> {
        let command = config
            .sandbox
            .as_ref()
            .and_then(|s| s.command.clone())
            .context("no sandbox command configured ([sandbox] command in edgeloop.toml)")?;
        let (program, args) = command
            .split_first()
            .context("sandbox command must not be empty")?;

        let root = config.root();
        let entry = config
            .entry()
            .map(|e| root.join(e))
            .context("no sandbox entry configured")?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&root)
            .env("EDGELOOP_ENTRY", &entry)
            .env("EDGELOOP_PORT", self.sandbox_port.to_string())
            .env(
                "EDGELOOP_RESOLVER_URL",
                format!("http://127.0.0.1:{}", self.resolver_port),
            )
            .env("EDGELOOP_NO_EXTERNAL", no_external.join(","))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn sandbox command '{program}'"))?;

        let addr = format!("127.0.0.1:{}", self.sandbox_port);
        wait_ready(&addr, &mut child).await?;
        info!(%addr, pid = child.id(), "sandbox process ready");

        Ok(Arc::new(ProcessInstance {
            child: Mutex::new(Some(child)),
            client: reqwest::Client::new(),
            base: format!("http://{addr}"),
        }))
    }
}

/// Poll the sandbox port until it accepts a connection, watching for early
/// process exit so a crashing command fails fast instead of timing out.
async fn wait_ready(addr: &str, child: &mut Child) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
    loop {
        if let Some(status) = child.try_wait()? {
            bail!("sandbox process exited during startup: {status}");
        }
        match TcpStream::connect(addr).await {
            Ok(_) => return Ok(()),
            Err(e) => debug!(%addr, error = %e, "sandbox not ready yet"),
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("sandbox did not start listening on {addr} within {READY_TIMEOUT:?}");
        }
        tokio::time::sleep(READY_POLL).await;
    }
}

pub struct ProcessInstance {
    child: Mutex<Option<Child>>,
    client: reqwest::Client,
    base: String,
}

#[async_trait]
impl SandboxInstance for ProcessInstance {
    async fn dispatch(&self, request: SandboxRequest) -> anyhow::Result<SandboxResponse> {
        // The sandbox sees the original URL in headers/Host; on the wire we
        // target its loopback listener with the same path and query.
        let path_and_query = match request.url.query() {
            Some(q) => format!("{}?{q}", request.url.path()),
            None => request.url.path().to_string(),
        };
        let url = format!("{}{path_and_query}", self.base);

        let mut builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(reqwest::Body::wrap_stream(body));
        }

        let response = builder.send().await?;
        let mut out = SandboxResponse::new(response.status());
        out.headers = response.headers().clone();
        out.body = Some(Box::pin(
            response
                .bytes_stream()
                .map_err(|e| WireError::Body(e.to_string())),
        ));
        Ok(out)
    }

    async fn dispose(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill sandbox process");
            }
            let _ = child.wait().await;
        }
    }
}
