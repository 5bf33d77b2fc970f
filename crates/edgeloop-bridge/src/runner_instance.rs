//! In-process sandbox instance backed by the module runner.
//!
//! Used by embedders that supply the eval/import/transport primitives
//! directly (and by the integration tests); the daemon's process-spawning
//! factory lives with the daemon.

use std::sync::Arc;

use async_trait::async_trait;

use edgeloop_runner::{FetchModule, HandlerEnv, ModuleRunner, NativeImport, UnsafeEval};
use edgeloop_wire::{SandboxRequest, SandboxResponse};

use crate::instance::SandboxInstance;

pub struct RunnerInstance {
    runner: ModuleRunner,
    env: HandlerEnv,
}

impl RunnerInstance {
    pub fn new(
        transport: Arc<dyn FetchModule>,
        eval: Arc<dyn UnsafeEval>,
        native: Arc<dyn NativeImport>,
        env: HandlerEnv,
    ) -> Self {
        Self {
            runner: ModuleRunner::new(transport, eval, native),
            env,
        }
    }
}

#[async_trait]
impl SandboxInstance for RunnerInstance {
    async fn dispatch(&self, request: SandboxRequest) -> anyhow::Result<SandboxResponse> {
        // The runner converts every failure into a diagnostic response.
        Ok(self.runner.handle_fetch(request, &self.env).await)
    }

    async fn dispose(&self) {
        // Nothing external to release; the module cache dies with the
        // instance, so a replacement starts cold.
    }
}
