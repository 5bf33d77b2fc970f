//! Sandbox instance and factory seams.

use std::sync::Arc;

use async_trait::async_trait;

use edgeloop_core::BridgeConfig;
use edgeloop_wire::{SandboxRequest, SandboxResponse};

/// An owned, disposable handle to one running sandbox.
///
/// Exactly one live instance exists per controller; on restart the old
/// instance is disposed before its replacement is created. Dispatch may be
/// called concurrently — the sandbox emulator supports concurrent fetches.
#[async_trait]
pub trait SandboxInstance: Send + Sync {
    async fn dispatch(&self, request: SandboxRequest) -> anyhow::Result<SandboxResponse>;

    /// Tear the instance down. Called exactly once by the controller, on
    /// restart or shutdown.
    async fn dispose(&self);
}

/// Creates sandbox instances from the bridge config plus the current
/// no-external snapshot.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(
        &self,
        config: &BridgeConfig,
        no_external: &[String],
    ) -> anyhow::Result<Arc<dyn SandboxInstance>>;
}
