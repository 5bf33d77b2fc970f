//! The convergence controller state machine.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::{HeaderValue, StatusCode};
use tokio::sync::{RwLock, watch};
use tracing::{info, warn};

use edgeloop_core::package::owning_package;
use edgeloop_core::specifier::{host_path, normalize_specifier};
use edgeloop_core::types::{BUNDLE_HEADER, ENTRY_HEADER};
use edgeloop_core::{BridgeConfig, NoExternalSet};
use edgeloop_wire::{SandboxRequest, SandboxResponse};

use crate::error::BridgeError;
use crate::instance::{SandboxFactory, SandboxInstance};

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Starting,
    Serving,
    Escalating,
    Restarting,
    Disposed,
}

/// Result of handling one request.
#[derive(Debug)]
pub enum Dispatch {
    /// Forward this response to the developer.
    Response(SandboxResponse),
    /// The sandbox was restarted after force-inlining `package`; the
    /// original request should be reissued against the new instance.
    Restarted { package: String },
}

pub struct ConvergenceController {
    config: BridgeConfig,
    /// Project root, absolutized once so escalated paths compare cleanly.
    root: PathBuf,
    /// Absolute path of the entry module, set as `x-vite-entry` on every
    /// dispatched request.
    entry: String,
    factory: Box<dyn SandboxFactory>,
    /// Single-writer instance slot. Dispatch takes a read lock just long
    /// enough to clone the handle; restarts hold the write lock across
    /// dispose-then-create, which serializes them.
    slot: RwLock<Option<Arc<dyn SandboxInstance>>>,
    no_external: Mutex<NoExternalSet>,
    phase: Mutex<BridgePhase>,
}

impl ConvergenceController {
    pub fn new(config: BridgeConfig, factory: Box<dyn SandboxFactory>) -> Self {
        let root = config.root();
        let root = root.canonicalize().unwrap_or(root);
        let entry = config
            .entry()
            .map(|e| root.join(e).display().to_string())
            .unwrap_or_default();
        let no_external = NoExternalSet::seeded(config.seed_no_external());
        Self {
            config,
            root,
            entry,
            factory,
            slot: RwLock::new(None),
            no_external: Mutex::new(no_external),
            phase: Mutex::new(BridgePhase::Starting),
        }
    }

    pub fn phase(&self) -> BridgePhase {
        *lock(&self.phase)
    }

    pub fn no_external_snapshot(&self) -> Vec<String> {
        lock(&self.no_external).snapshot()
    }

    /// Create the first sandbox instance and begin serving.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let snapshot = self.no_external_snapshot();
        let instance = self
            .factory
            .create(&self.config, &snapshot)
            .await
            .map_err(|e| BridgeError::Factory(e.to_string()))?;
        *self.slot.write().await = Some(instance);
        self.set_phase(BridgePhase::Serving);
        info!(entry = %self.entry, inlined = snapshot.len(), "sandbox serving");
        Ok(())
    }

    /// Handle one translated request: dispatch into the sandbox and either
    /// forward the response or act on an escalation.
    pub async fn handle(&self, mut request: SandboxRequest) -> Result<Dispatch, BridgeError> {
        if let Ok(value) = HeaderValue::from_str(&self.entry) {
            request.headers.insert(ENTRY_HEADER, value);
        }

        let instance = self
            .slot
            .read()
            .await
            .clone()
            .ok_or(BridgeError::NotServing)?;

        let response = instance
            .dispatch(request)
            .await
            .map_err(|e| BridgeError::Dispatch(e.to_string()))?;

        match response.header(BUNDLE_HEADER).map(str::to_string) {
            Some(path) => self.escalate(&path).await,
            None => Ok(Dispatch::Response(response)),
        }
    }

    /// The sandbox reported an unresolvable native dependency. Map it to its
    /// owning package, grow the no-external set, and restart.
    async fn escalate(&self, module_path: &str) -> Result<Dispatch, BridgeError> {
        self.set_phase(BridgePhase::Escalating);
        let path = host_path(&normalize_specifier(module_path));

        let package = match owning_package(&path, &self.root) {
            Ok(package) => package,
            Err(e) => {
                // Misconfiguration the loop cannot fix; surface verbatim and
                // keep serving other requests.
                self.set_phase(BridgePhase::Serving);
                return Err(e.into());
            }
        };

        if !self.config.auto_no_external() {
            warn!(%package, "sandbox needs package inlined; automatic resolution disabled");
            self.set_phase(BridgePhase::Serving);
            return Ok(Dispatch::Response(SandboxResponse::text(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Add '{package}' to no_external"),
            )));
        }

        let newly_added = lock(&self.no_external).insert(package.clone());
        if newly_added {
            info!(%package, "force-inlining package");
        }
        self.restart().await?;
        Ok(Dispatch::Restarted { package })
    }

    /// Dispose the live instance and create a replacement with the current
    /// no-external snapshot. Fully serialized: the write lock is held until
    /// the new instance is ready.
    pub async fn restart(&self) -> Result<(), BridgeError> {
        if self.phase() == BridgePhase::Disposed {
            return Err(BridgeError::NotServing);
        }

        let mut slot = self.slot.write().await;
        // dispose() may have won the race for the lock; a disposed
        // controller never builds a replacement instance.
        if self.phase() == BridgePhase::Disposed {
            return Err(BridgeError::NotServing);
        }
        self.set_phase(BridgePhase::Restarting);
        if let Some(old) = slot.take() {
            old.dispose().await;
        }
        let snapshot = self.no_external_snapshot();
        let instance = self
            .factory
            .create(&self.config, &snapshot)
            .await
            .map_err(|e| BridgeError::Factory(e.to_string()))?;
        *slot = Some(instance);
        drop(slot);

        self.set_phase(BridgePhase::Serving);
        info!(inlined = ?self.no_external_snapshot(), "sandbox restarted");
        Ok(())
    }

    /// Tear the sandbox down. Idempotent; `Disposed` is terminal.
    pub async fn dispose(&self) {
        self.set_phase(BridgePhase::Disposed);
        if let Some(instance) = self.slot.write().await.take() {
            instance.dispose().await;
            info!("sandbox disposed");
        }
    }

    /// `Disposed` is terminal: once set, no later transition (a restart
    /// finishing behind a concurrent dispose, an escalation resolving) may
    /// resurrect the controller.
    fn set_phase(&self, phase: BridgePhase) {
        let mut guard = lock(&self.phase);
        if *guard != BridgePhase::Disposed {
            *guard = phase;
        }
    }
}

/// A change to the bridge module itself invalidates the running sandbox;
/// restart on every reload signal until the controller is disposed.
pub fn spawn_reload_task(
    controller: Arc<ConvergenceController>,
    mut reload: watch::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while reload.changed().await.is_ok() {
            if controller.phase() == BridgePhase::Disposed {
                break;
            }
            info!("bridge module changed; restarting sandbox");
            if let Err(e) = controller.restart().await {
                warn!(error = %e, "reload restart failed");
            }
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
