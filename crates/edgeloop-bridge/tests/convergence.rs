//! Convergence loop integration tests.
//!
//! The sandbox is mocked at the `SandboxInstance` seam: instances answer
//! with an escalation until the factory sees the needed package in its
//! no-external snapshot, mirroring a native dependency that must be
//! force-inlined before the handler can load.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use http::{Method, StatusCode};
use tokio::sync::{Notify, Semaphore};
use url::Url;

use edgeloop_bridge::{
    BridgeError, BridgePhase, ConvergenceController, Dispatch, SandboxFactory, SandboxInstance,
};
use edgeloop_core::BridgeConfig;
use edgeloop_core::types::BUNDLE_HEADER;
use edgeloop_wire::{SandboxRequest, SandboxResponse};

struct MockInstance {
    inlined: Vec<String>,
    escalate_path: PathBuf,
    disposed: Arc<AtomicUsize>,
}

#[async_trait]
impl SandboxInstance for MockInstance {
    async fn dispatch(&self, _request: SandboxRequest) -> anyhow::Result<SandboxResponse> {
        if self.inlined.iter().any(|p| p == "native-pkg") {
            Ok(SandboxResponse::text(StatusCode::OK, "ok"))
        } else {
            let mut resp = SandboxResponse::text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to import native-pkg",
            );
            resp.headers.insert(
                BUNDLE_HEADER,
                self.escalate_path.display().to_string().parse().unwrap(),
            );
            Ok(resp)
        }
    }

    async fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockFactory {
    escalate_path: PathBuf,
    created: AtomicUsize,
    disposed: Arc<AtomicUsize>,
}

#[async_trait]
impl SandboxFactory for MockFactory {
    async fn create(
        &self,
        _config: &BridgeConfig,
        no_external: &[String],
    ) -> anyhow::Result<Arc<dyn SandboxInstance>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockInstance {
            inlined: no_external.to_vec(),
            escalate_path: self.escalate_path.clone(),
            disposed: self.disposed.clone(),
        }))
    }
}

fn project_with_native_pkg() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("node_modules/native-pkg");
    fs::create_dir_all(&pkg).unwrap();
    fs::write(pkg.join("package.json"), r#"{"name":"native-pkg"}"#).unwrap();
    fs::write(pkg.join("index.js"), "module.exports = require('./native.node');").unwrap();
    dir
}

fn config_for(root: &Path, auto: bool) -> BridgeConfig {
    let mut config = BridgeConfig::scaffold("convergence-test", "app/handler.ts");
    config.project.root = Some(root.to_path_buf());
    if let Some(sandbox) = config.sandbox.as_mut() {
        sandbox.auto_no_external = Some(auto);
    }
    config
}

fn controller_for(root: &Path, auto: bool) -> (ConvergenceController, Arc<AtomicUsize>) {
    let disposed = Arc::new(AtomicUsize::new(0));
    let factory = MockFactory {
        escalate_path: root
            .canonicalize()
            .unwrap()
            .join("node_modules/native-pkg/index.js"),
        created: AtomicUsize::new(0),
        disposed: disposed.clone(),
    };
    (
        ConvergenceController::new(config_for(root, auto), Box::new(factory)),
        disposed,
    )
}

fn get_request() -> SandboxRequest {
    SandboxRequest::new(Method::GET, Url::parse("http://localhost:5173/").unwrap())
}

#[tokio::test]
async fn escalation_inlines_package_and_restart_succeeds() {
    let dir = project_with_native_pkg();
    let (controller, disposed) = controller_for(dir.path(), true);
    controller.start().await.unwrap();
    assert_eq!(controller.phase(), BridgePhase::Serving);

    // First dispatch escalates and restarts.
    match controller.handle(get_request()).await.unwrap() {
        Dispatch::Restarted { package } => assert_eq!(package, "native-pkg"),
        Dispatch::Response(_) => panic!("expected escalation"),
    }
    assert_eq!(controller.no_external_snapshot(), vec!["native-pkg"]);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert_eq!(controller.phase(), BridgePhase::Serving);

    // The reissued request now succeeds without escalation.
    match controller.handle(get_request()).await.unwrap() {
        Dispatch::Response(mut resp) => {
            assert_eq!(resp.status, StatusCode::OK);
            assert_eq!(&resp.collect_body().await.unwrap()[..], b"ok");
        }
        Dispatch::Restarted { .. } => panic!("second escalation"),
    }
}

#[tokio::test]
async fn no_external_set_is_monotonic_across_restarts() {
    let dir = project_with_native_pkg();
    let (controller, _) = controller_for(dir.path(), true);
    controller.start().await.unwrap();

    let _ = controller.handle(get_request()).await.unwrap();
    assert!(controller.no_external_snapshot().contains(&"native-pkg".to_string()));

    for _ in 0..3 {
        controller.restart().await.unwrap();
        assert!(controller.no_external_snapshot().contains(&"native-pkg".to_string()));
    }
}

#[tokio::test]
async fn manual_mode_returns_instruction_instead_of_restarting() {
    let dir = project_with_native_pkg();
    let (controller, disposed) = controller_for(dir.path(), false);
    controller.start().await.unwrap();

    match controller.handle(get_request()).await.unwrap() {
        Dispatch::Response(mut resp) => {
            assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
            let body = resp.collect_body().await.unwrap();
            assert_eq!(&body[..], b"Add 'native-pkg' to no_external");
        }
        Dispatch::Restarted { .. } => panic!("must not restart in manual mode"),
    }
    assert!(controller.no_external_snapshot().is_empty());
    assert_eq!(disposed.load(Ordering::SeqCst), 0);
    assert_eq!(controller.phase(), BridgePhase::Serving);
}

#[tokio::test]
async fn missing_manifest_is_fatal_to_the_escalation() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    let disposed = Arc::new(AtomicUsize::new(0));
    let factory = MockFactory {
        // Escalated path has no package.json anywhere above it.
        escalate_path: dir.path().canonicalize().unwrap().join("src/orphan.js"),
        created: AtomicUsize::new(0),
        disposed: disposed.clone(),
    };
    let controller =
        ConvergenceController::new(config_for(dir.path(), true), Box::new(factory));
    controller.start().await.unwrap();

    // The mock still escalates (its inlined set never contains native-pkg).
    let err = controller.handle(get_request()).await.unwrap_err();
    assert!(matches!(err, BridgeError::Package(_)));
    // The loop cannot fix this; the controller keeps serving other requests.
    assert_eq!(controller.phase(), BridgePhase::Serving);
}

#[tokio::test]
async fn dispose_is_idempotent_and_terminal() {
    let dir = project_with_native_pkg();
    let (controller, disposed) = controller_for(dir.path(), true);
    controller.start().await.unwrap();

    controller.dispose().await;
    controller.dispose().await;
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert_eq!(controller.phase(), BridgePhase::Disposed);

    assert!(matches!(
        controller.handle(get_request()).await,
        Err(BridgeError::NotServing)
    ));
    assert!(matches!(
        controller.restart().await,
        Err(BridgeError::NotServing)
    ));
}

/// Factory whose second and later creations block on a semaphore, so a test
/// can hold a restart open mid-creation.
struct GatedFactory {
    escalate_path: PathBuf,
    gate: Arc<Semaphore>,
    blocked_in_create: Arc<Notify>,
    created: AtomicUsize,
    disposed: Arc<AtomicUsize>,
}

#[async_trait]
impl SandboxFactory for GatedFactory {
    async fn create(
        &self,
        _config: &BridgeConfig,
        no_external: &[String],
    ) -> anyhow::Result<Arc<dyn SandboxInstance>> {
        if self.created.fetch_add(1, Ordering::SeqCst) > 0 {
            self.blocked_in_create.notify_one();
            let _permit = self.gate.acquire().await?;
        }
        Ok(Arc::new(MockInstance {
            inlined: no_external.to_vec(),
            escalate_path: self.escalate_path.clone(),
            disposed: self.disposed.clone(),
        }))
    }
}

#[tokio::test]
async fn dispose_during_restart_leaves_controller_disposed() {
    let dir = project_with_native_pkg();
    let disposed = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let blocked = Arc::new(Notify::new());
    let factory = GatedFactory {
        escalate_path: dir
            .path()
            .canonicalize()
            .unwrap()
            .join("node_modules/native-pkg/index.js"),
        gate: gate.clone(),
        blocked_in_create: blocked.clone(),
        created: AtomicUsize::new(0),
        disposed: disposed.clone(),
    };
    let controller = Arc::new(ConvergenceController::new(
        config_for(dir.path(), true),
        Box::new(factory),
    ));
    controller.start().await.unwrap();

    // Hold a restart open inside the factory, then dispose underneath it.
    let restarting = tokio::spawn({
        let c = controller.clone();
        async move { c.restart().await }
    });
    blocked.notified().await;

    let disposing = tokio::spawn({
        let c = controller.clone();
        async move { c.dispose().await }
    });
    while controller.phase() != BridgePhase::Disposed {
        tokio::task::yield_now().await;
    }
    gate.add_permits(1);

    let _ = restarting.await.unwrap();
    disposing.await.unwrap();

    // The finished restart must not resurrect the controller, and the
    // instance it built must not outlive the dispose.
    assert_eq!(controller.phase(), BridgePhase::Disposed);
    assert_eq!(disposed.load(Ordering::SeqCst), 2);
    assert!(matches!(
        controller.handle(get_request()).await,
        Err(BridgeError::NotServing)
    ));
    assert!(matches!(
        controller.restart().await,
        Err(BridgeError::NotServing)
    ));
}

#[tokio::test]
async fn dispatch_racing_a_restart_completes_cleanly() {
    let dir = project_with_native_pkg();
    let (controller, _) = controller_for(dir.path(), true);
    controller.start().await.unwrap();
    let controller = Arc::new(controller);

    let c1 = controller.clone();
    let c2 = controller.clone();
    let (dispatch, restart) = tokio::join!(
        async move { c1.handle(get_request()).await },
        async move { c2.restart().await },
    );
    restart.unwrap();
    // The dispatch either completed against one of the instances or failed
    // cleanly; it must never hang or poison the controller.
    match dispatch {
        Ok(_) | Err(BridgeError::NotServing) | Err(BridgeError::Dispatch(_)) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
    assert_eq!(controller.phase(), BridgePhase::Serving);
}
