//! edgeloop-bridge — the convergence controller.
//!
//! Owns the single live sandbox instance and the force-inline package set.
//! Each inbound request is translated, dispatched into the sandbox, and its
//! response inspected for the escalation header. When the sandbox reports an
//! unresolvable native dependency, the controller maps the module path to
//! its owning package, grows the no-external set, and restarts the sandbox;
//! because the set only grows and the project's dependency set is finite,
//! the loop terminates.

mod controller;
mod error;
mod instance;
mod runner_instance;

pub use controller::{BridgePhase, ConvergenceController, Dispatch, spawn_reload_task};
pub use error::BridgeError;
pub use instance::{SandboxFactory, SandboxInstance};
pub use runner_instance::RunnerInstance;
