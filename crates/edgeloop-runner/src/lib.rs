//! edgeloop-runner — module loading inside the sandbox.
//!
//! The sandbox has no filesystem and no native module loader; everything it
//! needs beyond a pair of host-injected primitives (an unsafe-eval and a
//! fetch-module transport) comes through the module fallback protocol. The
//! runner loads an entry module, follows redirects, evaluates inlined source,
//! dynamically imports host-external packages, and — crucially — turns an
//! unresolvable native import into a diagnostic response the host can act
//! on, instead of crashing the sandbox.

mod module;
mod primitives;
mod runner;

pub use module::{CONTEXT_KEYS, ExportValue, ModuleNamespace, wrap_module};
pub use primitives::{EvalError, FetchModule, FetchOutcome, NativeImport, UnsafeEval};
pub use runner::{FetchHandler, HandlerEnv, LifecycleContext, ModuleRunner, RunnerError};
