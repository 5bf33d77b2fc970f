pub mod config;
pub mod no_external;
pub mod package;
pub mod specifier;
pub mod types;

pub use config::BridgeConfig;
pub use no_external::NoExternalSet;
pub use package::{PackageError, owning_package};
pub use specifier::{ResolveMethod, normalize_specifier};
pub use types::*;
