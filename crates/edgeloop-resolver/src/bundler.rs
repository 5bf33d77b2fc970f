//! Single-entry bundling via the esbuild binary.
//!
//! Each bundleable specifier is handed to esbuild as one isolated entry
//! point: ESM output, browser-like platform, package imports left external,
//! wasm assets externalized, no minification. A banner shims `require` for
//! code that still uses synchronous imports, scoped to the entry's own
//! directory. Bundler failures come back as diagnostics, not errors thrown
//! across the sandbox boundary.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

use crate::error::{ResolveError, ResolveResult};

/// Bundle one entry point, returning the generated ESM source.
///
/// `entry_key` is the normalized specifier (no leading slash), used to scope
/// the injected `require` shim.
pub async fn bundle_entry(bundler: &Path, entry: &Path, entry_key: &str) -> ResolveResult<String> {
    debug!(entry = %entry.display(), "bundling entry point");

    let output = Command::new(bundler)
        .arg(entry)
        .arg("--bundle")
        .arg("--format=esm")
        .arg("--platform=browser")
        .arg("--target=esnext")
        .arg("--packages=external")
        .arg("--external:*.wasm")
        .arg("--log-level=error")
        .arg(format!("--banner:js={}", require_shim(entry_key)))
        .output()
        .await
        .map_err(|e| ResolveError::Bundle {
            diagnostic: format!(
                "bundler not found or not runnable.\n\nExpected at: {}\nCause: {e}\n\nTo install, run:\n\n  npm install esbuild",
                bundler.display()
            ),
        })?;

    if !output.status.success() {
        return Err(ResolveError::Bundle {
            diagnostic: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| ResolveError::Bundle {
        diagnostic: format!("bundler produced non-UTF-8 output: {e}"),
    })
}

/// Generate the `require` shim banner: proxies synchronous imports into host
/// module resolution, scoped to the entry's directory.
fn require_shim(entry_key: &str) -> String {
    format!(
        r#"import {{ createRequire }} from "node:module";
const ___r = createRequire("/{entry_key}");
const require = (id) => {{
  const result = ___r(id);
  return result.default;
}};"#
    )
}

/// sha256 hex digest of bundled source, attached to inline-module responses.
pub fn source_digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}
