//! Module specifier normalization.
//!
//! Specifiers arrive from the sandbox in several shapes: absolute paths with
//! a leading separator, `file:` URLs, Windows paths with backslashes, and
//! dev-server cache-busted paths (`?v=abc123`). Everything is folded into one
//! canonical form before it is used as a resolution key: forward slashes, no
//! scheme, no leading separator, no query decoration.

use serde::{Deserialize, Serialize};

/// How the sandbox asked for a module to be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveMethod {
    /// ESM `import` — module-resolution-algorithm semantics.
    Import,
    /// CJS `require` — synchronous resolution semantics.
    Require,
}

impl ResolveMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolveMethod::Import => "import",
            ResolveMethod::Require => "require",
        }
    }

    /// Parse the `X-Resolve-Method` header value. Unknown values fall back
    /// to `Import`, matching how the sandbox loader behaves when the header
    /// is absent.
    pub fn parse(value: &str) -> Self {
        match value {
            "require" => ResolveMethod::Require,
            _ => ResolveMethod::Import,
        }
    }
}

/// Normalize a raw specifier into its canonical resolution key.
pub fn normalize_specifier(raw: &str) -> String {
    normalize_inner(raw, cfg!(windows))
}

/// Order matters and mirrors what the sandbox sends: strip one leading
/// separator, then the `file:` scheme, then (on Windows, where the scheme
/// leaves a second separator in front of the drive letter) one more.
fn normalize_inner(raw: &str, windows: bool) -> String {
    let mut s = raw.replace('\\', "/");
    if let Some(idx) = s.find('?') {
        s.truncate(idx);
    }
    let mut rest = s.as_str();
    rest = rest.strip_prefix('/').unwrap_or(rest);
    rest = rest.strip_prefix("file://").or_else(|| rest.strip_prefix("file:")).unwrap_or(rest);
    rest = rest.strip_prefix('/').unwrap_or(rest);
    if windows {
        rest = rest.strip_prefix('/').unwrap_or(rest);
    }
    rest.to_string()
}

/// Whether the specifier, as written in source, is a relative or absolute
/// path rather than a bare package name.
pub fn is_path_specifier(raw: &str) -> bool {
    raw.starts_with("./") || raw.starts_with("../") || raw.starts_with('/')
}

/// Map a normalized specifier back to a host filesystem path.
pub fn host_path(normalized: &str) -> std::path::PathBuf {
    if cfg!(windows) {
        std::path::PathBuf::from(normalized)
    } else {
        std::path::PathBuf::from(format!("/{normalized}"))
    }
}
