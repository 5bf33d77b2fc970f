//! Owning-package lookup.
//!
//! Maps an escalated module path to the package that provides it by walking
//! parent directories until a `package.json` with a `name` field is found.
//! This is a best-effort heuristic: the manifest's declared entry points are
//! not checked against the escalated path.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("no package manifest found above {0} (searched up to the project root)")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed package manifest {path}: {source}")]
    Manifest {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Find the name of the package that owns `path`.
///
/// The walk starts at `path`'s directory and stops once it would leave
/// `project_root`. A manifest without a `name` field does not end the walk.
pub fn owning_package(path: &Path, project_root: &Path) -> Result<String, PackageError> {
    let mut dir = path.parent();
    while let Some(current) = dir {
        if !current.starts_with(project_root) {
            break;
        }
        let manifest = current.join("package.json");
        if manifest.is_file() {
            let text = std::fs::read_to_string(&manifest).map_err(|source| PackageError::Io {
                path: manifest.display().to_string(),
                source,
            })?;
            let json: serde_json::Value =
                serde_json::from_str(&text).map_err(|source| PackageError::Manifest {
                    path: manifest.display().to_string(),
                    source,
                })?;
            if let Some(name) = json.get("name").and_then(|n| n.as_str()) {
                return Ok(name.to_string());
            }
        }
        dir = current.parent();
    }
    Err(PackageError::NotFound(path.display().to_string()))
}
