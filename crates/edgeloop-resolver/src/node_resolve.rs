//! Node-style bare-specifier resolution.
//!
//! Walks `node_modules` directories upward from the referrer, then picks an
//! entry point from the package manifest. `import`-style resolution prefers
//! `exports`/`module`; `require`-style prefers `main`. Subpath imports are
//! resolved against the package directory with the usual extension probing.

use std::path::{Path, PathBuf};

use edgeloop_core::specifier::ResolveMethod;

use crate::error::{ResolveError, ResolveResult};

const EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "json"];

/// Resolve a bare specifier (`pkg`, `@scope/pkg/sub`) against the referrer's
/// directory. Returns an absolute path to an existing file.
pub fn resolve_bare(
    raw_specifier: &str,
    referrer_dir: &Path,
    method: ResolveMethod,
) -> ResolveResult<PathBuf> {
    let (package, subpath) = split_specifier(raw_specifier);

    let mut dir = Some(referrer_dir);
    while let Some(current) = dir {
        let pkg_dir = current.join("node_modules").join(package);
        if pkg_dir.is_dir() {
            if let Some(found) = resolve_in_package(&pkg_dir, subpath, method) {
                return Ok(found);
            }
        }
        dir = current.parent();
    }

    Err(ResolveError::NotFound {
        specifier: raw_specifier.to_string(),
        referrer: referrer_dir.display().to_string(),
    })
}

/// Split `@scope/pkg/sub/path` into the package name and optional subpath.
fn split_specifier(raw: &str) -> (&str, Option<&str>) {
    let segments = if raw.starts_with('@') { 2 } else { 1 };
    let mut index = 0;
    for _ in 0..segments {
        match raw[index..].find('/') {
            Some(found) => index += found + 1,
            None => return (raw, None),
        }
    }
    (&raw[..index - 1], Some(&raw[index..]))
}

fn resolve_in_package(
    pkg_dir: &Path,
    subpath: Option<&str>,
    method: ResolveMethod,
) -> Option<PathBuf> {
    if let Some(sub) = subpath {
        return probe(&pkg_dir.join(sub));
    }

    let manifest = pkg_dir.join("package.json");
    let entry = std::fs::read_to_string(&manifest)
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .and_then(|json| pick_entry(&json, method));

    match entry {
        Some(rel) => probe(&pkg_dir.join(rel)),
        None => probe(&pkg_dir.join("index.js")),
    }
}

/// Choose the manifest entry point for the given resolution method.
fn pick_entry(manifest: &serde_json::Value, method: ResolveMethod) -> Option<String> {
    let conditions: &[&str] = match method {
        ResolveMethod::Import => &["import", "default"],
        ResolveMethod::Require => &["require", "default"],
    };

    if let Some(exports) = manifest.get("exports") {
        if let Some(target) = resolve_exports(exports, conditions) {
            return Some(target);
        }
    }

    let fields: &[&str] = match method {
        ResolveMethod::Import => &["module", "main"],
        ResolveMethod::Require => &["main"],
    };
    fields
        .iter()
        .find_map(|f| manifest.get(f).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Walk an `exports` value: a bare string, a `"."` map, or a conditions map.
fn resolve_exports(exports: &serde_json::Value, conditions: &[&str]) -> Option<String> {
    match exports {
        serde_json::Value::String(target) => Some(target.clone()),
        serde_json::Value::Object(map) => {
            if let Some(dot) = map.get(".") {
                return resolve_exports(dot, conditions);
            }
            conditions
                .iter()
                .find_map(|c| map.get(*c))
                .and_then(|v| resolve_exports(v, conditions))
        }
        _ => None,
    }
}

/// Try the path as written, with known extensions, then as a directory with
/// an index file.
fn probe(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }
    for ext in EXTENSIONS {
        let candidate = base.with_extension(ext);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let index = base.join("index.js");
    index.is_file().then_some(index)
}
