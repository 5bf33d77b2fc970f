//! The force-inline package set.
//!
//! Packages in this set are bundled into the sandbox module graph instead of
//! being loaded as host-external references. The set only ever grows within a
//! run; together with the project's finite dependency set this bounds the
//! convergence loop.

use std::collections::BTreeSet;

/// Insert-only set of package names that must be inlined.
///
/// Owned by the convergence controller; a snapshot is threaded into the
/// sandbox factory on every (re)start. There is deliberately no removal API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoExternalSet {
    packages: BTreeSet<String>,
}

impl NoExternalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the set, e.g. from configuration.
    pub fn seeded<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a package. Returns `true` if it was not already present.
    pub fn insert(&mut self, package: impl Into<String>) -> bool {
        self.packages.insert(package.into())
    }

    pub fn contains(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    /// Ordered snapshot for handing to a sandbox factory.
    pub fn snapshot(&self) -> Vec<String> {
        self.packages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
