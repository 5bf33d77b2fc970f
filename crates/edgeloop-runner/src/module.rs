//! Module namespaces and source wrapping.

use std::collections::HashMap;
use std::sync::Arc;

use crate::runner::{FetchHandler, RunnerError};

/// Context bindings injected into every inlined module's scope.
///
/// The transformed source references these names; the eval primitive receives
/// them in this order.
pub const CONTEXT_KEYS: &[&str] = &[
    "__vite_ssr_exports__",
    "__vite_ssr_import__",
    "__vite_ssr_dynamic_import__",
    "__vite_ssr_exportAll__",
    "__vite_ssr_import_meta__",
];

/// Wrap transformed module source into an evaluable async function over the
/// fixed context bindings.
pub fn wrap_module(source: &str) -> String {
    format!("'use strict';async({})=>{{{}}}", CONTEXT_KEYS.join(","), source)
}

/// One export of a module namespace, as seen from the host side of the eval
/// primitive.
#[derive(Clone)]
pub enum ExportValue {
    /// A fetch-style handler (the shape the entry module must expose).
    Handler(Arc<dyn FetchHandler>),
    Text(String),
    Bytes(Vec<u8>),
}

impl std::fmt::Debug for ExportValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportValue::Handler(_) => f.write_str("Handler(..)"),
            ExportValue::Text(t) => write!(f, "Text({t:?})"),
            ExportValue::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
        }
    }
}

/// A module's export namespace.
///
/// After an inlined module finishes evaluating, its namespace is frozen to
/// enforce the immutability a real module system provides.
#[derive(Debug, Default)]
pub struct ModuleNamespace {
    exports: HashMap<String, ExportValue>,
    frozen: bool,
}

impl ModuleNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace for a binary asset: the bytes are the default export.
    pub fn binary(bytes: Vec<u8>) -> Self {
        let mut ns = Self::new();
        ns.exports.insert("default".to_string(), ExportValue::Bytes(bytes));
        ns
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: ExportValue,
    ) -> Result<(), RunnerError> {
        if self.frozen {
            return Err(RunnerError::FrozenNamespace);
        }
        self.exports.insert(name.into(), value);
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn get(&self, name: &str) -> Option<&ExportValue> {
        self.exports.get(name)
    }

    pub fn default_handler(&self) -> Option<Arc<dyn FetchHandler>> {
        match self.exports.get("default") {
            Some(ExportValue::Handler(h)) => Some(h.clone()),
            _ => None,
        }
    }
}
