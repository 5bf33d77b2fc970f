//! Shared types and wire constants used across Edgeloop crates.

use serde::{Deserialize, Serialize};

use crate::specifier::ResolveMethod;

/// Header naming the entry module whose default export handles the request.
pub const ENTRY_HEADER: &str = "x-vite-entry";
/// Escalation header: a sandbox response carrying this names a module path
/// the sandbox could not import natively. Interpreted by the host, never
/// forwarded to the developer.
pub const BUNDLE_HEADER: &str = "x-request-bundle";
/// Resolver request header selecting `import` vs `require` semantics.
pub const RESOLVE_METHOD_HEADER: &str = "X-Resolve-Method";
/// Content digest of an inlined module, attached to resolver responses.
pub const MODULE_DIGEST_HEADER: &str = "x-module-digest";

/// Resolver query parameter names.
pub const PARAM_SPECIFIER: &str = "specifier";
pub const PARAM_REFERRER: &str = "referrer";
pub const PARAM_RAW_SPECIFIER: &str = "rawSpecifier";

/// A resolution request as received by the resolver service: the normalized
/// specifier, the importing module, and the specifier text exactly as it was
/// written in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub method: ResolveMethod,
    pub specifier: String,
    pub referrer: String,
    pub raw_specifier: String,
}

/// Outcome of resolving one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionResult {
    /// The sandbox loader should re-request under this corrected specifier.
    Redirect(String),
    /// Transpiled ESM source, ready to evaluate inside the sandbox.
    InlineModule {
        name: String,
        source: String,
        /// sha256 hex of `source`.
        digest: String,
    },
    /// Raw bytes of a non-JS asset (e.g. a compiled wasm module).
    BinaryAsset { name: String, bytes: Vec<u8> },
}

/// JSON body for an inlined module response: `{name, esModule}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlinePayload {
    pub name: String,
    #[serde(rename = "esModule")]
    pub es_module: String,
}

/// JSON body for a binary asset response: `{name, wasm: number[]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryPayload {
    pub name: String,
    pub wasm: Vec<u8>,
}

/// Either resolver payload shape, for consumers decoding a `200` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModulePayload {
    Binary(BinaryPayload),
    Inline(InlinePayload),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_payload_serializes_bytes_as_numbers() {
        let payload = BinaryPayload {
            name: "foo.wasm".into(),
            wasm: vec![0, 97, 115, 109],
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"name":"foo.wasm","wasm":[0,97,115,109]}"#);
    }

    #[test]
    fn module_payload_distinguishes_shapes() {
        let inline: ModulePayload =
            serde_json::from_str(r#"{"name":"a.ts","esModule":"export default 1"}"#).unwrap();
        assert!(matches!(inline, ModulePayload::Inline(_)));

        let binary: ModulePayload =
            serde_json::from_str(r#"{"name":"a.wasm","wasm":[1,2,3]}"#).unwrap();
        match binary {
            ModulePayload::Binary(b) => assert_eq!(b.wasm, vec![1, 2, 3]),
            ModulePayload::Inline(_) => panic!("decoded as inline"),
        }
    }
}
