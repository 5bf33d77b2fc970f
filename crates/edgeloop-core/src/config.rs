//! edgeloop.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_FRONT_PORT: u16 = 5173;
pub const DEFAULT_RESOLVER_PORT: u16 = 9973;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub project: ProjectConfig,
    pub server: Option<ServerConfig>,
    pub sandbox: Option<SandboxConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Project root; relative paths in the config resolve against it.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Developer-facing port.
    pub port: Option<u16>,
    /// Loopback port for the module resolver service.
    pub resolver_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Entry module whose default export is the fetch handler.
    pub entry: String,
    /// Command used to launch the sandbox emulator process.
    pub command: Option<Vec<String>>,
    /// Automatically inline packages the sandbox reports as unresolvable.
    pub auto_no_external: Option<bool>,
    /// Packages to force-inline from the start.
    pub no_external: Option<Vec<String>>,
    /// Bundler binary override (default: node_modules/.bin/esbuild).
    pub bundler: Option<PathBuf>,
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal edgeloop.toml.
    pub fn scaffold(name: &str, entry: &str) -> Self {
        BridgeConfig {
            project: ProjectConfig {
                name: name.to_string(),
                root: Some(PathBuf::from(".")),
            },
            server: Some(ServerConfig {
                port: Some(DEFAULT_FRONT_PORT),
                resolver_port: Some(DEFAULT_RESOLVER_PORT),
            }),
            sandbox: Some(SandboxConfig {
                entry: entry.to_string(),
                command: None,
                auto_no_external: Some(true),
                no_external: None,
                bundler: None,
            }),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.project
            .root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn front_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_FRONT_PORT)
    }

    pub fn resolver_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.resolver_port)
            .unwrap_or(DEFAULT_RESOLVER_PORT)
    }

    pub fn entry(&self) -> Option<&str> {
        self.sandbox.as_ref().map(|s| s.entry.as_str())
    }

    pub fn auto_no_external(&self) -> bool {
        self.sandbox
            .as_ref()
            .and_then(|s| s.auto_no_external)
            .unwrap_or(true)
    }

    pub fn seed_no_external(&self) -> Vec<String> {
        self.sandbox
            .as_ref()
            .and_then(|s| s.no_external.clone())
            .unwrap_or_default()
    }

    pub fn bundler(&self) -> PathBuf {
        self.sandbox
            .as_ref()
            .and_then(|s| s.bundler.clone())
            .unwrap_or_else(|| self.root().join("node_modules/.bin/esbuild"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_round_trips() {
        let config = BridgeConfig::scaffold("my-app", "dev/server.ts");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("my-app"));
        assert!(toml_str.contains("dev/server.ts"));

        let parsed: BridgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.project.name, "my-app");
        assert_eq!(parsed.entry(), Some("dev/server.ts"));
        assert!(parsed.auto_no_external());
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config: BridgeConfig = toml::from_str(
            r#"
[project]
name = "bare"
"#,
        )
        .unwrap();
        assert_eq!(config.front_port(), DEFAULT_FRONT_PORT);
        assert_eq!(config.resolver_port(), DEFAULT_RESOLVER_PORT);
        assert!(config.auto_no_external());
        assert!(config.seed_no_external().is_empty());
        assert!(config.bundler().ends_with("node_modules/.bin/esbuild"));
    }

    #[test]
    fn seed_packages_parse() {
        let config: BridgeConfig = toml::from_str(
            r#"
[project]
name = "seeded"

[sandbox]
entry = "dev/server.ts"
auto_no_external = false
no_external = ["pkg-a", "pkg-b"]
"#,
        )
        .unwrap();
        assert!(!config.auto_no_external());
        assert_eq!(config.seed_no_external(), vec!["pkg-a", "pkg-b"]);
    }
}
