//! Gateway configuration.
//!
//! Loaded from a JSON file; every field has a default, so an empty object
//! (or no file at all) describes a module with inherited stdio and the
//! standard guest ABI.
//!
//! ```json
//! {
//!   "module": "s2-udf-quickjs.wasm",
//!   "wasi": {
//!     "preopens": [{ "host": "./app", "guest": "/app", "read_only": true }],
//!     "env": { "TZ": "UTC" }
//!   },
//!   "probe_targets": true
//! }
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::sandbox::GuestAbi;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no module path given")]
    NoModule,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Path of the compiled UDF module.
    pub module: Option<PathBuf>,
    pub wasi: WasiConfig,
    pub abi: GuestAbi,
    /// Check that a call target names a function before calling it, so a
    /// missing function is reported as unresolved rather than as a failed
    /// call.
    ///
    /// The check runs a script in the guest. When the target is missing, the
    /// engine prints `ReferenceError: <target> is not a function` to the
    /// guest's stderr, which the host inherits when `wasi.inherit_stderr` is
    /// set (the default). Turn that off to keep unresolved calls quiet.
    pub probe_targets: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            module: None,
            wasi: WasiConfig::default(),
            abi: GuestAbi::default(),
            probe_targets: true,
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&text)?;

        // Relative paths are relative to the config file, not the cwd.
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The module path, or an error when none was configured.
    pub fn module_path(&self) -> Result<&Path, ConfigError> {
        self.module.as_deref().ok_or(ConfigError::NoModule)
    }

    fn rebase(&mut self, base: &Path) {
        if let Some(module) = &self.module {
            if module.is_relative() {
                self.module = Some(base.join(module));
            }
        }
        for preopen in &mut self.wasi.preopens {
            if preopen.host.is_relative() {
                preopen.host = base.join(&preopen.host);
            }
        }
    }
}

/// Capabilities granted to the guest through WASI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WasiConfig {
    pub inherit_stdin: bool,
    pub inherit_stdout: bool,
    pub inherit_stderr: bool,
    /// Guest `argv`.
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub preopens: Vec<Preopen>,
}

impl Default for WasiConfig {
    fn default() -> Self {
        WasiConfig {
            inherit_stdin: true,
            inherit_stdout: true,
            inherit_stderr: true,
            args: Vec::new(),
            env: BTreeMap::new(),
            preopens: Vec::new(),
        }
    }
}

/// A host directory made visible to the guest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Preopen {
    pub host: PathBuf,
    pub guest: String,
    #[serde(default)]
    pub read_only: bool,
}

impl Preopen {
    /// Parses the `HOST:GUEST` form used on the command line.
    pub fn parse(spec: &str) -> Option<Preopen> {
        let (host, guest) = spec.rsplit_once(':')?;
        if host.is_empty() || !guest.starts_with('/') {
            return None;
        }
        Some(Preopen {
            host: PathBuf::from(host),
            guest: guest.to_string(),
            read_only: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        assert_eq!(GatewayConfig::from_json("{}").unwrap(), GatewayConfig::default());
    }

    #[test]
    fn probing_and_stderr_are_on_by_default() {
        let config = GatewayConfig::default();
        assert!(config.probe_targets);
        assert!(config.wasi.inherit_stderr);
    }

    #[test]
    fn full_config() {
        let config = GatewayConfig::from_json(
            r#"{
                "module": "udf.wasm",
                "wasi": {
                    "inherit_stdin": false,
                    "args": ["udf"],
                    "env": {"TZ": "UTC"},
                    "preopens": [{"host": "app", "guest": "/app", "read_only": true}]
                },
                "abi": {"realloc": ["my_realloc"]},
                "probe_targets": false
            }"#,
        )
        .unwrap();
        assert_eq!(config.module_path().unwrap(), Path::new("udf.wasm"));
        assert!(!config.wasi.inherit_stdin);
        assert!(config.wasi.inherit_stdout);
        assert_eq!(config.wasi.env.get("TZ").map(String::as_str), Some("UTC"));
        assert_eq!(config.wasi.preopens[0].guest, "/app");
        assert!(config.wasi.preopens[0].read_only);
        assert_eq!(config.abi.realloc, vec!["my_realloc".to_string()]);
        assert_eq!(config.abi.exec, "exec");
        assert!(!config.probe_targets);
    }

    #[test]
    fn unknown_shape_is_a_parse_error() {
        assert!(matches!(
            GatewayConfig::from_json(r#"{"probe_targets": "yes"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_module() {
        assert!(matches!(GatewayConfig::default().module_path(), Err(ConfigError::NoModule)));
    }

    #[test]
    fn preopen_spec() {
        let p = Preopen::parse("./app:/app").unwrap();
        assert_eq!(p.host, PathBuf::from("./app"));
        assert_eq!(p.guest, "/app");
        assert_eq!(Preopen::parse("C:\\app:/app").unwrap().host, PathBuf::from("C:\\app"));
        assert!(Preopen::parse("app").is_none());
        assert!(Preopen::parse("app:relative").is_none());
    }
}
