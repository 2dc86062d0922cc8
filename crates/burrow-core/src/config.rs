//! burrow.toml configuration parser.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level daemon configuration, normally loaded from `burrow.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurrowConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub enclave: EnclaveDefaults,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

/// Which container backend the daemon drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Seconds to wait for the backend engine to answer a liveness probe.
    #[serde(default = "default_readiness_secs")]
    pub readiness_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Docker,
    Kubernetes,
}

/// Per-enclave defaults, overridable per create-enclave call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclaveDefaults {
    /// CIDR block each enclave allocates service IPs from.
    #[serde(default = "default_cidr")]
    pub cidr: String,
    /// Whether new enclaves support network partitioning (sidecars).
    #[serde(default)]
    pub partitioning_enabled: bool,
    /// Seconds a container gets to stop gracefully on service removal.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for EnclaveDefaults {
    fn default() -> Self {
        Self {
            cidr: default_cidr(),
            partitioning_enabled: false,
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl EnclaveDefaults {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl BackendConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }
}

fn default_cidr() -> String {
    "172.23.0.0/16".to_string()
}

fn default_stop_timeout_secs() -> u64 {
    10
}

fn default_readiness_secs() -> u64 {
    7
}

impl BurrowConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: BurrowConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.readiness_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "backend.readiness_timeout_secs must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    /// Default configuration for a local Docker daemon.
    pub fn local_docker() -> Self {
        Self {
            backend: BackendConfig {
                kind: BackendKind::Docker,
                readiness_timeout_secs: default_readiness_secs(),
            },
            enclave: EnclaveDefaults::default(),
            env: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let toml_str = r#"
[backend]
kind = "docker"
"#;
        let config: BurrowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Docker);
        assert_eq!(config.backend.readiness_timeout_secs, 7);
        assert_eq!(config.enclave.cidr, "172.23.0.0/16");
        assert!(!config.enclave.partitioning_enabled);
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
[backend]
kind = "kubernetes"
readiness_timeout_secs = 12

[enclave]
cidr = "10.88.0.0/24"
partitioning_enabled = true
stop_timeout_secs = 3
"#;
        let config: BurrowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Kubernetes);
        assert_eq!(config.backend.readiness_timeout(), Duration::from_secs(12));
        assert!(config.enclave.partitioning_enabled);
        assert_eq!(config.enclave.stop_timeout(), Duration::from_secs(3));
    }
}
