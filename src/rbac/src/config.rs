//! Engine configuration loading and validation

use crate::error::{RbacError, Result};
use crate::hierarchy::DEFAULT_MAX_DEPTH;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// RBAC engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Upper bound on the external authentication call, in milliseconds
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,

    /// Longest parent chain allowed in any hierarchy; deeper graphs fail to load
    #[serde(default = "default_max_depth")]
    pub max_hierarchy_depth: usize,

    /// Memoise per-node closures inside a snapshot
    #[serde(default = "default_true")]
    pub closure_cache: bool,

    #[serde(default = "default_true")]
    pub enable_audit: bool,

    /// Audit entries kept in memory before the oldest are dropped
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,

    /// Re-check temporal constraints of active roles before each decision
    #[serde(default = "default_true")]
    pub revalidate_on_check: bool,
}

fn default_true() -> bool { true }
fn default_auth_timeout_ms() -> u64 { 5000 }
fn default_max_depth() -> usize { DEFAULT_MAX_DEPTH }
fn default_audit_capacity() -> usize { 10_000 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auth_timeout_ms: default_auth_timeout_ms(),
            max_hierarchy_depth: default_max_depth(),
            closure_cache: true,
            enable_audit: true,
            audit_capacity: default_audit_capacity(),
            revalidate_on_check: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(contents)
            .map_err(|e| RbacError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.auth_timeout_ms == 0 {
            return Err(RbacError::Config("auth_timeout_ms must be greater than 0".to_string()));
        }

        if self.max_hierarchy_depth == 0 {
            return Err(RbacError::Config("max_hierarchy_depth must be greater than 0".to_string()));
        }

        if self.enable_audit && self.audit_capacity == 0 {
            return Err(RbacError::Config(
                "audit_capacity must be greater than 0 when audit is enabled".to_string(),
            ));
        }

        Ok(())
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }
}
