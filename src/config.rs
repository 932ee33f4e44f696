//! Runtime configuration
//!
//! Resolved once at process start (JSON file, then `MODELOPS_*` environment
//! overrides) and handed to the stages as a plain value. Nothing below the
//! binary entry point reads the process environment.

use crate::error::{LifecycleError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How scoring aligns entity keys with predictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityAlignment {
    /// Entity keys are read positionally from the unscaled feature frame
    #[default]
    Positional,
    /// Entity keys are read from the key column carried through prediction
    Keyed,
}

impl std::str::FromStr for IdentityAlignment {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "positional" => Ok(Self::Positional),
            "keyed" => Ok(Self::Keyed),
            other => Err(LifecycleError::Config(format!(
                "unknown identity alignment '{}', expected positional or keyed",
                other
            ))),
        }
    }
}

/// Process-wide configuration for the lifecycle stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Root directory of the local warehouse
    pub warehouse_root: PathBuf,

    /// Root directory of the versioned artifact store
    pub store_root: PathBuf,

    /// Database used when a table reference omits one
    pub default_database: String,

    /// Entity-key alignment policy used by scoring
    pub identity_alignment: IdentityAlignment,

    /// Default tracing filter when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            warehouse_root: PathBuf::from("./warehouse"),
            store_root: PathBuf::from("./artifacts"),
            default_database: "modelops".to_string(),
            identity_alignment: IdentityAlignment::Positional,
            log_filter: "modelops=info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from an optional JSON file, then apply `MODELOPS_*` overrides
    /// from the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Read a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply overrides from a key lookup. Kept separate from [`load`](Self::load)
    /// so the layering can be exercised without touching the real environment.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MODELOPS_WAREHOUSE_ROOT") {
            self.warehouse_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("MODELOPS_STORE_ROOT") {
            self.store_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("MODELOPS_DEFAULT_DATABASE") {
            self.default_database = v;
        }
        if let Some(v) = lookup("MODELOPS_IDENTITY_ALIGNMENT") {
            self.identity_alignment = v.parse()?;
        }
        if let Some(v) = lookup("MODELOPS_LOG") {
            self.log_filter = v;
        }
        Ok(self)
    }

    /// Builder method to set the warehouse root
    pub fn with_warehouse_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.warehouse_root = root.into();
        self
    }

    /// Builder method to set the artifact store root
    pub fn with_store_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store_root = root.into();
        self
    }

    /// Builder method to set the identity alignment policy
    pub fn with_identity_alignment(mut self, alignment: IdentityAlignment) -> Self {
        self.identity_alignment = alignment;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.identity_alignment, IdentityAlignment::Positional);
        assert_eq!(config.default_database, "modelops");
    }

    #[test]
    fn test_overrides_are_layered() {
        let env: HashMap<&str, &str> = [
            ("MODELOPS_STORE_ROOT", "/srv/store"),
            ("MODELOPS_IDENTITY_ALIGNMENT", "keyed"),
        ]
        .into_iter()
        .collect();

        let config = RuntimeConfig::default()
            .with_warehouse_root("/srv/wh")
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.warehouse_root, PathBuf::from("/srv/wh"));
        assert_eq!(config.store_root, PathBuf::from("/srv/store"));
        assert_eq!(config.identity_alignment, IdentityAlignment::Keyed);
    }

    #[test]
    fn test_bad_alignment_is_rejected() {
        let result = RuntimeConfig::default()
            .with_overrides(|k| (k == "MODELOPS_IDENTITY_ALIGNMENT").then(|| "joined".to_string()));
        assert!(matches!(result, Err(LifecycleError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"identity_alignment": "keyed"}"#).unwrap();
        assert_eq!(config.identity_alignment, IdentityAlignment::Keyed);
        assert_eq!(config.log_filter, "modelops=info");
    }
}
