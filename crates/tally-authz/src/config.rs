//! Role and user bindings loaded from the `permissions` section of the
//! dashboard configuration file.
//!
//! # Important configuration
//! - `TALLY_CONFIG`: path to the YAML configuration file. When unset, the
//!   bindings are empty and every authenticated user resolves to no roles.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable naming the YAML configuration file.
pub const CONFIG_PATH_ENV: &str = "TALLY_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub users: Vec<UserBinding>,
    #[serde(default)]
    pub roles: Vec<RoleDefinition>,
}

/// Maps a login email to role names. Role names need not be defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBinding {
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Named bundle of permission strings. Order and duplicates are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    permissions: PermissionsConfig,
}

impl PermissionsConfig {
    /// Parse the `permissions` section out of a full configuration document.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        // An empty document deserializes to `null`, which is not a mapping.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: ConfigFile =
            serde_yaml::from_str(contents).with_context(|| "parse permissions config yaml")?;
        Ok(file.permissions)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read permissions config: {}", path.display()))?;
        let config = Self::from_yaml_str(&contents)?;
        tracing::debug!(
            path = %path.display(),
            users = config.users.len(),
            roles = config.roles.len(),
            "loaded permissions config"
        );
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_path(path),
            Err(_) => {
                tracing::warn!("{CONFIG_PATH_ENV} not set; no users or roles are defined");
                Ok(Self::default())
            }
        }
    }
}
