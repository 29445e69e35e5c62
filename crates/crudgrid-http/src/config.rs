use std::path::Path;

use crudgrid_crud::Action;
use crudgrid_query::ParseErrorPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "CRUDGRID_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid port '{0}'")]
    Port(String),
}

/// Roles holding `role` may perform `actions` on `collection` (`*` for all).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub role: String,
    #[serde(default = "any_collection")]
    pub collection: String,
    pub actions: Vec<Action>,
}

fn any_collection() -> String {
    "*".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub on_parse_error: ParseErrorPolicy,
    pub grants: Vec<Grant>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            on_parse_error: ParseErrorPolicy::BestEffort,
            grants: vec![Grant {
                role: "admin".into(),
                collection: any_collection(),
                actions: vec![
                    Action::List,
                    Action::Add,
                    Action::Edit,
                    Action::View,
                    Action::Delete,
                    Action::Stats,
                ],
            }],
        }
    }
}

impl ServerConfig {
    /// Read the file named by `CRUDGRID_CONFIG` (defaults when unset), then
    /// apply `CRUDGRID_BIND` and `PORT`.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(bind) = lookup("CRUDGRID_BIND") {
            self.bind = bind;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port.trim().parse().map_err(|_| ConfigError::Port(port))?;
        }
        Ok(self)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
