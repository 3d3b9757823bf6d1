//! Session configuration
//!
//! ```toml
//! client_name = "alice"
//! room = "studio"
//! host = "localhost"
//! port = 12800
//! tick_interval_ms = 10
//! collections = ["objects", "cameras", "lights"]
//!
//! [filter]
//! exclude = ["Object.matrix_world", "select"]
//! ```
//!
//! Every field is optional and falls back to `SyncConfig::default()`.

use mixer_proxy::{FilterSet, FilterStack, ProxyModel};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 12800;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Attribute exclusions appended to the safe filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Entries of the form `"attr"` or `"Type.attr"`
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub client_name: String,
    pub room: String,
    pub host: String,
    pub port: u16,
    /// Period of the synchronization tick
    pub tick_interval_ms: u64,
    /// How long an open command group may wait for its remaining commands
    pub group_timeout_ms: u64,
    /// How long a blocking room download waits for the server
    pub join_timeout_ms: u64,
    /// Root collections to synchronize, all of them when empty
    pub collections: Vec<String>,
    pub filter: FilterConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_name: "mixer".to_string(),
            room: "default".to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tick_interval_ms: 10,
            group_timeout_ms: 1000,
            join_timeout_ms: 30_000,
            collections: Vec::new(),
            filter: FilterConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string(self)?)
    }

    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = room.into();
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.room.trim().is_empty() {
            return Err(ConfigError::Invalid("room name is empty".to_string()));
        }
        if self.client_name.trim().is_empty() {
            return Err(ConfigError::Invalid("client name is empty".to_string()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick interval must be positive".to_string()));
        }
        if let Some(entry) = self.filter.exclude.iter().find(|e| e.is_empty() || e.ends_with('.')) {
            return Err(ConfigError::Invalid(format!("bad filter exclusion '{}'", entry)));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn group_timeout(&self) -> Duration {
        Duration::from_millis(self.group_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Safe filter narrowed by the configured exclusions
    pub fn filter_stack(&self) -> FilterStack {
        let stack = FilterStack::safe();
        if self.filter.exclude.is_empty() {
            return stack;
        }
        stack.with_set(FilterSet::from_exclusions(&self.filter.exclude))
    }

    /// An empty proxy model set up from this configuration
    pub fn proxy_model(&self) -> ProxyModel {
        ProxyModel::new(self.filter_stack()).with_collections(self.collections.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixer_core::AttrKind;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(SyncConfig::from_toml_str("").unwrap(), SyncConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = SyncConfig::from_toml_str(
            r#"
            client_name = "alice"
            room = "studio"
            port = 9000
            group_timeout_ms = 250
            collections = ["objects", "cameras"]

            [filter]
            exclude = ["Object.matrix_world", "select"]
            "#,
        )
        .unwrap();

        assert_eq!(config.client_name, "alice");
        assert_eq!(config.room, "studio");
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, 9000);
        assert_eq!(config.group_timeout(), Duration::from_millis(250));
        assert_eq!(config.collections, vec!["objects", "cameras"]);
        assert_eq!(config.filter.exclude.len(), 2);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(SyncConfig::from_toml_str("room = ''"), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            SyncConfig::from_toml_str("tick_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_toml_str("[filter]\nexclude = ['Object.']"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(SyncConfig::from_toml_str("port = 'x'"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_filter_stack_applies_exclusions() {
        let config = SyncConfig::default().with_room("r");
        assert_eq!(config.filter_stack(), FilterStack::safe());

        let mut config = config;
        config.filter.exclude = vec!["Object.location".to_string()];
        let stack = config.filter_stack();
        let none: Vec<String> = Vec::new();
        assert!(!stack.accepts("Object", &none, "location", AttrKind::Value));
        assert!(stack.accepts("Camera", &none, "location", AttrKind::Value));
        assert!(!stack.accepts("Camera", &none, "rna_type", AttrKind::Value));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SyncConfig::default()
            .with_client_name("bob")
            .with_collections(["lights"]);
        let text = config.to_toml_string().unwrap();
        assert_eq!(SyncConfig::from_toml_str(&text).unwrap(), config);
    }
}
