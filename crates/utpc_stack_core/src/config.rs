use std::collections::BTreeMap;
use std::ffi::OsString;

use serde::{Deserialize, Serialize};

/// Key-value source consulted at plan time.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Explicit in-memory configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapConfig {
    values: BTreeMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl ConfigSource for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Snapshot of the process environment taken at construction.
///
/// Later changes to the environment are not observed, so a plan resolves
/// against one consistent view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    values: MapConfig,
}

impl EnvConfig {
    pub fn snapshot() -> Self {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Variables whose name or value is not valid UTF-8 are skipped.
    pub fn from_os_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        Self {
            values: vars
                .into_iter()
                .filter_map(|(key, value)| {
                    Some((key.into_string().ok()?, value.into_string().ok()?))
                })
                .collect(),
        }
    }
}

impl ConfigSource for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key)
    }
}

/// Ordered stack of sources; the first source holding a non-blank value for a
/// key wins.
#[derive(Default)]
pub struct LayeredConfig {
    layers: Vec<Box<dyn ConfigSource + Send + Sync>>,
}

impl LayeredConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, source: impl ConfigSource + Send + Sync + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ConfigSource for LayeredConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.layers
            .iter()
            .find_map(|layer| layer.get(key).filter(|value| !value.trim().is_empty()))
    }
}

/// What happens when a bound key is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigPolicy {
    #[default]
    Required,
    Default(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBinding {
    pub key: String,
    #[serde(default)]
    pub policy: ConfigPolicy,
}

impl ConfigBinding {
    pub fn required(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            policy: ConfigPolicy::Required,
        }
    }

    pub fn with_default(key: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            policy: ConfigPolicy::Default(default.into()),
        }
    }

    /// Configured value, else the declared default. Blank values count as
    /// unset. `None` means the key is required and missing.
    pub fn resolve(&self, source: &dyn ConfigSource) -> Option<String> {
        match source.get(&self.key) {
            Some(value) if !value.trim().is_empty() => Some(value),
            _ => match &self.policy {
                ConfigPolicy::Default(value) => Some(value.clone()),
                ConfigPolicy::Required => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_prefers_configured_value() {
        let config = MapConfig::new().with("ENV_PORT_MYSQL", "3307");
        let binding = ConfigBinding::with_default("ENV_PORT_MYSQL", "3306");
        assert_eq!(binding.resolve(&config).as_deref(), Some("3307"));
    }

    #[test]
    fn binding_falls_back_to_default_for_missing_or_blank_values() {
        let binding = ConfigBinding::with_default("ENV_PORT_MYSQL", "3306");
        assert_eq!(binding.resolve(&MapConfig::new()).as_deref(), Some("3306"));

        let blank = MapConfig::new().with("ENV_PORT_MYSQL", "  ");
        assert_eq!(binding.resolve(&blank).as_deref(), Some("3306"));
    }

    #[test]
    fn required_binding_without_value_is_unresolved() {
        let binding = ConfigBinding::required("ENV_HOST_MYSQL");
        assert_eq!(binding.resolve(&MapConfig::new()), None);
    }

    #[test]
    fn layered_config_uses_first_layer_holding_key() {
        let config = LayeredConfig::new()
            .with_layer(MapConfig::new().with("ENV_HOST_MYSQL", "primary"))
            .with_layer(
                MapConfig::new()
                    .with("ENV_HOST_MYSQL", "fallback")
                    .with("ENV_USER_MYSQL", "admin"),
            );

        assert_eq!(config.get("ENV_HOST_MYSQL").as_deref(), Some("primary"));
        assert_eq!(config.get("ENV_USER_MYSQL").as_deref(), Some("admin"));
        assert_eq!(config.get("ENV_PASSWORD_MYSQL"), None);
    }

    #[test]
    fn blank_value_in_upper_layer_falls_through() {
        let config = LayeredConfig::new()
            .with_layer(MapConfig::new().with("ENV_HOST_MYSQL", ""))
            .with_layer(MapConfig::new().with("ENV_HOST_MYSQL", "db.internal"));

        assert_eq!(config.get("ENV_HOST_MYSQL").as_deref(), Some("db.internal"));
        assert_eq!(
            ConfigBinding::required("ENV_HOST_MYSQL")
                .resolve(&config)
                .as_deref(),
            Some("db.internal")
        );
    }

    #[cfg(unix)]
    #[test]
    fn env_snapshot_skips_non_utf8_variables() {
        use std::os::unix::ffi::OsStringExt;

        let config = EnvConfig::from_os_vars(vec![
            (
                OsString::from("BROKEN_LOCALE"),
                OsString::from_vec(vec![0x66, 0xff, 0x6f]),
            ),
            (OsString::from("ENV_USER_MYSQL"), OsString::from("admin")),
        ]);

        assert_eq!(config.get("BROKEN_LOCALE"), None);
        assert_eq!(config.get("ENV_USER_MYSQL").as_deref(), Some("admin"));
    }

    #[test]
    fn policy_deserializes_from_compact_json() {
        let required: ConfigPolicy = serde_json::from_str("\"required\"").expect("should parse");
        assert_eq!(required, ConfigPolicy::Required);

        let defaulted: ConfigPolicy =
            serde_json::from_str("{\"default\":\"3306\"}").expect("should parse");
        assert_eq!(defaulted, ConfigPolicy::Default("3306".to_string()));
    }
}
