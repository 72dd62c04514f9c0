//! Lazy loading configuration.
//!
//! [`LazyConfig::load`] reads `config/lazy.toml` (optional, `[lazy]` table) and
//! `LIFEGUARD_LAZY__*` environment variables, e.g. `LIFEGUARD_LAZY__ENABLED=false`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const CONFIG_FILE: &str = "config/lazy.toml";

/// Output name of the owner key on join table preload rows
pub const DEFAULT_OWNER_KEY_ALIAS: &str = "parent_record_id";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LazyConfig {
    /// When false every lazy decorator passes straight through
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Alias of the owner key column appended to join-table preloads
    #[serde(default = "default_owner_key_alias")]
    pub owner_key_alias: String,
}

fn default_enabled() -> bool {
    true
}

fn default_owner_key_alias() -> String {
    DEFAULT_OWNER_KEY_ALIAS.to_string()
}

impl Default for LazyConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            owner_key_alias: default_owner_key_alias(),
        }
    }
}

impl LazyConfig {
    /// Configuration with lazy loading switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Load from `config/lazy.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix("LIFEGUARD")
                .prefix_separator("_")
                .separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if std::path::Path::new(CONFIG_FILE).exists() {
                    log::warn!("failed to load {CONFIG_FILE}, falling back to env: {err}");
                }
                Config::builder()
                    .add_source(
                        Environment::with_prefix("LIFEGUARD")
                            .prefix_separator("_")
                            .separator("__"),
                    )
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        Self::from_settings(&settings)
    }

    /// Extract the `lazy` table, using defaults when it is absent
    pub fn from_settings(settings: &Config) -> Result<Self, ConfigError> {
        match settings.get::<LazyConfig>("lazy") {
            Ok(cfg) => Ok(cfg),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(ConfigError::Message(format!(
                "Lazy loading configuration could not be loaded from file or environment: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_defaults() {
        let cfg = LazyConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.owner_key_alias, "parent_record_id");
        assert!(!LazyConfig::disabled().enabled);
    }

    #[test]
    fn test_from_settings_reads_lazy_table() {
        let settings = Config::builder()
            .add_source(File::from_str(
                "[lazy]\nenabled = false\nowner_key_alias = \"owner_id\"\n",
                FileFormat::Toml,
            ))
            .build()
            .expect("inline toml parses");
        let cfg = LazyConfig::from_settings(&settings).expect("lazy table deserializes");
        assert!(!cfg.enabled);
        assert_eq!(cfg.owner_key_alias, "owner_id");
    }

    #[test]
    fn test_partial_table_fills_defaults() {
        let settings = Config::builder()
            .add_source(File::from_str("[lazy]\nenabled = true\n", FileFormat::Toml))
            .build()
            .expect("inline toml parses");
        let cfg = LazyConfig::from_settings(&settings).expect("lazy table deserializes");
        assert_eq!(cfg.owner_key_alias, "parent_record_id", "Missing keys should use defaults");
    }

    #[test]
    fn test_missing_table_uses_defaults() {
        let settings = Config::builder().build().expect("empty config builds");
        assert_eq!(
            LazyConfig::from_settings(&settings).expect("defaults"),
            LazyConfig::default()
        );
    }
}
