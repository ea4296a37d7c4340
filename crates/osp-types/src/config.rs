//! Agent configuration loaded from TOML, with defaults.

use crate::agent::PskConfig;
use crate::error::{TypesError, TypesResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default model name announced in agent-info.
pub const DEFAULT_MODEL_NAME: &str = "osp-rs";

/// Local agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Human-readable name shown to remote agents.
    pub display_name: String,
    /// Model name announced in agent-info.
    pub model_name: String,
    /// Preferred locales, most preferred first.
    pub locales: Vec<String>,
    /// PSK policy announced in auth-capabilities.
    pub psk: PskConfig,
    /// Certificate serial advertised in the `sn` record. Random when unset.
    pub certificate_serial: Option<u64>,
    /// Connection engine tuning.
    pub engine: EngineConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            locales: Vec::new(),
            psk: PskConfig::default(),
            certificate_serial: None,
            engine: EngineConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Parse a TOML document, rejecting invalid values.
    pub fn from_toml_str(contents: &str) -> TypesResult<Self> {
        let config: AgentConfig =
            toml::from_str(contents).map_err(|e| TypesError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TypesResult<()> {
        self.psk.validate()
    }
}

/// Deadlines and limits for the connection engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on waiting for authentication, in seconds.
    pub auth_timeout_secs: Option<u64>,
    /// Upper bound on waiting for the info exchange, in seconds.
    pub info_timeout_secs: Option<u64>,
    /// How long `close` waits for queued control messages to flush.
    pub close_drain_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: None,
            info_timeout_secs: None,
            close_drain_timeout_ms: 2000,
        }
    }
}

impl EngineConfig {
    pub fn auth_timeout(&self) -> Option<Duration> {
        self.auth_timeout_secs.map(Duration::from_secs)
    }

    pub fn info_timeout(&self) -> Option<Duration> {
        self.info_timeout_secs.map(Duration::from_secs)
    }

    pub fn close_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.close_drain_timeout_ms)
    }
}

/// Load agent configuration from a TOML file, falling back to defaults when
/// the file is missing, unreadable or invalid.
pub fn load_config(path: &Path) -> AgentConfig {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return AgentConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match AgentConfig::from_toml_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                return config;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to parse config, using defaults"
                );
            }
        },
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "Failed to read config file, using defaults"
            );
        }
    }

    AgentConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Path::new("/nonexistent/osp.toml"));
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.model_name, DEFAULT_MODEL_NAME);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osp.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            display_name = "Kitchen Display"
            locales = ["en-US", "de"]
            certificate_serial = 42

            [psk]
            ease_of_input = 50
            min_entropy_bits = 30

            [engine]
            auth_timeout_secs = 60
            "#
        )
        .unwrap();

        let config = load_config(&path);
        assert_eq!(config.display_name, "Kitchen Display");
        assert_eq!(config.model_name, DEFAULT_MODEL_NAME);
        assert_eq!(config.locales, vec!["en-US", "de"]);
        assert_eq!(config.psk.ease_of_input, 50);
        assert_eq!(config.psk.min_entropy_bits, 30);
        assert_eq!(config.certificate_serial, Some(42));
        assert_eq!(config.engine.auth_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.engine.info_timeout(), None);
        assert_eq!(config.engine.close_drain_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osp.toml");
        std::fs::write(&path, "[psk]\nmin_entropy_bits = 99\n").unwrap();
        assert_eq!(load_config(&path), AgentConfig::default());
    }

    #[test]
    fn test_from_toml_str_reports_errors() {
        let err = AgentConfig::from_toml_str("[psk]\nease_of_input = 101\n").unwrap_err();
        assert!(matches!(err, TypesError::OutOfRange { field: "psk.ease_of_input", .. }));
        assert!(matches!(
            AgentConfig::from_toml_str("display_name = 7"),
            Err(TypesError::Config(_))
        ));
    }
}
