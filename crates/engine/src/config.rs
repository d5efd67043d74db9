//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! [script]
//! timeout_ms = 5000
//! hook_interval = 1000
//! ```
//!
//! Every key is optional; missing keys take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use dagflow_nodes::ScriptConfig;

use crate::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub script: ScriptConfig,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").expect("valid");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.script.timeout_ms, 5_000);
    }

    #[test]
    fn partial_script_section() {
        let config = EngineConfig::from_toml_str("[script]\ntimeout_ms = 250\n").expect("valid");
        assert_eq!(config.script.timeout_ms, 250);
        assert_eq!(config.script.hook_interval, 1_000);
    }

    #[test]
    fn bad_types_are_rejected() {
        let err = EngineConfig::from_toml_str("[script]\ntimeout_ms = \"soon\"\n")
            .expect_err("string is not a number");
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(matches!(
            EngineConfig::load("/definitely/not/here.toml"),
            Err(EngineError::Config(_))
        ));
    }
}
