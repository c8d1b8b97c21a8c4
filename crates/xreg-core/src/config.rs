use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Value of the registry `specversion` attribute for new registries.
    pub spec_version: String,
    /// Record every open transaction in a [`TxTracker`](crate::TxTracker).
    pub track_transactions: bool,
    /// Fail when a thread opens a second transaction while one is live.
    /// Requires `track_transactions`.
    pub forbid_nested_transactions: bool,
    /// Age after which an open transaction is reported as stuck.
    pub stuck_transaction_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spec_version: "1.0".into(),
            track_transactions: true,
            forbid_nested_transactions: cfg!(debug_assertions),
            stuck_transaction_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> RegistryResult<Self> {
        toml::from_str(text).map_err(|e| RegistryError::Config(e.to_string()))
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_transaction_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let c = EngineConfig::default();
        assert_eq!(c.spec_version, "1.0");
        assert!(c.track_transactions);
        assert_eq!(c.forbid_nested_transactions, cfg!(debug_assertions));
        assert_eq!(c.stuck_after(), Duration::from_secs(30));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = EngineConfig::from_toml_str("spec_version = \"1.0-rc2\"\n").unwrap();
        assert_eq!(c.spec_version, "1.0-rc2");
        assert!(c.track_transactions);
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = EngineConfig::from_toml_str("bogus = 1\n").unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "track_transactions = false").unwrap();
        writeln!(file, "stuck_transaction_secs = 5").unwrap();
        let c = EngineConfig::from_file(file.path()).unwrap();
        assert!(!c.track_transactions);
        assert_eq!(c.stuck_transaction_secs, 5);
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::from_file(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, RegistryError::Config(_)));
    }
}
