//! Daemon configuration: a small TOML file plus environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::llm::LlmConfig;

/// Top-level configuration. Every field has a default, so an absent or
/// partial config file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub llm: LlmConfig,
    /// Conversation turn database (owned by the daemon).
    pub conversation_db: PathBuf,
    /// Registry records database (owned by the CRUD side; read-only here).
    pub records_db: PathBuf,
    pub listen_addr: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            conversation_db: PathBuf::from("/var/lib/clare/conversations.db"),
            records_db: PathBuf::from("/var/lib/clare/registry.db"),
            listen_addr: "127.0.0.1:7870".to_string(),
        }
    }
}

impl AssistantConfig {
    /// Load from a TOML file when given, else defaults, then apply
    /// `CLARE_LLM_*` environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.llm = config.llm.with_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_a_file() {
        let config = AssistantConfig::load(None).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:7870");
        assert!(config.llm.enabled);
    }

    #[test]
    fn partial_file_keeps_defaults_for_the_rest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "listen_addr = \"0.0.0.0:9000\"\n\n[llm]\nmodel = \"llama3.1:8b\""
        )
        .unwrap();

        let config = AssistantConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.llm.model, "llama3.1:8b");
        // Untouched fields fall back to defaults.
        assert_eq!(config.llm.endpoint, "http://localhost:11434");
        assert_eq!(
            config.conversation_db,
            PathBuf::from("/var/lib/clare/conversations.db")
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(AssistantConfig::load(Some(Path::new("/nonexistent/clare.toml"))).is_err());
    }
}
