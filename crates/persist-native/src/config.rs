//! Native host configuration.
//!
//! Stored as camelCase JSON. Every field is optional; missing fields fall back
//! to directories under the platform data dir (see `dirs::data_dir`).

use anyhow::{Context, Result};
use persist_core::PersistConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "outline-persist";

/// Matches the usual browser localStorage budget.
pub const DEFAULT_DRAFT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NativeConfig {
    /// Directory holding the app-storage file.
    pub app_storage_dir: PathBuf,
    /// JSON file holding draft records.
    pub draft_path: PathBuf,
    /// Upper bound on the encoded draft file.
    pub draft_quota_bytes: usize,
    /// Where exported copies are written.
    pub export_dir: PathBuf,
    /// Answer to every confirmation prompt.
    pub auto_confirm: bool,
    /// Run the background save worker. Without it app-storage saves are unavailable.
    pub worker: bool,
    /// Orchestrator settings.
    pub persist: PersistConfig,
}

impl Default for NativeConfig {
    fn default() -> Self {
        let base = default_base_dir();
        Self {
            app_storage_dir: base.join("storage"),
            draft_path: base.join("drafts.json"),
            draft_quota_bytes: DEFAULT_DRAFT_QUOTA_BYTES,
            export_dir: dirs::download_dir().unwrap_or_else(|| base.join("exports")),
            auto_confirm: false,
            worker: true,
            persist: PersistConfig::default(),
        }
    }
}

impl NativeConfig {
    /// Configuration rooted at `base`, for tests and portable installs.
    pub fn in_dir(base: &Path) -> Self {
        Self {
            app_storage_dir: base.join("storage"),
            draft_path: base.join("drafts.json"),
            export_dir: base.join("exports"),
            ..Self::default()
        }
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: NativeConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.expand_paths();
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.draft_quota_bytes == 0 {
            return Err(ConfigError::ZeroQuota);
        }
        if self.persist.draft_key.trim().is_empty() {
            return Err(ConfigError::EmptyDraftKey);
        }
        let name = &self.persist.sandbox_file_name;
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(ConfigError::InvalidSandboxFileName(name.clone()));
        }
        Ok(())
    }

    fn expand_paths(&mut self) {
        for path in [
            &mut self.app_storage_dir,
            &mut self.draft_path,
            &mut self.export_dir,
        ] {
            *path = expand_tilde(path);
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    if text == "~" {
        dirs::home_dir().unwrap_or_else(|| path.to_path_buf())
    } else if let Some(rest) = text.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf())
    } else {
        path.to_path_buf()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("draftQuotaBytes must be greater than zero")]
    ZeroQuota,

    #[error("persist.draftKey must not be empty")]
    EmptyDraftKey,

    #[error("persist.sandboxFileName is not a plain file name: {0:?}")]
    InvalidSandboxFileName(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"draftQuotaBytes": 2048, "persist": {"autosaveDelayMs": 10}}"#,
        )
        .unwrap();

        let config = NativeConfig::load(&path).unwrap();
        assert_eq!(config.draft_quota_bytes, 2048);
        assert_eq!(config.persist.autosave_delay_ms, 10);
        assert_eq!(config.persist.safety_timeout_ms, 5000);
        assert!(config.worker);
        assert!(!config.auto_confirm);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"persist": {"sandboxFileName": "../x.bike"}}"#).unwrap();

        let err = NativeConfig::load(&path).unwrap_err();
        assert!(matches!(
            err.root_cause().downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidSandboxFileName(_))
        ));
    }

    #[test]
    fn test_malformed_json_mentions_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let err = NativeConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.json");
        let config = NativeConfig {
            auto_confirm: true,
            ..NativeConfig::in_dir(dir.path())
        };

        config.save(&path).unwrap();
        assert_eq!(NativeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = NativeConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, NativeConfig::default());
    }

    #[test]
    fn test_tilde_expansion() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_tilde(Path::new("~/outlines")), home.join("outlines"));
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
