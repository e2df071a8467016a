//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host platform family, used where file naming conventions differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlatformFamily {
    #[default]
    Desktop,
    /// iPhone/iPad hosts open `.xhtml` files more readily than `.bike`.
    AppleMobile,
}

impl PlatformFamily {
    /// Detect the platform family from a browser user agent string.
    pub fn from_user_agent(user_agent: &str) -> Self {
        if ["iPad", "iPhone", "iPod"]
            .iter()
            .any(|device| user_agent.contains(device))
        {
            PlatformFamily::AppleMobile
        } else {
            PlatformFamily::Desktop
        }
    }
}

/// Configuration for [`crate::Persistence`].
///
/// Every field has a default, so hosts may pass a partial object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistConfig {
    /// Key of the single draft record.
    pub draft_key: String,

    /// File name of the single app-storage file.
    pub sandbox_file_name: String,

    /// Debounce delay between the last edit and the draft backup.
    pub autosave_delay_ms: u64,

    /// How long a background save may hold the busy flag without a completion.
    pub safety_timeout_ms: u64,

    /// Extension appended by file name normalization.
    pub default_extension: String,

    pub platform: PlatformFamily,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            draft_key: "bikeEditorProDraft".to_string(),
            sandbox_file_name: "_current_outline.bike".to_string(),
            autosave_delay_ms: 1500,
            safety_timeout_ms: 5000,
            default_extension: ".bike".to_string(),
            platform: PlatformFamily::Desktop,
        }
    }
}

impl PersistConfig {
    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    pub fn safety_timeout(&self) -> Duration {
        Duration::from_millis(self.safety_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: PersistConfig = serde_json::from_str(r#"{"safetyTimeoutMs": 250}"#).unwrap();
        assert_eq!(config.safety_timeout(), Duration::from_millis(250));
        assert_eq!(config.autosave_delay(), Duration::from_millis(1500));
        assert_eq!(config.sandbox_file_name, "_current_outline.bike");
        assert_eq!(config.platform, PlatformFamily::Desktop);
    }

    #[test]
    fn test_platform_from_user_agent() {
        let ios = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)";
        let mac = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0)";
        assert_eq!(PlatformFamily::from_user_agent(ios), PlatformFamily::AppleMobile);
        assert_eq!(PlatformFamily::from_user_agent(mac), PlatformFamily::Desktop);
    }
}
