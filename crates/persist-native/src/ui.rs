//! Headless UI host: prompts are answered from configuration and logged.

use async_trait::async_trait;
use persist_core::UiHost;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Answers every confirmation with a fixed choice.
///
/// Alerts are logged at `warn` and kept so callers can surface them later.
pub struct HeadlessUi {
    auto_confirm: bool,
    alerts: Mutex<Vec<String>>,
}

impl HeadlessUi {
    pub fn new(auto_confirm: bool) -> Self {
        Self {
            auto_confirm,
            alerts: Mutex::new(Vec::new()),
        }
    }

    /// Alerts raised since the last call.
    pub fn take_alerts(&self) -> Vec<String> {
        std::mem::take(&mut *self.alerts.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl UiHost for HeadlessUi {
    async fn confirm(&self, message: &str) -> bool {
        info!(
            "Prompt: {} -> {}",
            message,
            if self.auto_confirm { "yes" } else { "no" }
        );
        self.auto_confirm
    }

    fn alert(&self, message: &str) {
        warn!("Alert: {}", message);
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
    }

    fn focus_first_item(&self) {
        debug!("Focus request ignored (headless)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_confirm_uses_configured_answer() {
        assert!(HeadlessUi::new(true).confirm("Proceed?").await);
        assert!(!HeadlessUi::new(false).confirm("Proceed?").await);
    }

    #[test]
    fn test_alerts_are_drained() {
        let ui = HeadlessUi::new(false);
        ui.alert("one");
        ui.alert("two");
        assert_eq!(ui.take_alerts(), vec!["one".to_string(), "two".to_string()]);
        assert!(ui.take_alerts().is_empty());
    }
}
