//! Timer service backed by tokio sleeps.

use persist_core::{TimerService, TimerToken};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::host::HostMessage;

/// Delivers each scheduled token to the host loop once its delay elapses.
///
/// Tokens are never cancelled; the orchestrator ignores ones that are stale
/// when they fire.
pub struct TokioTimers {
    runtime: Handle,
    fired: mpsc::UnboundedSender<HostMessage>,
}

impl TokioTimers {
    pub fn new(runtime: Handle, fired: mpsc::UnboundedSender<HostMessage>) -> Self {
        Self { runtime, fired }
    }
}

impl TimerService for TokioTimers {
    fn schedule(&self, token: TimerToken, after: Duration) {
        trace!("Scheduling {:?} in {:?}", token, after);
        let fired = self.fired.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            if fired.send(HostMessage::Timer(token)).is_err() {
                debug!("Host loop gone, timer {:?} dropped", token);
            }
        });
    }
}
