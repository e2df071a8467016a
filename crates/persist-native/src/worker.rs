//! Background save worker.
//!
//! Runs as a tokio task that owns the app-storage directory. Requests arrive
//! through an unbounded channel and every request is answered with exactly one
//! `SaveResponse` on the host message channel, echoing its request id.

use persist_core::{ChannelError, SaveAction, SaveChannel, SaveRequest, SaveResponse};
use std::path::PathBuf;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::host::HostMessage;
use crate::native_fs::write_atomic;

/// Sending half handed to the orchestrator.
pub struct WorkerChannel {
    requests: mpsc::UnboundedSender<SaveRequest>,
}

impl SaveChannel for WorkerChannel {
    fn post(&self, request: SaveRequest) -> Result<(), ChannelError> {
        self.requests
            .send(request)
            .map_err(|_| ChannelError::Closed)
    }
}

pub struct SaveWorker {
    root: PathBuf,
    requests: mpsc::UnboundedReceiver<SaveRequest>,
    responses: mpsc::UnboundedSender<HostMessage>,
}

impl SaveWorker {
    /// Spawn a worker writing into `root` on `runtime`.
    pub fn spawn(
        runtime: &Handle,
        root: PathBuf,
        responses: mpsc::UnboundedSender<HostMessage>,
    ) -> WorkerChannel {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = SaveWorker {
            root,
            requests: rx,
            responses,
        };
        runtime.spawn(worker.run());
        WorkerChannel { requests: tx }
    }

    async fn run(mut self) {
        info!("Save worker started ({})", self.root.display());
        while let Some(request) = self.requests.recv().await {
            let response = self.process(&request).await;
            if self.responses.send(HostMessage::Save(response)).is_err() {
                debug!("Host loop gone, dropping save response");
                break;
            }
        }
        info!("Save worker stopped");
    }

    async fn process(&self, request: &SaveRequest) -> SaveResponse {
        match request.action {
            SaveAction::SaveOpfs => {
                debug!(
                    "Saving {} ({} bytes) for request {}",
                    request.file_name,
                    request.content.len(),
                    request.request_id
                );
                if request.file_name.is_empty() || request.file_name.contains(['/', '\\']) {
                    return request.failed(format!("Invalid file name: {}", request.file_name));
                }
                let path = self.root.join(&request.file_name);
                match write_atomic(&path, &request.content).await {
                    Ok(()) => request.succeeded(),
                    Err(e) => {
                        error!("Worker failed to write {}: {}", path.display(), e);
                        request.failed(e.to_string())
                    }
                }
            }
        }
    }
}
