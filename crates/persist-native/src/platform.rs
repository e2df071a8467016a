//! Capability probing for the native host.

use async_trait::async_trait;
use persist_core::{
    DirectHandle, FilePicker, Platform, ProbeError, SandboxStorage, SaveChannel, StorageError,
};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

use crate::host::HostMessage;
use crate::native_fs::{NativeDirectHandle, NativeSandbox};
use crate::worker::SaveWorker;

/// Stands in for the open dialog: paths are queued by the embedding
/// application (command line, IPC) and handed out in order.
#[derive(Default)]
pub struct QueuedPicker {
    queue: Mutex<VecDeque<PathBuf>>,
}

impl QueuedPicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: impl Into<PathBuf>) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(path.into());
    }
}

#[async_trait]
impl FilePicker for QueuedPicker {
    async fn pick_file(&self) -> Result<Option<Arc<dyn DirectHandle>>, StorageError> {
        let next = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let Some(path) = next else {
            debug!("No file queued, treating as cancelled");
            return Ok(None);
        };
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        if !exists {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        let handle: Arc<dyn DirectHandle> = Arc::new(NativeDirectHandle::new(path));
        Ok(Some(handle))
    }
}

pub struct NativePlatform {
    pub(crate) storage_dir: PathBuf,
    pub(crate) worker: bool,
    pub(crate) runtime: Handle,
    pub(crate) messages: mpsc::UnboundedSender<HostMessage>,
    pub(crate) picker: Arc<QueuedPicker>,
}

#[async_trait]
impl Platform for NativePlatform {
    fn open_save_channel(&self) -> Result<Option<Arc<dyn SaveChannel>>, ProbeError> {
        if !self.worker {
            return Ok(None);
        }
        let channel = SaveWorker::spawn(
            &self.runtime,
            self.storage_dir.clone(),
            self.messages.clone(),
        );
        let channel: Arc<dyn SaveChannel> = Arc::new(channel);
        Ok(Some(channel))
    }

    fn file_picker(&self) -> Option<Arc<dyn FilePicker>> {
        let picker: Arc<dyn FilePicker> = self.picker.clone();
        Some(picker)
    }

    async fn sandbox_root(&self) -> Result<Option<Arc<dyn SandboxStorage>>, ProbeError> {
        let sandbox = NativeSandbox::open(&self.storage_dir)
            .await
            .map_err(|e| ProbeError::Failed(e.to_string()))?;
        let sandbox: Arc<dyn SandboxStorage> = Arc::new(sandbox);
        Ok(Some(sandbox))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_picker_hands_out_queued_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bike");
        std::fs::write(&path, "x").unwrap();

        let picker = QueuedPicker::new();
        picker.push(&path);
        picker.push(dir.path().join("missing.bike"));

        let handle = picker.pick_file().await.unwrap().unwrap();
        assert_eq!(handle.name(), "a.bike");
        assert!(matches!(
            picker.pick_file().await,
            Err(StorageError::NotFound(_))
        ));
        assert!(picker.pick_file().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_worker_reports_no_channel() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let platform = NativePlatform {
            storage_dir: dir.path().to_path_buf(),
            worker: false,
            runtime: Handle::current(),
            messages: tx,
            picker: Arc::new(QueuedPicker::new()),
        };
        assert!(platform.open_save_channel().unwrap().is_none());
        assert!(platform.sandbox_root().await.unwrap().is_some());
    }
}
