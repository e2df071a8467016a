//! Collaborator traits for host-provided backends.
//!
//! Implementations:
//! - `memory::*` - For testing
//! - `persist-native` - tokio::fs backed files, a worker task, tokio timers
//! - `persist-wasm` - File System Access / OPFS / localStorage via a JS bridge
//!
//! On native platforms, implementations must be `Send + Sync` for use across threads.
//! On WASM (wasm32), these bounds are relaxed since WASM is single-threaded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{RequestId, SaveRequest};
use crate::error::{ChannelError, ProbeError, StorageError};

/// `Send + Sync` on native targets, no bound on wasm32.
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeSendSync: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync + ?Sized> MaybeSendSync for T {}

/// `Send + Sync` on native targets, no bound on wasm32.
#[cfg(target_arch = "wasm32")]
pub trait MaybeSendSync {}
#[cfg(target_arch = "wasm32")]
impl<T: ?Sized> MaybeSendSync for T {}

/// Access level requested from a direct file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    ReadWrite,
}

impl AccessMode {
    /// Mode string used by the File System Access API.
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::ReadWrite => "readwrite",
        }
    }
}

/// Permission state reported by a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
}

/// Scoped writable target opened on a direct file.
///
/// Callers must finish with exactly one of `close` (commit) or `abort`.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait WritableFile: MaybeSendSync {
    async fn write(&mut self, content: &str) -> Result<(), StorageError>;

    /// Commit the written content and release the target.
    async fn close(self: Box<Self>) -> Result<(), StorageError>;

    /// Discard the written content and release the target.
    async fn abort(self: Box<Self>) -> Result<(), StorageError>;
}

/// A user-granted file that can be read and written in place.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait DirectHandle: MaybeSendSync {
    fn name(&self) -> String;

    async fn read_text(&self) -> Result<String, StorageError>;

    async fn create_writable(&self) -> Result<Box<dyn WritableFile>, StorageError>;

    /// Whether `query_permission`/`request_permission` are meaningful.
    fn supports_permissions(&self) -> bool {
        false
    }

    async fn query_permission(&self, _mode: AccessMode) -> Result<PermissionState, StorageError> {
        Ok(PermissionState::Granted)
    }

    async fn request_permission(&self, _mode: AccessMode) -> Result<PermissionState, StorageError> {
        Ok(PermissionState::Granted)
    }
}

/// The single app-storage file.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait SandboxFile: MaybeSendSync {
    fn name(&self) -> String;

    async fn read_text(&self) -> Result<String, StorageError>;
}

/// App-private storage root.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait SandboxStorage: MaybeSendSync {
    /// Look up an existing file without creating it.
    async fn lookup(&self, name: &str) -> Result<Option<Arc<dyn SandboxFile>>, StorageError>;

    /// Get the file, creating it if absent.
    async fn create(&self, name: &str) -> Result<Arc<dyn SandboxFile>, StorageError>;
}

/// Single-record key/value store for draft backups.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait DraftStore: MaybeSendSync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Conduit to the background worker that writes app storage.
///
/// Posting is fire-and-forget; completions come back through
/// `Persistence::handle_channel_message`.
pub trait SaveChannel: MaybeSendSync {
    fn post(&self, request: SaveRequest) -> Result<(), ChannelError>;
}

/// Host file-open dialog.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait FilePicker: MaybeSendSync {
    /// Returns `None` when the user dismissed the dialog.
    async fn pick_file(&self) -> Result<Option<Arc<dyn DirectHandle>>, StorageError>;
}

/// A file handed to the export path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub name: String,
    pub mime_type: String,
    pub content: String,
}

/// Manual export ("download") path.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Exporter: MaybeSendSync {
    async fn export(&self, file: ExportFile) -> Result<(), StorageError>;
}

/// Prompts and imperative UI calls. Rendering happens through `EventBus`.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait UiHost: MaybeSendSync {
    /// Ask the user a yes/no question.
    async fn confirm(&self, message: &str) -> bool;

    fn alert(&self, message: &str);

    fn focus_first_item(&self);
}

/// Identifies a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum TimerToken {
    /// Force-release the busy flag if this background save has not completed.
    SafetyRelease(RequestId),
    /// Debounced draft backup for the given edit generation.
    DraftAutosave(u64),
}

/// Schedules tokens; the host calls `Persistence::on_timer` when one fires.
pub trait TimerService: MaybeSendSync {
    fn schedule(&self, token: TimerToken, after: Duration);
}

/// Capability probing for optional features.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Platform: MaybeSendSync {
    /// Start the background save worker, if the host has one.
    fn open_save_channel(&self) -> Result<Option<Arc<dyn SaveChannel>>, ProbeError>;

    /// File picker for direct file access, if supported.
    fn file_picker(&self) -> Option<Arc<dyn FilePicker>>;

    /// Root of app-private storage, if supported.
    async fn sandbox_root(&self) -> Result<Option<Arc<dyn SandboxStorage>>, ProbeError>;
}
