//! persist-native: tokio host adapter for `persist-core`.
//!
//! Direct files are plain paths on disk, app storage is a directory written by
//! a background worker task, drafts live in a JSON file with a byte quota, and
//! timers are tokio sleeps. `NativeHost` wires these together and pumps worker
//! completions and timer firings into the orchestrator.

pub mod config;
pub mod host;
pub mod logging;
pub mod native_fs;
pub mod platform;
pub mod timers;
pub mod ui;
pub mod worker;

// Re-export key types for convenience
pub use config::{ConfigError, NativeConfig};
pub use host::{HostMessage, NativeHost};
pub use logging::init_tracing;
pub use native_fs::{DirectoryExporter, NativeDirectHandle, NativeDraftStore, NativeSandbox};
pub use platform::{NativePlatform, QueuedPicker};
pub use timers::TokioTimers;
pub use ui::HeadlessUi;
pub use worker::{SaveWorker, WorkerChannel};
