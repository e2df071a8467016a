//! persist-core: Persistence orchestration for a single outline document.
//!
//! This crate provides:
//! - The `Persistence` orchestrator (bootstrap cascade, busy/dirty state machine,
//!   direct-file and app-storage saves, draft backups)
//! - Collaborator traits for every host-provided backend (direct file handles,
//!   sandboxed storage, draft cache, background save channel, timers, UI prompts)
//! - The background save channel wire protocol and completion correlation
//! - A reference Bike-flavoured outline codec
//! - In-memory collaborators for tests
//!
//! Uses `target_arch = "wasm32"` for conditional compilation of `Send` bounds,
//! the same way for every collaborator trait.

pub mod backend;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod filename;
pub mod memory;
pub mod outline;
pub mod permission;
pub mod persistence;
pub mod source;

pub use backend::{
    AccessMode, DirectHandle, DraftStore, ExportFile, Exporter, FilePicker, MaybeSendSync,
    PermissionState, Platform, SandboxFile, SandboxStorage, SaveChannel, TimerService,
    TimerToken, UiHost, WritableFile,
};
pub use channel::{RequestId, SaveAction, SaveRequest, SaveResponse};
pub use codec::{OutlineCodec, ParseError};
pub use config::{PersistConfig, PlatformFamily};
pub use error::{ChannelError, PersistError, ProbeError, StorageError};
pub use events::{EventBus, PersistEvent, SharedBus, Subscription};
pub use filename::{display_name_for, normalize_file_name};
pub use outline::{BikeCodec, Outline, OutlineItem};
pub use permission::AccessCheck;
pub use persistence::{
    BootstrapPhase, Capabilities, Collaborators, EXPORT_MIME_TYPE, Feature, FileStatus, Operation,
    Outcome, Persistence, SaveTarget, SavingIndicator,
};
pub use source::{DocumentSource, EmptyContentPolicy, SourcePolicy};
