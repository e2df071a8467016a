//! The persistence orchestrator.
//!
//! `Persistence` owns the document-source / dirty / busy state machine and is
//! the only component the UI calls for file lifecycle actions.
//!
//! ## Concurrency
//!
//! All operations take `&self`. State lives in one `std::sync::Mutex` that is
//! never held across an `.await`, so overlapping calls interleave only at
//! await points. The busy flag is the single gate: an operation that finds it
//! set is rejected with [`PersistError::Busy`], never queued.
//!
//! Bootstrap holds the busy flag for its whole duration; its internal steps run
//! as [`Caller::Bootstrap`] and skip the gate.
//!
//! ## Dirty tracking
//!
//! Every content mutation bumps an edit generation. A save remembers the
//! generation it serialized and clears the dirty flag only if no edit happened
//! while it was in flight.

mod bootstrap;
mod draft;
mod lifecycle;
mod load;
mod save;

pub use lifecycle::EXPORT_MIME_TYPE;

use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::backend::{
    DirectHandle, DraftStore, Exporter, FilePicker, Platform, SandboxFile, SandboxStorage,
    SaveChannel, TimerService, TimerToken, UiHost,
};
use crate::channel::PendingSave;
use crate::codec::OutlineCodec;
use crate::config::PersistConfig;
use crate::error::{PersistError, Result};
use crate::events::{EventBus, PersistEvent, SharedBus, now_ms};
use crate::source::DocumentSource;

/// Optional host capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    /// Background save worker.
    Worker,
    /// User-granted direct file handles.
    DirectAccess,
    /// App-private sandboxed storage.
    Sandbox,
}

impl Display for Feature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Feature::Worker => "background worker",
            Feature::DirectAccess => "direct file access",
            Feature::Sandbox => "app storage",
        })
    }
}

/// Operations gated by the busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Initialize,
    Load,
    LoadCopy,
    OpenDirect,
    LoadSandbox,
    LoadDraft,
    SaveDirect,
    SaveSandbox,
    CreateNew,
    Export,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Initialize => "initialize",
            Operation::Load => "load",
            Operation::LoadCopy => "loadCopy",
            Operation::OpenDirect => "openDirect",
            Operation::LoadSandbox => "loadSandbox",
            Operation::LoadDraft => "loadDraft",
            Operation::SaveDirect => "saveDirect",
            Operation::SaveSandbox => "saveSandbox",
            Operation::CreateNew => "createNew",
            Operation::Export => "export",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an operation the user can decline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// The user declined a confirmation or dismissed a picker. Nothing changed.
    Cancelled,
}

/// Which save button an indicator belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveTarget {
    Direct,
    Sandbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SavingIndicator {
    Idle,
    Saving,
    Saved,
}

/// Bootstrap progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BootstrapPhase {
    #[default]
    Idle,
    ProbingFeatures,
    LoadingPersistent,
    LoadingDraft,
    Finalizing,
    Ready,
}

/// Detected capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub worker: bool,
    pub direct_access: bool,
    pub sandbox: bool,
}

/// Snapshot of orchestrator state for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub source: DocumentSource,
    pub dirty: bool,
    pub busy: bool,
    pub phase: BootstrapPhase,
    pub display_name: Option<String>,
    pub has_document: bool,
    pub has_direct_handle: bool,
    pub has_persistent_file: bool,
    /// A background save has been posted and not yet completed.
    pub save_pending: bool,
    pub capabilities: Capabilities,
}

impl FileStatus {
    pub fn initializing(&self) -> bool {
        !matches!(self.phase, BootstrapPhase::Idle | BootstrapPhase::Ready)
    }
}

/// Host-provided collaborators.
pub struct Collaborators {
    pub platform: Arc<dyn Platform>,
    pub ui: Arc<dyn UiHost>,
    pub drafts: Arc<dyn DraftStore>,
    pub timers: Arc<dyn TimerService>,
    pub exporter: Arc<dyn Exporter>,
}

/// Who is asking to take the busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Caller {
    /// UI-triggered: rejected while busy.
    External,
    /// A bootstrap step: bootstrap already holds the flag.
    Bootstrap,
}

struct State<D> {
    phase: BootstrapPhase,
    source: DocumentSource,
    dirty: bool,
    busy: bool,
    generation: u64,
    document: Option<D>,
    display_name: Option<String>,
    direct_handle: Option<Arc<dyn DirectHandle>>,
    persistent: Option<Arc<dyn SandboxFile>>,
    sandbox_root: Option<Arc<dyn SandboxStorage>>,
    channel: Option<Arc<dyn SaveChannel>>,
    picker: Option<Arc<dyn FilePicker>>,
    pending: Option<PendingSave>,
}

impl<D> State<D> {
    fn new() -> Self {
        Self {
            phase: BootstrapPhase::Idle,
            source: DocumentSource::Empty,
            dirty: false,
            busy: false,
            generation: 0,
            document: None,
            display_name: None,
            direct_handle: None,
            persistent: None,
            sandbox_root: None,
            channel: None,
            picker: None,
            pending: None,
        }
    }

    /// Drop the document and switch to `source`, dirty per its policy.
    ///
    /// The direct handle only survives a switch to [`DocumentSource::Direct`].
    fn reset(&mut self, source: DocumentSource) {
        if source != DocumentSource::Direct {
            self.direct_handle = None;
        }
        self.source = source;
        self.dirty = source.policy().unsaved;
        self.document = None;
        self.display_name = None;
        self.generation += 1;
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            worker: self.channel.is_some(),
            direct_access: self.picker.is_some(),
            sandbox: self.sandbox_root.is_some(),
        }
    }
}

/// Releases the busy flag when dropped, unless handed off.
#[must_use]
pub(crate) struct BusyGuard<'a, C: OutlineCodec> {
    owner: &'a Persistence<C>,
    armed: bool,
}

impl<C: OutlineCodec> BusyGuard<'_, C> {
    /// Leave the flag set; someone else (a pending background save) releases it.
    pub(crate) fn hand_off(mut self) {
        self.armed = false;
    }
}

impl<C: OutlineCodec> Drop for BusyGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.owner.update(|s| s.busy = false);
            self.owner.emit_state();
        }
    }
}

/// Orchestrates loading and saving one outline document.
pub struct Persistence<C: OutlineCodec> {
    config: PersistConfig,
    codec: C,
    platform: Arc<dyn Platform>,
    ui: Arc<dyn UiHost>,
    drafts: Arc<dyn DraftStore>,
    timers: Arc<dyn TimerService>,
    exporter: Arc<dyn Exporter>,
    events: SharedBus,
    state: Mutex<State<C::Document>>,
}

impl<C: OutlineCodec> Persistence<C> {
    pub fn new(config: PersistConfig, codec: C, collaborators: Collaborators) -> Self {
        let Collaborators {
            platform,
            ui,
            drafts,
            timers,
            exporter,
        } = collaborators;

        Self {
            config,
            codec,
            platform,
            ui,
            drafts,
            timers,
            exporter,
            events: EventBus::shared(),
            state: Mutex::new(State::new()),
        }
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Event bus carrying state changes and indicators.
    pub fn events(&self) -> &SharedBus {
        &self.events
    }

    pub fn status(&self) -> FileStatus {
        self.update(|s| FileStatus {
            source: s.source,
            dirty: s.dirty,
            busy: s.busy,
            phase: s.phase,
            display_name: s.display_name.clone(),
            has_document: s.document.is_some(),
            has_direct_handle: s.direct_handle.is_some(),
            has_persistent_file: s.persistent.is_some(),
            save_pending: s.pending.is_some(),
            capabilities: s.capabilities(),
        })
    }

    pub fn phase(&self) -> BootstrapPhase {
        self.update(|s| s.phase)
    }

    pub fn source(&self) -> DocumentSource {
        self.update(|s| s.source)
    }

    pub fn is_dirty(&self) -> bool {
        self.update(|s| s.dirty)
    }

    pub fn is_busy(&self) -> bool {
        self.update(|s| s.busy)
    }

    /// Read access to the current document.
    pub fn with_document<R>(&self, f: impl FnOnce(&C::Document) -> R) -> Option<R> {
        self.update(|s| s.document.as_ref().map(f))
    }

    /// Apply an editor mutation, then record it as a content change.
    ///
    /// Returns `None` (and records nothing) when no document is loaded.
    pub fn update_document<R>(&self, f: impl FnOnce(&mut C::Document) -> R) -> Option<R> {
        let result = self.update(|s| s.document.as_mut().map(f));
        if result.is_some() {
            self.notify_content_changed();
        }
        result
    }

    /// Record that the editor changed the document.
    ///
    /// Marks dirty and (re)arms the debounced draft backup.
    pub fn notify_content_changed(&self) {
        let generation = self.update(|s| {
            s.dirty = true;
            s.generation += 1;
            s.generation
        });
        self.timers.schedule(
            TimerToken::DraftAutosave(generation),
            self.config.autosave_delay(),
        );
        self.emit_state();
    }

    /// Reset the editor to `source` with no document.
    pub fn reset(&self, source: DocumentSource) {
        debug!("Resetting editor state to {}", source);
        self.update(|s| s.reset(source));
        self.emit_state();
    }

    /// Dispatch a fired timer.
    pub async fn on_timer(&self, token: TimerToken) {
        match token {
            TimerToken::SafetyRelease(id) => self.release_stalled_save(id),
            TimerToken::DraftAutosave(generation) => {
                if self.update(|s| s.generation) != generation {
                    debug!("Draft autosave superseded by a newer edit");
                    return;
                }
                if let Err(e) = self.save_draft().await {
                    debug!("Autosave draft not written: {}", e);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, State<C::Document>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` with the state locked. Never await inside.
    fn update<R>(&self, f: impl FnOnce(&mut State<C::Document>) -> R) -> R {
        f(&mut self.lock())
    }

    pub(crate) fn emit(&self, event: PersistEvent) {
        self.events.emit(event);
    }

    fn emit_state(&self) {
        self.emit(PersistEvent::StateChanged {
            status: self.status(),
            timestamp: now_ms(),
        });
    }

    fn indicate(&self, target: SaveTarget, state: SavingIndicator) {
        self.emit(PersistEvent::SavingIndicator {
            target,
            state,
            timestamp: now_ms(),
        });
    }

    fn reject(&self, operation: Operation) -> PersistError {
        warn!("{} rejected, another operation is in progress", operation);
        self.emit(PersistEvent::OperationRejected {
            operation,
            timestamp: now_ms(),
        });
        PersistError::Busy(operation)
    }

    /// Fail fast without taking the flag, for checks made before a prompt.
    fn ensure_idle(&self, operation: Operation) -> Result<()> {
        if self.is_busy() {
            return Err(self.reject(operation));
        }
        Ok(())
    }

    /// Take the busy flag for `operation`.
    fn begin(&self, operation: Operation, caller: Caller) -> Result<BusyGuard<'_, C>> {
        if caller == Caller::Bootstrap {
            return Ok(BusyGuard {
                owner: self,
                armed: false,
            });
        }

        let acquired = self.update(|s| !std::mem::replace(&mut s.busy, true));
        if !acquired {
            return Err(self.reject(operation));
        }
        debug!("{} acquired busy flag", operation);
        self.emit_state();
        Ok(BusyGuard {
            owner: self,
            armed: true,
        })
    }

    /// Serialize the current document with its edit generation.
    ///
    /// No document serializes as empty text, which canonical sources load as
    /// a clean minimal outline.
    fn serialize_current(&self) -> Option<(String, u64)> {
        self.update(|s| {
            let text = match &s.document {
                Some(document) => self.codec.serialize(document)?,
                None => String::new(),
            };
            Some((text, s.generation))
        })
    }

    /// Clear dirty if nothing changed since `generation` was serialized.
    fn mark_saved(&self, generation: u64) {
        self.update(|s| {
            if s.generation == generation {
                s.dirty = false;
            } else {
                debug!(
                    "Content changed during save (generation {} -> {}), staying dirty",
                    generation, s.generation
                );
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::codec::OutlineCodec;
    use crate::config::PersistConfig;
    use crate::memory::MemoryHost;
    use crate::outline::{BikeCodec, Outline, OutlineItem};

    use super::Persistence;

    pub const DRAFT_KEY: &str = "bikeEditorProDraft";
    pub const SANDBOX_FILE: &str = "_current_outline.bike";

    pub fn persistence(host: &MemoryHost) -> Persistence<BikeCodec> {
        Persistence::new(PersistConfig::default(), BikeCodec, host.collaborators())
    }

    pub fn outline_text(items: &[&str]) -> String {
        let outline = Outline::new(items.iter().map(|t| OutlineItem::new(*t)).collect());
        BikeCodec.serialize(&outline).unwrap_or_default()
    }

    /// Run bootstrap against `host` and return the ready orchestrator.
    pub async fn ready(host: &MemoryHost) -> Persistence<BikeCodec> {
        let persistence = persistence(host);
        persistence.initialize().await.unwrap();
        persistence
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::memory::{MemoryHost, MemoryPlatform};
    use crate::outline::OutlineItem;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_content_change_marks_dirty_and_arms_autosave() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["a"]), "a.bike", DocumentSource::Direct)
            .unwrap();
        assert!(!persistence.is_dirty());

        persistence.update_document(|doc| doc.items.push(OutlineItem::new("b")));

        assert!(persistence.is_dirty());
        assert!(matches!(
            host.timers.last(),
            Some(TimerToken::DraftAutosave(_))
        ));
        assert_eq!(persistence.with_document(|doc| doc.len()), Some(2));
    }

    #[tokio::test]
    async fn test_update_without_document_is_noop() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        assert!(persistence.update_document(|doc| doc.items.clear()).is_none());
        assert!(!persistence.is_dirty());
    }

    #[tokio::test]
    async fn test_reset_follows_source_policy() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = persistence(&host);

        persistence.reset(DocumentSource::New);
        assert!(persistence.is_dirty());
        persistence.reset(DocumentSource::Opfs);
        assert!(!persistence.is_dirty());
        assert!(!persistence.status().has_document);
    }

    #[tokio::test]
    async fn test_state_changes_are_published() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = persistence(&host);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let _sub = persistence.events().subscribe(move |event| {
            if matches!(event, PersistEvent::StateChanged { .. }) {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        persistence.reset(DocumentSource::Empty);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let json = serde_json::to_string(&persistence(&host).status()).unwrap();
        assert!(json.contains("\"source\":\"empty\""));
        assert!(json.contains("\"hasDirectHandle\":false"));
        assert!(json.contains("\"directAccess\":false"));
    }
}
