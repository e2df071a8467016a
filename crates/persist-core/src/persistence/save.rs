//! Direct-file saves and background app-storage saves.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{Caller, Feature, Operation, Persistence, SaveTarget, SavingIndicator};
use crate::backend::{AccessMode, DirectHandle, SandboxFile, SandboxStorage, TimerToken};
use crate::channel::{Correlation, PendingSave, RequestId, SaveRequest, SaveResponse, correlate};
use crate::codec::OutlineCodec;
use crate::error::{PersistError, Result, StorageError};
use crate::events::{PersistEvent, now_ms};
use crate::permission;
use crate::source::DocumentSource;

impl<C: OutlineCodec> Persistence<C> {
    /// Write the document back through the direct file handle.
    pub async fn save_direct(&self) -> Result<()> {
        let (supported, handle) = self.update(|s| (s.picker.is_some(), s.direct_handle.clone()));
        if !supported {
            self.ui
                .alert("Direct file editing is not supported by this browser.");
            return Err(PersistError::FeatureUnavailable(Feature::DirectAccess));
        }
        let Some(handle) = handle else {
            self.ui
                .alert("No direct file handle available. Use 'Open Direct' first.");
            return Err(PersistError::NoDirectHandle);
        };

        let _busy = self.begin(Operation::SaveDirect, Caller::External)?;
        info!("Saving {} directly", handle.name());

        if !permission::verify(handle.as_ref(), AccessMode::ReadWrite).await {
            warn!("Write permission denied for {}", handle.name());
            self.ui
                .alert("Write permission denied. Please try saving again and grant access.");
            return Err(PersistError::PermissionDenied);
        }

        let Some((content, generation)) = self.serialize_current() else {
            self.ui
                .alert("Failed to prepare content for saving. Cannot save.");
            return Err(PersistError::Serialization);
        };

        self.indicate(SaveTarget::Direct, SavingIndicator::Saving);
        match write_through(handle.as_ref(), &content).await {
            Ok(()) => {
                info!("Saved {} ({} bytes)", handle.name(), content.len());
                self.update(|s| s.source = DocumentSource::Direct);
                self.mark_saved(generation);
                self.indicate(SaveTarget::Direct, SavingIndicator::Saved);
                Ok(())
            }
            Err(e) => {
                error!("Direct save of {} failed: {}", handle.name(), e);
                self.indicate(SaveTarget::Direct, SavingIndicator::Idle);
                self.ui.alert(&format!("Failed to save file: {e}"));
                Err(e.into())
            }
        }
    }

    /// Hand the document to the background worker for the app-storage file.
    ///
    /// Returns once the request is posted. The busy flag stays set until the
    /// matching completion arrives through [`Self::handle_channel_message`] or
    /// the safety timer fires.
    pub async fn save_to_sandbox(&self) -> Result<RequestId> {
        let (root, channel) = self.update(|s| (s.sandbox_root.clone(), s.channel.clone()));
        let Some(root) = root else {
            self.ui
                .alert("App Storage (OPFS) is not available/initialized.");
            return Err(PersistError::FeatureUnavailable(Feature::Sandbox));
        };
        let Some(channel) = channel else {
            self.ui.alert("Background saving worker is not available.");
            return Err(PersistError::ChannelUnavailable);
        };
        self.ensure_idle(Operation::SaveSandbox)?;

        let Some((content, generation)) = self.serialize_current() else {
            self.ui
                .alert("Failed to prepare content for saving. Cannot save.");
            return Err(PersistError::Serialization);
        };

        let busy = self.begin(Operation::SaveSandbox, Caller::External)?;
        self.indicate(SaveTarget::Sandbox, SavingIndicator::Saving);

        let file_name = self.config.sandbox_file_name.clone();
        if let Err(e) = self.resolve_persistent(root.as_ref(), &file_name).await {
            return Err(self.sandbox_prep_failed(e.into()));
        }

        let request = SaveRequest::save_opfs(&file_name, content);
        let id = request.request_id;
        // Recorded before posting: a fast worker may answer before `post` returns.
        self.update(|s| {
            s.pending = Some(PendingSave {
                id,
                generation,
                holds_busy: true,
            })
        });

        if let Err(e) = channel.post(request) {
            self.update(|s| s.pending = None);
            return Err(self.sandbox_prep_failed(e.into()));
        }

        busy.hand_off();
        debug!("Posted save request {} for {}", id, file_name);
        self.update(|s| {
            s.source = DocumentSource::Opfs;
            s.direct_handle = None;
            s.display_name = Some(file_name);
        });
        self.timers
            .schedule(TimerToken::SafetyRelease(id), self.config.safety_timeout());
        self.emit_state();
        Ok(id)
    }

    async fn resolve_persistent(
        &self,
        root: &dyn SandboxStorage,
        file_name: &str,
    ) -> std::result::Result<Arc<dyn SandboxFile>, StorageError> {
        if let Some(file) = self.update(|s| s.persistent.clone()) {
            return Ok(file);
        }
        debug!("Creating app storage file {}", file_name);
        let file = root.create(file_name).await?;
        self.update(|s| s.persistent = Some(Arc::clone(&file)));
        Ok(file)
    }

    /// Undo a sandbox save that never reached the worker. The busy guard is
    /// still armed and releases on return.
    fn sandbox_prep_failed(&self, e: PersistError) -> PersistError {
        error!("Preparing app storage save failed: {}", e);
        self.ui.alert(&format!(
            "Could not prepare file for saving to App Storage: {e}"
        ));
        self.indicate(SaveTarget::Sandbox, SavingIndicator::Idle);
        self.update(|s| s.persistent = None);
        e
    }

    /// Feed a message received from the background worker.
    pub fn handle_channel_message(&self, response: &SaveResponse) {
        debug!(
            "Worker message: action={:?} success={} file={:?}",
            response.action, response.success, response.file_name
        );

        let file_name = &self.config.sandbox_file_name;
        let (correlation, pending) = self.update(|s| {
            let correlation = correlate(response, s.pending.as_ref(), file_name);
            let pending = match correlation {
                Correlation::Completes(_) => s.pending.take(),
                _ => s.pending,
            };
            (correlation, pending)
        });

        match (correlation, pending) {
            (Correlation::Completes(id), Some(pending)) => self.complete_save(response, pending, id),
            (Correlation::FailOpen, Some(pending)) if pending.holds_busy => {
                warn!("Unrecognized worker message for {}, releasing busy flag", file_name);
                self.update(|s| {
                    s.busy = false;
                    if let Some(p) = s.pending.as_mut() {
                        p.holds_busy = false;
                    }
                });
                self.indicate(SaveTarget::Sandbox, SavingIndicator::Idle);
                self.emit_state();
            }
            (Correlation::Stale, _) => {
                debug!("Ignoring completion for superseded request {:?}", response.request_id);
            }
            _ => debug!("Ignoring unrelated worker message"),
        }
    }

    fn complete_save(&self, response: &SaveResponse, pending: PendingSave, id: RequestId) {
        self.update(|s| {
            if pending.holds_busy {
                s.busy = false;
            }
        });

        if response.success {
            info!("App storage save {} completed", id);
            self.mark_saved(pending.generation);
            self.indicate(SaveTarget::Sandbox, SavingIndicator::Saved);
        } else {
            let reason = response.error.as_deref().unwrap_or("Unknown error");
            error!("App storage save {} failed: {}", id, reason);
            self.indicate(SaveTarget::Sandbox, SavingIndicator::Idle);
            self.ui
                .alert(&format!("Failed to save to App Storage: {reason}"));
        }
        self.emit_state();
    }

    /// Safety timer: the worker never answered `id`.
    ///
    /// Releases the busy flag if that save still holds it. The pending entry
    /// stays so a late success can still mark the document clean.
    pub(crate) fn release_stalled_save(&self, id: RequestId) {
        let released = self.update(|s| match s.pending.as_mut() {
            Some(p) if p.id == id && p.holds_busy => {
                p.holds_busy = false;
                s.busy = false;
                true
            }
            _ => false,
        });
        if !released {
            return;
        }

        warn!("Safety timeout: no completion for save {}, releasing busy flag", id);
        self.indicate(SaveTarget::Sandbox, SavingIndicator::Idle);
        self.emit(PersistEvent::SafetyTimeout {
            request_id: id,
            timestamp: now_ms(),
        });
        self.emit_state();
    }
}

/// Write `content` through a scoped writable target, aborting it on failure.
async fn write_through(handle: &dyn DirectHandle, content: &str) -> std::result::Result<(), StorageError> {
    let mut writable = handle.create_writable().await?;
    if let Err(e) = writable.write(content).await {
        if let Err(abort_err) = writable.abort().await {
            warn!("Aborting writable for {} failed: {}", handle.name(), abort_err);
        }
        return Err(e);
    }
    writable.close().await
}
