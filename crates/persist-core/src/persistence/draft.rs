//! Draft backups in the ephemeral local store.

use tracing::{debug, error, info, warn};

use super::{Caller, Operation, Persistence};
use crate::codec::OutlineCodec;
use crate::error::{PersistError, Result, StorageError};
use crate::events::{PersistEvent, now_ms};
use crate::source::DocumentSource;

const RESTORE_PROMPT: &str =
    "Load unsaved draft from previous session? (Choosing 'Cancel' will discard the draft)";
const REPLACE_PROMPT: &str = "Load unsaved draft? This will replace your current content. (Choosing 'Cancel' will discard the draft)";
const QUOTA_ALERT: &str =
    "Could not save draft: Local storage quota exceeded. Please save your work manually.";

impl<C: OutlineCodec> Persistence<C> {
    /// Back up the document as a draft.
    ///
    /// Only writes while dirty and idle, and only content that has at least one
    /// item. Returns whether a draft was written.
    pub async fn save_draft(&self) -> Result<bool> {
        let snapshot = self.update(|s| {
            if s.busy || !s.dirty {
                return None;
            }
            Some(s.document.as_ref().map(|d| self.codec.serialize(d)))
        });
        let Some(serialized) = snapshot else {
            debug!("Draft save skipped: idle or clean state required");
            return Ok(false);
        };

        let text = match serialized {
            Some(Some(text)) => text,
            Some(None) => {
                warn!("Draft save skipped: serialization failed");
                return Ok(false);
            }
            None => {
                debug!("Draft save skipped: no document");
                return Ok(false);
            }
        };
        if !C::has_items(&text) {
            debug!("Draft save skipped: outline appears empty");
            return Ok(false);
        }

        match self.drafts.set(&self.config.draft_key, &text).await {
            Ok(()) => {
                debug!("Draft saved ({} bytes)", text.len());
                self.emit(PersistEvent::DraftSaved {
                    bytes: text.len(),
                    timestamp: now_ms(),
                });
                Ok(true)
            }
            Err(StorageError::QuotaExceeded) => {
                error!("Draft save failed: quota exceeded");
                self.ui.alert(QUOTA_ALERT);
                Err(PersistError::QuotaExceeded)
            }
            Err(e) => {
                error!("Draft save failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Offer to restore the stored draft.
    ///
    /// Prompts when the editor is empty, or always with `force_prompt`.
    /// Returns whether the draft was loaded.
    pub async fn load_draft(&self, force_prompt: bool) -> Result<bool> {
        self.load_draft_as(force_prompt, Caller::External).await
    }

    pub(crate) async fn load_draft_as(&self, force_prompt: bool, caller: Caller) -> Result<bool> {
        if caller == Caller::External {
            self.ensure_idle(Operation::LoadDraft)?;
        }

        let stored = match self.drafts.get(&self.config.draft_key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("No draft found");
                return Ok(false);
            }
            Err(e) => {
                error!("Reading draft failed: {}", e);
                return Ok(false);
            }
        };

        if !C::looks_structural(&stored) {
            warn!("Stored draft is not an outline, discarding");
            self.discard_draft().await;
            return Ok(false);
        }

        let editor_empty = self.update(|s| s.document.is_none());
        let prompt = match (editor_empty, force_prompt) {
            (true, _) => RESTORE_PROMPT,
            (false, true) => REPLACE_PROMPT,
            (false, false) => {
                debug!("Editor has content, leaving draft for later");
                return Ok(false);
            }
        };

        let accepted = self.ui.confirm(prompt).await;
        // Another operation may have started while the prompt was open.
        let _busy = self.begin(Operation::LoadDraft, caller)?;

        if !accepted {
            info!("Draft declined, discarding");
            self.discard_draft().await;
            if editor_empty {
                self.reset(DocumentSource::Empty);
            }
            return Ok(false);
        }

        self.update(|s| s.reset(DocumentSource::Draft));

        match self.codec.parse(&stored) {
            Ok(document) => {
                self.update(|s| {
                    s.document = Some(document);
                    s.dirty = true;
                });
                self.discard_draft().await;
                info!("Draft restored");
                self.emit_state();
                self.ui.focus_first_item();
                Ok(true)
            }
            Err(e) => {
                error!("Stored draft failed to parse: {}", e);
                self.ui.alert(&format!(
                    "Failed to load draft: {e}\nThe invalid draft will be discarded."
                ));
                self.discard_draft().await;
                self.reset(DocumentSource::Empty);
                Err(e.into())
            }
        }
    }

    async fn discard_draft(&self) {
        if let Err(e) = self.drafts.remove(&self.config.draft_key).await {
            warn!("Removing draft failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::backend::{TimerToken, UiHost};
    use crate::codec::ParseError;
    use crate::config::PersistConfig;
    use crate::memory::{MemoryDirectHandle, MemoryDraftStore, MemoryHost, MemoryPlatform};
    use crate::outline::{BikeCodec, OutlineItem};
    use crate::persistence::Collaborators;
    use async_trait::async_trait;
    use std::sync::{Arc, OnceLock, Weak};

    /// Starts a background save while the prompt is open, then declines.
    #[derive(Default)]
    struct SaveWhilePrompting {
        target: OnceLock<Weak<Persistence<BikeCodec>>>,
    }

    #[async_trait]
    impl UiHost for SaveWhilePrompting {
        async fn confirm(&self, _message: &str) -> bool {
            if let Some(persistence) = self.target.get().and_then(Weak::upgrade) {
                persistence.save_to_sandbox().await.unwrap();
            }
            false
        }

        fn alert(&self, _message: &str) {}

        fn focus_first_item(&self) {}
    }

    #[tokio::test]
    async fn test_autosave_writes_draft_for_latest_edit() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["a"]), "a.bike", DocumentSource::Copy)
            .unwrap();

        persistence.update_document(|d| d.items.push(OutlineItem::new("b")));
        let stale = host.timers.last().unwrap();
        persistence.update_document(|d| d.items.push(OutlineItem::new("c")));
        let latest = host.timers.last().unwrap();

        persistence.on_timer(stale).await;
        assert_eq!(host.drafts.value(DRAFT_KEY), None);

        persistence.on_timer(latest).await;
        assert_eq!(
            host.drafts.value(DRAFT_KEY),
            Some(outline_text(&["a", "b", "c"]))
        );
    }

    #[tokio::test]
    async fn test_dirty_canonical_source_still_backed_up() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["a"]), "a.bike", DocumentSource::Opfs)
            .unwrap();
        persistence.notify_content_changed();

        assert_eq!(persistence.save_draft().await, Ok(true));
        assert!(host.drafts.value(DRAFT_KEY).is_some());
    }

    #[tokio::test]
    async fn test_clean_or_empty_outline_not_backed_up() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["a"]), "a.bike", DocumentSource::Direct)
            .unwrap();
        assert_eq!(persistence.save_draft().await, Ok(false));

        persistence.update_document(|d| d.items.clear());
        assert_eq!(persistence.save_draft().await, Ok(false));
        assert_eq!(host.drafts.value(DRAFT_KEY), None);
    }

    #[tokio::test]
    async fn test_no_draft_while_busy() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["a"]), "a", DocumentSource::New)
            .unwrap();
        persistence.save_to_sandbox().await.unwrap();

        assert_eq!(persistence.save_draft().await, Ok(false));
        assert_eq!(host.drafts.value(DRAFT_KEY), None);
    }

    #[tokio::test]
    async fn test_quota_exceeded_alerts() {
        let host = MemoryHost::with_drafts(MemoryPlatform::bare(), MemoryDraftStore::with_quota(8));
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["a"]), "a", DocumentSource::Copy)
            .unwrap();

        assert_eq!(
            persistence.save_draft().await,
            Err(PersistError::QuotaExceeded)
        );
        assert_eq!(host.ui.alerts(), vec![QUOTA_ALERT.to_string()]);
    }

    #[tokio::test]
    async fn test_draft_left_alone_when_editor_has_content() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["mine"]), "a", DocumentSource::Direct)
            .unwrap();
        host.drafts.insert(DRAFT_KEY, outline_text(&["draft"]));

        assert_eq!(persistence.load_draft(false).await, Ok(false));
        assert!(host.ui.prompts().is_empty());
        assert!(host.drafts.value(DRAFT_KEY).is_some());
    }

    #[tokio::test]
    async fn test_forced_prompt_replaces_content() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["mine"]), "a", DocumentSource::Direct)
            .unwrap();
        host.drafts.insert(DRAFT_KEY, outline_text(&["draft"]));

        assert_eq!(persistence.load_draft(true).await, Ok(true));
        assert_eq!(host.ui.prompts(), vec![REPLACE_PROMPT.to_string()]);
        assert_eq!(persistence.source(), DocumentSource::Draft);
        assert!(persistence.is_dirty());
        assert_eq!(host.drafts.value(DRAFT_KEY), None);
    }

    #[tokio::test]
    async fn test_forced_prompt_declined_keeps_content() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["mine"]), "a", DocumentSource::Direct)
            .unwrap();
        host.drafts.insert(DRAFT_KEY, outline_text(&["draft"]));
        host.ui.answer(false);

        assert_eq!(persistence.load_draft(true).await, Ok(false));
        assert_eq!(persistence.source(), DocumentSource::Direct);
        assert_eq!(host.drafts.value(DRAFT_KEY), None);
    }

    #[tokio::test]
    async fn test_restored_draft_drops_direct_handle() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;
        let handle = MemoryDirectHandle::new("mine.bike", outline_text(&["mine"]));
        host.picker().unwrap().push_handle(handle.clone());
        persistence.open_direct().await.unwrap();
        assert!(persistence.status().has_direct_handle);
        host.drafts.insert(DRAFT_KEY, outline_text(&["draft"]));

        assert_eq!(persistence.load_draft(true).await, Ok(true));

        let status = persistence.status();
        assert_eq!(status.source, DocumentSource::Draft);
        assert!(!status.has_direct_handle);
        assert_eq!(
            persistence.save_direct().await,
            Err(PersistError::NoDirectHandle)
        );
        assert_eq!(handle.content(), outline_text(&["mine"]));
        assert!(persistence.is_dirty());
    }

    #[tokio::test]
    async fn test_prompt_answer_ignored_when_another_operation_started() {
        let host = MemoryHost::default();
        let ui = Arc::new(SaveWhilePrompting::default());
        let collaborators = Collaborators {
            ui: Arc::clone(&ui) as Arc<dyn UiHost>,
            ..host.collaborators()
        };
        let persistence = Arc::new(Persistence::new(
            PersistConfig::default(),
            BikeCodec,
            collaborators,
        ));
        assert!(ui.target.set(Arc::downgrade(&persistence)).is_ok());
        persistence.initialize().await.unwrap();
        persistence
            .load(&outline_text(&["mine"]), "mine.bike", DocumentSource::Copy)
            .unwrap();
        host.drafts.insert(DRAFT_KEY, outline_text(&["draft"]));

        assert_eq!(
            persistence.load_draft(true).await,
            Err(PersistError::Busy(Operation::LoadDraft))
        );

        let status = persistence.status();
        assert!(status.busy);
        assert_eq!(status.source, DocumentSource::Opfs);
        assert_eq!(
            persistence.with_document(|d| d.items[0].text.clone()),
            Some("mine".to_string())
        );
        assert_eq!(host.drafts.value(DRAFT_KEY), Some(outline_text(&["draft"])));
        assert_eq!(host.channel().unwrap().in_flight().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_draft_discarded_silently() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        host.drafts.insert(DRAFT_KEY, "just some text");

        assert_eq!(persistence.load_draft(false).await, Ok(false));
        assert!(host.ui.prompts().is_empty());
        assert_eq!(host.drafts.value(DRAFT_KEY), None);
    }

    #[tokio::test]
    async fn test_unparseable_draft_alerts_and_resets() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        host.drafts.insert(DRAFT_KEY, "<ul><li><p>never closed");

        let result = persistence.load_draft(false).await;

        assert!(matches!(
            result,
            Err(PersistError::Parse(ParseError::Unbalanced(_)))
        ));
        assert_eq!(persistence.source(), DocumentSource::Empty);
        assert!(!persistence.is_busy());
        assert_eq!(host.drafts.value(DRAFT_KEY), None);
        assert_eq!(host.ui.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_draft_store_is_not_an_error() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        host.drafts.fail_reads(StorageError::Io("denied".into()));

        assert_eq!(persistence.load_draft(true).await, Ok(false));
    }

    #[tokio::test]
    async fn test_autosave_token_carries_generation() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        persistence.notify_content_changed();
        persistence.notify_content_changed();

        let tokens: Vec<_> = host
            .timers
            .scheduled()
            .into_iter()
            .map(|(token, _)| token)
            .collect();
        assert_eq!(tokens.len(), 2);
        assert!(matches!(
            (tokens[0], tokens[1]),
            (TimerToken::DraftAutosave(a), TimerToken::DraftAutosave(b)) if b == a + 1
        ));
    }
}
