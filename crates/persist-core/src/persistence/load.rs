//! Loading content into the editor.

use std::sync::Arc;
use tracing::{error, info, warn};

use super::{Caller, Feature, Operation, Outcome, Persistence};
use crate::codec::OutlineCodec;
use crate::error::{PersistError, Result, StorageError};
use crate::filename::display_name_for;
use crate::source::{DocumentSource, EmptyContentPolicy};

impl<C: OutlineCodec> Persistence<C> {
    /// Replace the document with `content` from `source`.
    ///
    /// Empty content is handled per source policy. A parse failure alerts,
    /// resets to the empty state and returns [`PersistError::Parse`].
    pub fn load(&self, content: &str, display_name: &str, source: DocumentSource) -> Result<()> {
        let _busy = self.begin(Operation::Load, Caller::External)?;
        self.apply_content(content, display_name, source)
    }

    /// Open a file's content as an unsaved copy.
    pub async fn load_copy(&self, file_name: &str, content: &str) -> Result<Outcome> {
        self.ensure_idle(Operation::LoadCopy)?;
        if !self
            .check_unsaved_changes(&format!("load '{file_name}'"))
            .await
        {
            return Ok(Outcome::Cancelled);
        }

        let _busy = self.begin(Operation::LoadCopy, Caller::External)?;
        info!("Loading {} as a copy", file_name);
        let display_name = self.display_name(file_name);
        self.apply_content(content, &display_name, DocumentSource::Copy)?;
        Ok(Outcome::Done)
    }

    /// Pick a file and edit it in place.
    pub async fn open_direct(&self) -> Result<Outcome> {
        let Some(picker) = self.update(|s| s.picker.clone()) else {
            self.ui
                .alert("Direct file editing is not supported by this browser.");
            return Err(PersistError::FeatureUnavailable(Feature::DirectAccess));
        };
        self.ensure_idle(Operation::OpenDirect)?;
        if !self.check_unsaved_changes("open a new direct file").await {
            return Ok(Outcome::Cancelled);
        }

        let handle = match picker.pick_file().await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                info!("User cancelled file open dialog");
                return Ok(Outcome::Cancelled);
            }
            Err(e) => return Err(self.open_failed(e)),
        };

        let _busy = self.begin(Operation::OpenDirect, Caller::External)?;
        info!("Opening {} for direct editing", handle.name());
        let content = match handle.read_text().await {
            Ok(content) => content,
            Err(e) => return Err(self.open_failed(e)),
        };

        let display_name = self.display_name(&handle.name());
        self.update(|s| {
            s.direct_handle = Some(Arc::clone(&handle));
            s.persistent = None;
        });
        self.apply_content(&content, &display_name, DocumentSource::Direct)?;
        Ok(Outcome::Done)
    }

    /// Reload the app-storage file.
    pub async fn load_from_sandbox(&self) -> Result<()> {
        self.load_persistent(Caller::External).await
    }

    pub(crate) async fn load_persistent(&self, caller: Caller) -> Result<()> {
        let file_name = self.config.sandbox_file_name.clone();
        let Some(file) = self.update(|s| s.persistent.clone()) else {
            info!("No app storage file to load");
            return Err(PersistError::HandleNotFound(file_name));
        };

        let _busy = self.begin(Operation::LoadSandbox, caller)?;
        info!("Loading app storage file {}", file.name());

        match file.read_text().await {
            Ok(content) => self.apply_content(&content, &file_name, DocumentSource::Opfs),
            Err(StorageError::NotFound(_)) => {
                error!("App storage file {} disappeared", file_name);
                self.ui.alert(&format!(
                    "Could not find the file '{file_name}' in App Storage."
                ));
                self.update(|s| {
                    s.persistent = None;
                    s.reset(DocumentSource::Empty);
                });
                self.emit_state();
                Err(PersistError::HandleNotFound(file_name))
            }
            Err(e) => {
                error!("Loading app storage file failed: {}", e);
                self.ui
                    .alert(&format!("Could not load the file from App Storage: {e}"));
                self.reset(DocumentSource::Empty);
                Err(e.into())
            }
        }
    }

    fn display_name(&self, file_name: &str) -> String {
        display_name_for(
            file_name,
            &self.config.default_extension,
            self.config.platform,
        )
    }

    fn open_failed(&self, e: StorageError) -> PersistError {
        error!("Opening file directly failed: {}", e);
        self.ui.alert(&format!("Could not open file: {e}"));
        self.reset(DocumentSource::Empty);
        e.into()
    }

    /// Classify and install content. The caller holds the busy flag.
    pub(crate) fn apply_content(
        &self,
        content: &str,
        display_name: &str,
        source: DocumentSource,
    ) -> Result<()> {
        info!("Loading {} ({} bytes) from {}", display_name, content.len(), source);
        self.update(|s| s.reset(source));
        let policy = source.policy();

        let (document, dirty) = if content.trim().is_empty() {
            warn!("Content of {} is empty", display_name);
            match policy.on_empty {
                EmptyContentPolicy::MinimalClean => (self.codec.minimal_structure(), false),
                EmptyContentPolicy::MinimalDirtyWithNotice => {
                    self.ui.alert(&format!(
                        "File '{display_name}' is empty. Loading as empty outline."
                    ));
                    (self.codec.minimal_structure(), true)
                }
                EmptyContentPolicy::ResetEmpty => {
                    self.reset(DocumentSource::Empty);
                    return Ok(());
                }
            }
        } else {
            match self.codec.parse(content) {
                Ok(document) => (document, policy.unsaved),
                Err(e) => {
                    error!("Failed to parse {}: {}", display_name, e);
                    self.ui.alert(&format!(
                        "Failed to load or parse '{display_name}'.\n\nError: {e}"
                    ));
                    self.reset(DocumentSource::Empty);
                    return Err(e.into());
                }
            }
        };

        self.update(|s| {
            s.document = Some(document);
            s.dirty = dirty;
            s.source = source;
            s.display_name = Some(display_name.to_string());
        });
        self.emit_state();
        self.ui.focus_first_item();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::backend::PermissionState;
    use crate::codec::ParseError;
    use crate::memory::{MemoryDirectHandle, MemoryHost, MemoryPlatform};

    #[tokio::test]
    async fn test_canonical_load_is_clean() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;

        persistence
            .load(&outline_text(&["a", "b"]), "notes.bike", DocumentSource::Direct)
            .unwrap();

        let status = persistence.status();
        assert_eq!(status.source, DocumentSource::Direct);
        assert!(!status.dirty);
        assert!(!status.busy);
        assert_eq!(status.display_name.as_deref(), Some("notes.bike"));
        assert_eq!(host.ui.focus_requests(), 1);
    }

    #[tokio::test]
    async fn test_non_canonical_loads_are_dirty() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;

        for source in [DocumentSource::Copy, DocumentSource::New, DocumentSource::Draft] {
            persistence
                .load(&outline_text(&["a"]), "a.bike", source)
                .unwrap();
            assert!(persistence.is_dirty(), "{source} should load dirty");
            assert_eq!(persistence.source(), source);
        }
    }

    #[tokio::test]
    async fn test_empty_canonical_content_is_minimal_and_clean() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;

        persistence.load("  \n", "a.bike", DocumentSource::Opfs).unwrap();

        assert_eq!(persistence.with_document(|d| d.len()), Some(1));
        assert!(!persistence.is_dirty());
        assert!(host.ui.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_empty_copy_is_dirty_with_notice() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;

        persistence.load("", "a.bike", DocumentSource::Copy).unwrap();

        assert_eq!(persistence.source(), DocumentSource::Copy);
        assert!(persistence.is_dirty());
        assert_eq!(
            host.ui.alerts(),
            vec!["File 'a.bike' is empty. Loading as empty outline.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_draft_resets_but_succeeds() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;

        assert!(persistence.load("", "x", DocumentSource::Draft).is_ok());
        assert_eq!(persistence.source(), DocumentSource::Empty);
        assert!(!persistence.is_dirty());
        assert!(!persistence.status().has_document);
    }

    #[tokio::test]
    async fn test_parse_failure_resets_to_empty() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["keep"]), "a.bike", DocumentSource::Direct)
            .unwrap();

        let err = persistence
            .load("<p>no list</p>", "b.bike", DocumentSource::Copy)
            .unwrap_err();

        assert_eq!(err, PersistError::Parse(ParseError::MissingRoot));
        assert_eq!(persistence.source(), DocumentSource::Empty);
        assert!(!persistence.is_dirty());
        assert!(!persistence.is_busy());
        assert_eq!(host.ui.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_load_copy_normalizes_name_and_clears_handle() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;
        host.picker()
            .unwrap()
            .push_handle(MemoryDirectHandle::new("a.bike", outline_text(&["a"])));
        persistence.open_direct().await.unwrap();
        assert!(persistence.status().has_direct_handle);

        let outcome = persistence
            .load_copy("Plan.xhtml", &outline_text(&["p"]))
            .await
            .unwrap();

        let status = persistence.status();
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(status.source, DocumentSource::Copy);
        assert_eq!(status.display_name.as_deref(), Some("Plan.bike"));
        assert!(!status.has_direct_handle);
        assert!(status.dirty);
    }

    #[tokio::test]
    async fn test_non_direct_sources_drop_direct_handle() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;

        for source in [
            DocumentSource::Copy,
            DocumentSource::New,
            DocumentSource::Draft,
            DocumentSource::Opfs,
        ] {
            host.picker()
                .unwrap()
                .push_handle(MemoryDirectHandle::new("a.bike", outline_text(&["a"])));
            persistence.open_direct().await.unwrap();
            assert!(persistence.status().has_direct_handle);

            persistence
                .load(&outline_text(&["other"]), "b.bike", source)
                .unwrap();
            assert!(
                !persistence.status().has_direct_handle,
                "{source} kept the direct handle"
            );
        }
    }

    #[tokio::test]
    async fn test_reset_to_empty_drops_direct_handle() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;
        let handle = MemoryDirectHandle::new("a.bike", outline_text(&["a"]));
        host.picker().unwrap().push_handle(handle.clone());
        persistence.open_direct().await.unwrap();

        persistence.reset(DocumentSource::Empty);

        assert!(!persistence.status().has_direct_handle);
        assert_eq!(
            persistence.save_direct().await,
            Err(PersistError::NoDirectHandle)
        );
        assert_eq!(handle.content(), outline_text(&["a"]));
    }

    #[tokio::test]
    async fn test_load_copy_declined_keeps_state() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        persistence
            .load(&outline_text(&["mine"]), "mine.bike", DocumentSource::Copy)
            .unwrap();
        host.ui.answer(false);

        let outcome = persistence
            .load_copy("other.bike", &outline_text(&["other"]))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(
            host.ui.prompts(),
            vec![
                "You have unsaved changes. Are you sure you want to load 'other.bike' and discard them?"
                    .to_string()
            ]
        );
        assert_eq!(
            persistence.status().display_name.as_deref(),
            Some("mine.bike")
        );
        assert!(persistence.is_dirty());
    }

    #[tokio::test]
    async fn test_open_direct_clears_persistent_handle() {
        let host = MemoryHost::default();
        host.sandbox()
            .unwrap()
            .write(SANDBOX_FILE, outline_text(&["stored"]));
        let persistence = ready(&host).await;
        assert!(persistence.status().has_persistent_file);

        let handle = MemoryDirectHandle::new("Doc.bike", outline_text(&["direct"]))
            .with_permissions(PermissionState::Granted, PermissionState::Granted);
        host.picker().unwrap().push_handle(handle);

        assert_eq!(persistence.open_direct().await.unwrap(), Outcome::Done);
        let status = persistence.status();
        assert_eq!(status.source, DocumentSource::Direct);
        assert!(status.has_direct_handle);
        assert!(!status.has_persistent_file);
        assert!(!status.dirty);
    }

    #[tokio::test]
    async fn test_open_direct_cancelled_picker_changes_nothing() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;
        host.picker().unwrap().push_cancel();

        assert_eq!(persistence.open_direct().await.unwrap(), Outcome::Cancelled);
        assert_eq!(persistence.source(), DocumentSource::Empty);
        assert!(!persistence.is_busy());
        assert!(host.ui.alerts().is_empty());
    }

    #[tokio::test]
    async fn test_open_direct_read_error_resets() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;
        let handle = MemoryDirectHandle::new("broken.bike", "");
        handle.fail_reads(StorageError::Io("unreadable".into()));
        host.picker().unwrap().push_handle(handle);

        let err = persistence.open_direct().await.unwrap_err();

        assert!(matches!(err, PersistError::Storage(StorageError::Io(_))));
        assert_eq!(persistence.source(), DocumentSource::Empty);
        assert!(!persistence.is_busy());
        assert_eq!(host.ui.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_open_direct_unsupported() {
        let host = MemoryHost::new(MemoryPlatform::full().without_direct_access());
        let persistence = ready(&host).await;
        assert_eq!(
            persistence.open_direct().await,
            Err(PersistError::FeatureUnavailable(Feature::DirectAccess))
        );
    }

    #[tokio::test]
    async fn test_missing_sandbox_file_invalidates_handle() {
        let host = MemoryHost::default();
        let sandbox = host.sandbox().unwrap();
        sandbox.write(SANDBOX_FILE, outline_text(&["stored"]));
        let persistence = ready(&host).await;
        sandbox.remove(SANDBOX_FILE);

        let err = persistence.load_from_sandbox().await.unwrap_err();

        assert_eq!(err, PersistError::HandleNotFound(SANDBOX_FILE.to_string()));
        let status = persistence.status();
        assert!(!status.has_persistent_file);
        assert_eq!(status.source, DocumentSource::Empty);
        assert!(!status.busy);
        assert_eq!(
            host.ui.alerts(),
            vec![format!("Could not find the file '{SANDBOX_FILE}' in App Storage.")]
        );
    }
}
