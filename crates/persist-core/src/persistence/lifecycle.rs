//! New documents, unsaved-change confirmation and export.

use tracing::{error, info};

use super::{Caller, Feature, Operation, Outcome, Persistence};
use crate::backend::ExportFile;
use crate::codec::OutlineCodec;
use crate::error::{PersistError, Result};
use crate::filename::normalize_file_name;
use crate::source::DocumentSource;

/// MIME type used for exported outlines (`.bike` and `.xhtml` alike).
pub const EXPORT_MIME_TYPE: &str = "application/xhtml+xml";

const DEFAULT_EXPORT_NAME: &str = "outline.bike";

impl<C: OutlineCodec> Persistence<C> {
    /// Ask before discarding unsaved changes. True when there is nothing to lose.
    pub async fn check_unsaved_changes(&self, action: &str) -> bool {
        if !self.is_dirty() {
            return true;
        }
        self.ui
            .confirm(&format!(
                "You have unsaved changes. Are you sure you want to {action} and discard them?"
            ))
            .await
    }

    /// Start a fresh outline destined for app storage.
    pub async fn create_new(&self) -> Result<Outcome> {
        if self.update(|s| s.sandbox_root.is_none()) {
            self.ui.alert("App Storage (OPFS) is not available.");
            return Err(PersistError::FeatureUnavailable(Feature::Sandbox));
        }
        self.ensure_idle(Operation::CreateNew)?;

        let (has_document, dirty) = self.update(|s| (s.document.is_some(), s.dirty));
        if has_document {
            let message = if dirty {
                "You have unsaved changes. Create a new App file and discard them?"
            } else {
                "Creating a new file will discard current content. Proceed?"
            };
            if !self.ui.confirm(message).await {
                info!("New file cancelled");
                return Ok(Outcome::Cancelled);
            }
        }

        {
            let _busy = self.begin(Operation::CreateNew, Caller::External)?;
            info!("Creating new outline");
            let document = self.codec.minimal_structure();
            self.update(|s| {
                s.reset(DocumentSource::New);
                s.document = Some(document);
                s.dirty = true;
            });
        }

        self.ui.focus_first_item();
        // Schedules the first draft backup of the new structure.
        self.notify_content_changed();
        Ok(Outcome::Done)
    }

    /// Hand a copy of the document to the export path.
    pub async fn export_copy(&self) -> Result<()> {
        if self.update(|s| s.document.is_none()) {
            self.ui.alert("Nothing to save. Create some content first.");
            return Err(PersistError::NothingToExport);
        }
        let _busy = self.begin(Operation::Export, Caller::External)?;

        let Some((content, _)) = self.serialize_current() else {
            self.ui
                .alert("Failed to prepare content for download. Please try again.");
            return Err(PersistError::Serialization);
        };
        let name = normalize_file_name(
            &self.suggested_export_name(),
            &self.config.default_extension,
            self.config.platform,
        );

        info!("Exporting as {}", name);
        let file = ExportFile {
            name,
            mime_type: EXPORT_MIME_TYPE.to_string(),
            content,
        };
        self.exporter.export(file).await.map_err(|e| {
            error!("Export failed: {}", e);
            self.ui.alert(&format!("Failed to export file: {e}"));
            PersistError::Export(e.to_string())
        })
    }

    fn suggested_export_name(&self) -> String {
        self.update(|s| match (s.source, &s.direct_handle) {
            (DocumentSource::Direct, Some(handle)) => handle.name(),
            (DocumentSource::Opfs, _) => self.config.sandbox_file_name.clone(),
            _ => s
                .display_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_EXPORT_NAME.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::backend::TimerToken;
    use crate::config::{PersistConfig, PlatformFamily};
    use crate::memory::{MemoryDirectHandle, MemoryHost, MemoryPlatform};
    use crate::outline::BikeCodec;

    #[tokio::test]
    async fn test_check_unsaved_changes_only_prompts_when_dirty() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        assert!(persistence.check_unsaved_changes("open a file").await);
        assert!(host.ui.prompts().is_empty());

        persistence.notify_content_changed();
        host.ui.answer(false);
        assert!(!persistence.check_unsaved_changes("open a file").await);
        assert_eq!(
            host.ui.prompts(),
            vec![
                "You have unsaved changes. Are you sure you want to open a file and discard them?"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_create_new_is_dirty_and_schedules_draft() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;

        assert_eq!(persistence.create_new().await, Ok(Outcome::Done));

        let status = persistence.status();
        assert_eq!(status.source, DocumentSource::New);
        assert!(status.dirty);
        assert!(!status.busy);
        assert_eq!(persistence.with_document(|d| d.len()), Some(1));
        assert!(host.ui.prompts().is_empty());
        assert_eq!(host.ui.focus_requests(), 1);

        let Some(token @ TimerToken::DraftAutosave(_)) = host.timers.last() else {
            panic!("draft autosave not scheduled");
        };
        persistence.on_timer(token).await;
        assert!(host.drafts.value(DRAFT_KEY).is_some());
    }

    #[tokio::test]
    async fn test_create_new_confirms_over_existing_content() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;
        host.picker()
            .unwrap()
            .push_handle(MemoryDirectHandle::new("a.bike", outline_text(&["a"])));
        persistence.open_direct().await.unwrap();
        host.ui.answer(false);

        assert_eq!(persistence.create_new().await, Ok(Outcome::Cancelled));
        assert_eq!(
            host.ui.prompts(),
            vec!["Creating a new file will discard current content. Proceed?".to_string()]
        );
        assert_eq!(persistence.source(), DocumentSource::Direct);

        assert_eq!(persistence.create_new().await, Ok(Outcome::Done));
        assert!(!persistence.status().has_direct_handle);
    }

    #[tokio::test]
    async fn test_create_new_requires_app_storage() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        assert_eq!(
            persistence.create_new().await,
            Err(PersistError::FeatureUnavailable(Feature::Sandbox))
        );
    }

    #[tokio::test]
    async fn test_export_uses_handle_name() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;
        host.picker()
            .unwrap()
            .push_handle(MemoryDirectHandle::new("Project.xhtml", outline_text(&["a"])));
        persistence.open_direct().await.unwrap();

        persistence.export_copy().await.unwrap();

        let exported = host.exporter.exported();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].name, "Project.bike");
        assert_eq!(exported[0].mime_type, EXPORT_MIME_TYPE);
        assert_eq!(exported[0].content, outline_text(&["a"]));
        assert!(!persistence.is_busy());
    }

    #[tokio::test]
    async fn test_export_names_by_source() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;

        persistence
            .load(&outline_text(&["a"]), "Notes.bike", DocumentSource::Copy)
            .unwrap();
        persistence.export_copy().await.unwrap();
        persistence
            .load(&outline_text(&["a"]), SANDBOX_FILE, DocumentSource::Opfs)
            .unwrap();
        persistence.export_copy().await.unwrap();

        let names: Vec<_> = host.exporter.exported().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["Notes.bike".to_string(), SANDBOX_FILE.to_string()]);
    }

    #[tokio::test]
    async fn test_export_of_new_document_uses_default_name() {
        let host = MemoryHost::default();
        let persistence = ready(&host).await;
        persistence.create_new().await.unwrap();

        persistence.export_copy().await.unwrap();
        assert_eq!(host.exporter.exported()[0].name, "outline.bike");
    }

    #[tokio::test]
    async fn test_export_on_apple_mobile_prefers_xhtml() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let config = PersistConfig {
            platform: PlatformFamily::AppleMobile,
            ..PersistConfig::default()
        };
        let persistence = Persistence::new(config, BikeCodec, host.collaborators());
        persistence.initialize().await.unwrap();
        persistence
            .load(&outline_text(&["a"]), "Trip", DocumentSource::Copy)
            .unwrap();

        persistence.export_copy().await.unwrap();
        assert_eq!(host.exporter.exported()[0].name, "Trip.xhtml");
    }

    #[tokio::test]
    async fn test_export_without_document() {
        let host = MemoryHost::new(MemoryPlatform::bare());
        let persistence = ready(&host).await;
        assert_eq!(
            persistence.export_copy().await,
            Err(PersistError::NothingToExport)
        );
        assert_eq!(
            host.ui.alerts(),
            vec!["Nothing to save. Create some content first.".to_string()]
        );
    }
}
