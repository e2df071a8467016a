//! Startup: capability probing and the load cascade.

use tracing::{debug, info, warn};

use super::{BootstrapPhase, BusyGuard, Caller, Feature, Persistence};
use crate::codec::OutlineCodec;
use crate::error::{PersistError, Result};
use crate::events::{PersistEvent, now_ms};
use crate::source::DocumentSource;

impl<C: OutlineCodec> Persistence<C> {
    /// Probe optional features, then load the first available source.
    ///
    /// Cascade order: app-storage file, then draft (prompting), then empty.
    /// Probe failures disable the feature; load failures fall through.
    /// Holds the busy flag throughout, so UI actions issued meanwhile are rejected.
    pub async fn initialize(&self) -> Result<()> {
        self.update(|s| {
            if s.phase != BootstrapPhase::Idle {
                return Err(PersistError::AlreadyInitialized);
            }
            if s.busy {
                return Err(PersistError::Busy(super::Operation::Initialize));
            }
            s.busy = true;
            s.phase = BootstrapPhase::ProbingFeatures;
            Ok(())
        })?;
        let _busy = BusyGuard {
            owner: self,
            armed: true,
        };
        info!("Initializing persistence");
        self.emit_state();

        self.probe_features().await;

        let has_persistent = self.update(|s| s.persistent.is_some());
        let mut loaded = false;

        if has_persistent {
            self.enter(BootstrapPhase::LoadingPersistent);
            match self.load_persistent(Caller::Bootstrap).await {
                Ok(()) => loaded = true,
                Err(e) => warn!("App storage load failed, trying draft: {}", e),
            }
        }

        if !loaded {
            self.enter(BootstrapPhase::LoadingDraft);
            match self.load_draft_as(false, Caller::Bootstrap).await {
                Ok(found) => loaded = found,
                Err(e) => warn!("Draft load failed: {}", e),
            }
        }

        self.enter(BootstrapPhase::Finalizing);
        if !loaded {
            info!("No stored content, starting empty");
            self.update(|s| s.reset(DocumentSource::Empty));
        }

        self.enter(BootstrapPhase::Ready);
        info!("Persistence ready (source: {})", self.source());
        Ok(())
    }

    fn enter(&self, phase: BootstrapPhase) {
        debug!("Bootstrap phase: {:?}", phase);
        self.update(|s| s.phase = phase);
    }

    async fn probe_features(&self) {
        let channel = match self.platform.open_save_channel() {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Background worker unavailable: {}", e);
                None
            }
        };
        self.announce(Feature::Worker, channel.is_some());

        let picker = self.platform.file_picker();
        self.announce(Feature::DirectAccess, picker.is_some());

        let root = match self.platform.sandbox_root().await {
            Ok(root) => root,
            Err(e) => {
                warn!("App storage unavailable: {}", e);
                None
            }
        };
        self.announce(Feature::Sandbox, root.is_some());

        let file_name = &self.config.sandbox_file_name;
        let persistent = match &root {
            Some(root) => match root.lookup(file_name).await {
                Ok(Some(file)) => {
                    info!("Found app storage file {}", file_name);
                    Some(file)
                }
                Ok(None) => {
                    debug!("App storage file {} not found", file_name);
                    None
                }
                Err(e) => {
                    warn!("Checking for app storage file failed: {}", e);
                    None
                }
            },
            None => None,
        };

        self.update(|s| {
            s.channel = channel;
            s.picker = picker;
            s.sandbox_root = root;
            s.persistent = persistent;
        });
    }

    fn announce(&self, feature: Feature, available: bool) {
        if available {
            info!("Feature available: {}", feature);
        } else {
            warn!("Feature not available: {}", feature);
        }
        self.emit(PersistEvent::FeatureAvailable {
            feature,
            available,
            timestamp: now_ms(),
        });
    }
}
