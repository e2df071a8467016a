//! Wires native collaborators to an orchestrator and pumps their messages.
//!
//! The save worker and the timer service both report back through one
//! unbounded channel; the host loop drains it and feeds each message to the
//! orchestrator (`handle_channel_message` / `on_timer`).

use anyhow::{Context, Result};
use persist_core::{
    Collaborators, OutlineCodec, Persistence, SaveResponse, TimerToken, UiHost,
};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::NativeConfig;
use crate::native_fs::{DirectoryExporter, NativeDraftStore};
use crate::platform::{NativePlatform, QueuedPicker};
use crate::timers::TokioTimers;
use crate::ui::HeadlessUi;

/// Message delivered to the host loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    /// Completion from the background save worker.
    Save(SaveResponse),
    /// A scheduled timer fired.
    Timer(TimerToken),
}

pub struct NativeHost {
    config: NativeConfig,
    runtime: Handle,
    ui: Arc<HeadlessUi>,
    picker: Arc<QueuedPicker>,
    sender: mpsc::UnboundedSender<HostMessage>,
    messages: mpsc::UnboundedReceiver<HostMessage>,
}

impl NativeHost {
    /// Must be called from within a tokio runtime.
    pub fn new(config: NativeConfig) -> Result<Self> {
        config.validate().context("Invalid native config")?;
        let runtime =
            Handle::try_current().context("NativeHost requires a running tokio runtime")?;
        let (sender, messages) = mpsc::unbounded_channel();

        Ok(Self {
            ui: Arc::new(HeadlessUi::new(config.auto_confirm)),
            picker: Arc::new(QueuedPicker::new()),
            config,
            runtime,
            sender,
            messages,
        })
    }

    pub fn config(&self) -> &NativeConfig {
        &self.config
    }

    pub fn ui(&self) -> &Arc<HeadlessUi> {
        &self.ui
    }

    /// Queue of files handed out by "open".
    pub fn picker(&self) -> &Arc<QueuedPicker> {
        &self.picker
    }

    pub fn collaborators(&self) -> Collaborators {
        let ui: Arc<dyn UiHost> = self.ui.clone();
        Collaborators {
            platform: Arc::new(NativePlatform {
                storage_dir: self.config.app_storage_dir.clone(),
                worker: self.config.worker,
                runtime: self.runtime.clone(),
                messages: self.sender.clone(),
                picker: Arc::clone(&self.picker),
            }),
            ui,
            drafts: Arc::new(NativeDraftStore::new(
                &self.config.draft_path,
                self.config.draft_quota_bytes,
            )),
            timers: Arc::new(TokioTimers::new(self.runtime.clone(), self.sender.clone())),
            exporter: Arc::new(DirectoryExporter::new(&self.config.export_dir)),
        }
    }

    /// Build an orchestrator over this host's collaborators.
    pub fn persistence<C: OutlineCodec>(&self, codec: C) -> Persistence<C> {
        Persistence::new(self.config.persist.clone(), codec, self.collaborators())
    }

    /// Wait for the next message and hand it to `persistence`.
    ///
    /// Returns the message that was dispatched.
    pub async fn pump<C: OutlineCodec>(
        &mut self,
        persistence: &Persistence<C>,
    ) -> Option<HostMessage> {
        let message = self.messages.recv().await?;
        dispatch(persistence, message.clone()).await;
        Some(message)
    }

    /// Dispatch messages until `shutdown` resolves.
    pub async fn run<C, F>(&mut self, persistence: &Persistence<C>, shutdown: F)
    where
        C: OutlineCodec,
        F: Future<Output = ()>,
    {
        info!("Host loop running");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Host loop shutting down");
                    break;
                }
                message = self.messages.recv() => match message {
                    Some(message) => dispatch(persistence, message).await,
                    None => break,
                }
            }
        }
    }
}

async fn dispatch<C: OutlineCodec>(persistence: &Persistence<C>, message: HostMessage) {
    match message {
        HostMessage::Save(response) => {
            debug!("Worker response: {:?}", response);
            persistence.handle_channel_message(&response);
        }
        HostMessage::Timer(token) => persistence.on_timer(token).await,
    }
}
