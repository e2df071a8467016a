//! In-memory collaborators for testing.
//!
//! Every backend records what was done to it so tests can assert on side
//! effects (prompts shown, requests posted, drafts written) without a host.
//! Failures are injected per collaborator.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::backend::{
    AccessMode, DirectHandle, DraftStore, ExportFile, Exporter, FilePicker, PermissionState,
    Platform, SandboxFile, SandboxStorage, SaveChannel, TimerService, TimerToken, UiHost,
    WritableFile,
};
use crate::channel::{SaveRequest, SaveResponse};
use crate::error::{ChannelError, ProbeError, StorageError};
use crate::persistence::Collaborators;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Direct file handles
// ============================================================================

#[derive(Default)]
struct HandleState {
    content: Mutex<String>,
    /// (query answer, request answer); `None` means no permission API.
    permissions: Option<(PermissionState, PermissionState)>,
    permission_error: bool,
    permission_requests: AtomicUsize,
    read_error: Mutex<Option<StorageError>>,
    write_error: Mutex<Option<StorageError>>,
    closes: AtomicUsize,
    aborts: AtomicUsize,
}

/// Direct file handle backed by a string.
///
/// Clones share content, so a test can keep one clone and hand the other to
/// a `MemoryPicker`.
#[derive(Clone)]
pub struct MemoryDirectHandle {
    name: String,
    state: Arc<HandleState>,
}

impl MemoryDirectHandle {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let state = HandleState {
            content: Mutex::new(content.into()),
            ..Default::default()
        };
        Self {
            name: name.into(),
            state: Arc::new(state),
        }
    }

    /// Expose a permission API answering `query` then `request`.
    pub fn with_permissions(self, query: PermissionState, request: PermissionState) -> Self {
        self.rebuild(|state| state.permissions = Some((query, request)))
    }

    /// Expose a permission API whose calls fail.
    pub fn with_failing_permissions(self) -> Self {
        self.rebuild(|state| {
            state.permissions = Some((PermissionState::Prompt, PermissionState::Prompt));
            state.permission_error = true;
        })
    }

    fn rebuild(self, f: impl FnOnce(&mut HandleState)) -> Self {
        let mut state = HandleState {
            content: Mutex::new(lock(&self.state.content).clone()),
            permissions: self.state.permissions,
            permission_error: self.state.permission_error,
            ..Default::default()
        };
        f(&mut state);
        Self {
            name: self.name,
            state: Arc::new(state),
        }
    }

    pub fn content(&self) -> String {
        lock(&self.state.content).clone()
    }

    pub fn fail_reads(&self, error: StorageError) {
        *lock(&self.state.read_error) = Some(error);
    }

    pub fn fail_writes(&self, error: StorageError) {
        *lock(&self.state.write_error) = Some(error);
    }

    pub fn permission_requests(&self) -> usize {
        self.state.permission_requests.load(Ordering::SeqCst)
    }

    /// Writable targets committed.
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Writable targets discarded.
    pub fn aborts(&self) -> usize {
        self.state.aborts.load(Ordering::SeqCst)
    }
}

struct MemoryWritable {
    state: Arc<HandleState>,
    buffer: String,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl WritableFile for MemoryWritable {
    async fn write(&mut self, content: &str) -> Result<(), StorageError> {
        if let Some(err) = lock(&self.state.write_error).clone() {
            return Err(err);
        }
        self.buffer.push_str(content);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), StorageError> {
        *lock(&self.state.content) = self.buffer;
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), StorageError> {
        self.state.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl DirectHandle for MemoryDirectHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn read_text(&self) -> Result<String, StorageError> {
        if let Some(err) = lock(&self.state.read_error).clone() {
            return Err(err);
        }
        Ok(self.content())
    }

    async fn create_writable(&self) -> Result<Box<dyn WritableFile>, StorageError> {
        Ok(Box::new(MemoryWritable {
            state: Arc::clone(&self.state),
            buffer: String::new(),
        }))
    }

    fn supports_permissions(&self) -> bool {
        self.state.permissions.is_some()
    }

    async fn query_permission(&self, _mode: AccessMode) -> Result<PermissionState, StorageError> {
        if self.state.permission_error {
            return Err(StorageError::PermissionDenied("query failed".into()));
        }
        Ok(self
            .state
            .permissions
            .map(|(query, _)| query)
            .unwrap_or(PermissionState::Granted))
    }

    async fn request_permission(&self, _mode: AccessMode) -> Result<PermissionState, StorageError> {
        self.state.permission_requests.fetch_add(1, Ordering::SeqCst);
        if self.state.permission_error {
            return Err(StorageError::PermissionDenied("request failed".into()));
        }
        Ok(self
            .state
            .permissions
            .map(|(_, request)| request)
            .unwrap_or(PermissionState::Granted))
    }
}

enum Pick {
    Handle(Arc<dyn DirectHandle>),
    Cancel,
    Fail(StorageError),
}

/// File picker answering from a script; an empty script cancels.
#[derive(Default)]
pub struct MemoryPicker {
    script: Mutex<VecDeque<Pick>>,
}

impl MemoryPicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_handle(&self, handle: MemoryDirectHandle) {
        lock(&self.script).push_back(Pick::Handle(Arc::new(handle)));
    }

    pub fn push_cancel(&self) {
        lock(&self.script).push_back(Pick::Cancel);
    }

    pub fn push_error(&self, error: StorageError) {
        lock(&self.script).push_back(Pick::Fail(error));
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl FilePicker for MemoryPicker {
    async fn pick_file(&self) -> Result<Option<Arc<dyn DirectHandle>>, StorageError> {
        match lock(&self.script).pop_front() {
            Some(Pick::Handle(handle)) => Ok(Some(handle)),
            Some(Pick::Fail(err)) => Err(err),
            Some(Pick::Cancel) | None => Ok(None),
        }
    }
}

// ============================================================================
// App storage
// ============================================================================

/// A file inside `MemorySandbox`. Reads fail with `NotFound` once removed.
pub struct MemorySandboxFile {
    name: String,
    sandbox: Arc<SandboxState>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SandboxFile for MemorySandboxFile {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn read_text(&self) -> Result<String, StorageError> {
        if let Some(err) = lock(&self.sandbox.read_error).clone() {
            return Err(err);
        }
        lock(&self.sandbox.files)
            .get(&self.name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(self.name.clone()))
    }
}

#[derive(Default)]
struct SandboxState {
    files: Mutex<HashMap<String, String>>,
    create_error: Mutex<Option<StorageError>>,
    lookup_error: Mutex<Option<StorageError>>,
    read_error: Mutex<Option<StorageError>>,
}

/// App-private storage root.
#[derive(Default)]
pub struct MemorySandbox {
    state: Arc<SandboxState>,
}

impl MemorySandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, name: &str, content: impl Into<String>) {
        lock(&self.state.files).insert(name.to_string(), content.into());
    }

    pub fn remove(&self, name: &str) {
        lock(&self.state.files).remove(name);
    }

    pub fn content(&self, name: &str) -> Option<String> {
        lock(&self.state.files).get(name).cloned()
    }

    pub fn fail_create(&self, error: StorageError) {
        *lock(&self.state.create_error) = Some(error);
    }

    pub fn fail_lookup(&self, error: StorageError) {
        *lock(&self.state.lookup_error) = Some(error);
    }

    pub fn fail_reads(&self, error: StorageError) {
        *lock(&self.state.read_error) = Some(error);
    }

    fn file(&self, name: &str) -> Arc<dyn SandboxFile> {
        Arc::new(MemorySandboxFile {
            name: name.to_string(),
            sandbox: Arc::clone(&self.state),
        })
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl SandboxStorage for MemorySandbox {
    async fn lookup(&self, name: &str) -> Result<Option<Arc<dyn SandboxFile>>, StorageError> {
        if let Some(err) = lock(&self.state.lookup_error).clone() {
            return Err(err);
        }
        let exists = lock(&self.state.files).contains_key(name);
        Ok(exists.then(|| self.file(name)))
    }

    async fn create(&self, name: &str) -> Result<Arc<dyn SandboxFile>, StorageError> {
        if let Some(err) = lock(&self.state.create_error).clone() {
            return Err(err);
        }
        lock(&self.state.files).entry(name.to_string()).or_default();
        Ok(self.file(name))
    }
}

/// Save channel that records requests instead of delivering them.
///
/// Tests play the worker: `complete_next` performs the write against the
/// sandbox and returns the response to feed back to the orchestrator.
pub struct MemoryChannel {
    sandbox: Arc<MemorySandbox>,
    posted: Mutex<VecDeque<SaveRequest>>,
    closed: AtomicBool,
}

impl MemoryChannel {
    pub fn new(sandbox: Arc<MemorySandbox>) -> Self {
        Self {
            sandbox,
            posted: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Requests posted but not yet completed.
    pub fn in_flight(&self) -> Vec<SaveRequest> {
        lock(&self.posted).iter().cloned().collect()
    }

    /// Take the oldest request, write it, and return the success response.
    pub fn complete_next(&self) -> Option<SaveResponse> {
        let request = lock(&self.posted).pop_front()?;
        self.sandbox.write(&request.file_name, request.content.clone());
        Some(request.succeeded())
    }

    /// Take the oldest request and return a failure response without writing.
    pub fn fail_next(&self, error: &str) -> Option<SaveResponse> {
        let request = lock(&self.posted).pop_front()?;
        Some(request.failed(error))
    }
}

impl SaveChannel for MemoryChannel {
    fn post(&self, request: SaveRequest) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        lock(&self.posted).push_back(request);
        Ok(())
    }
}

// ============================================================================
// Drafts, export, UI, timers
// ============================================================================

/// Key/value draft store with an optional byte quota.
#[derive(Default)]
pub struct MemoryDraftStore {
    values: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
    read_error: Mutex<Option<StorageError>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: usize) -> Self {
        Self {
            quota: Some(bytes),
            ..Default::default()
        }
    }

    pub fn insert(&self, key: &str, value: impl Into<String>) {
        lock(&self.values).insert(key.to_string(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    pub fn fail_reads(&self, error: StorageError) {
        *lock(&self.read_error) = Some(error);
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl DraftStore for MemoryDraftStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if let Some(err) = lock(&self.read_error).clone() {
            return Err(err);
        }
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.quota.is_some_and(|quota| value.len() > quota) {
            return Err(StorageError::QuotaExceeded);
        }
        self.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// Exporter that keeps every exported file.
#[derive(Default)]
pub struct MemoryExporter {
    exported: Mutex<Vec<ExportFile>>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exported(&self) -> Vec<ExportFile> {
        lock(&self.exported).clone()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Exporter for MemoryExporter {
    async fn export(&self, file: ExportFile) -> Result<(), StorageError> {
        lock(&self.exported).push(file);
        Ok(())
    }
}

/// UI host with scripted confirmation answers.
///
/// Answers are consumed in order; once exhausted every prompt is accepted.
#[derive(Default)]
pub struct ScriptedUi {
    answers: Mutex<VecDeque<bool>>,
    prompts: Mutex<Vec<String>>,
    alerts: Mutex<Vec<String>>,
    focus_requests: AtomicUsize,
}

impl ScriptedUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, accept: bool) {
        lock(&self.answers).push_back(accept);
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn alerts(&self) -> Vec<String> {
        lock(&self.alerts).clone()
    }

    pub fn focus_requests(&self) -> usize {
        self.focus_requests.load(Ordering::SeqCst)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl UiHost for ScriptedUi {
    async fn confirm(&self, message: &str) -> bool {
        lock(&self.prompts).push(message.to_string());
        lock(&self.answers).pop_front().unwrap_or(true)
    }

    fn alert(&self, message: &str) {
        lock(&self.alerts).push(message.to_string());
    }

    fn focus_first_item(&self) {
        self.focus_requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Timer service that only records; tests fire tokens by hand.
#[derive(Default)]
pub struct ManualTimers {
    scheduled: Mutex<Vec<(TimerToken, Duration)>>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<(TimerToken, Duration)> {
        lock(&self.scheduled).clone()
    }

    /// Most recently scheduled token.
    pub fn last(&self) -> Option<TimerToken> {
        lock(&self.scheduled).last().map(|(token, _)| *token)
    }
}

impl TimerService for ManualTimers {
    fn schedule(&self, token: TimerToken, after: Duration) {
        lock(&self.scheduled).push((token, after));
    }
}

// ============================================================================
// Platform and host bundle
// ============================================================================

/// Platform whose capabilities are chosen by the test.
pub struct MemoryPlatform {
    channel: Option<Arc<MemoryChannel>>,
    picker: Option<Arc<MemoryPicker>>,
    sandbox: Option<Arc<MemorySandbox>>,
    fail_worker_probe: bool,
    fail_sandbox_probe: bool,
}

impl MemoryPlatform {
    /// Worker, direct access and app storage all available.
    pub fn full() -> Self {
        let sandbox = Arc::new(MemorySandbox::new());
        Self {
            channel: Some(Arc::new(MemoryChannel::new(Arc::clone(&sandbox)))),
            picker: Some(Arc::new(MemoryPicker::new())),
            sandbox: Some(sandbox),
            fail_worker_probe: false,
            fail_sandbox_probe: false,
        }
    }

    /// No optional capability.
    pub fn bare() -> Self {
        Self {
            channel: None,
            picker: None,
            sandbox: None,
            fail_worker_probe: false,
            fail_sandbox_probe: false,
        }
    }

    pub fn without_worker(mut self) -> Self {
        self.channel = None;
        self
    }

    pub fn without_direct_access(mut self) -> Self {
        self.picker = None;
        self
    }

    pub fn with_failing_probes(mut self) -> Self {
        self.fail_worker_probe = true;
        self.fail_sandbox_probe = true;
        self
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Platform for MemoryPlatform {
    fn open_save_channel(&self) -> Result<Option<Arc<dyn SaveChannel>>, ProbeError> {
        if self.fail_worker_probe {
            return Err(ProbeError::Failed("worker script failed to load".into()));
        }
        Ok(self
            .channel
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn SaveChannel>))
    }

    fn file_picker(&self) -> Option<Arc<dyn FilePicker>> {
        self.picker
            .as_ref()
            .map(|p| Arc::clone(p) as Arc<dyn FilePicker>)
    }

    async fn sandbox_root(&self) -> Result<Option<Arc<dyn SandboxStorage>>, ProbeError> {
        if self.fail_sandbox_probe {
            return Err(ProbeError::Failed("storage root rejected".into()));
        }
        Ok(self
            .sandbox
            .as_ref()
            .map(|s| Arc::clone(s) as Arc<dyn SandboxStorage>))
    }
}

/// Every in-memory collaborator, kept as concrete types for inspection.
pub struct MemoryHost {
    pub platform: Arc<MemoryPlatform>,
    pub ui: Arc<ScriptedUi>,
    pub drafts: Arc<MemoryDraftStore>,
    pub timers: Arc<ManualTimers>,
    pub exporter: Arc<MemoryExporter>,
}

impl MemoryHost {
    pub fn new(platform: MemoryPlatform) -> Self {
        Self::with_drafts(platform, MemoryDraftStore::new())
    }

    pub fn with_drafts(platform: MemoryPlatform, drafts: MemoryDraftStore) -> Self {
        Self {
            platform: Arc::new(platform),
            ui: Arc::new(ScriptedUi::new()),
            drafts: Arc::new(drafts),
            timers: Arc::new(ManualTimers::new()),
            exporter: Arc::new(MemoryExporter::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            platform: Arc::clone(&self.platform) as Arc<dyn Platform>,
            ui: Arc::clone(&self.ui) as Arc<dyn UiHost>,
            drafts: Arc::clone(&self.drafts) as Arc<dyn DraftStore>,
            timers: Arc::clone(&self.timers) as Arc<dyn TimerService>,
            exporter: Arc::clone(&self.exporter) as Arc<dyn Exporter>,
        }
    }

    /// The app-storage root, if the platform has one.
    pub fn sandbox(&self) -> Option<&Arc<MemorySandbox>> {
        self.platform.sandbox.as_ref()
    }

    pub fn channel(&self) -> Option<&Arc<MemoryChannel>> {
        self.platform.channel.as_ref()
    }

    pub fn picker(&self) -> Option<&Arc<MemoryPicker>> {
        self.platform.picker.as_ref()
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new(MemoryPlatform::full())
    }
}
