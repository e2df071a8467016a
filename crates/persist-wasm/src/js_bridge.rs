//! JavaScript bridges for the browser host.
//!
//! File System Access handles, the OPFS root and `localStorage` are driven by
//! calling their methods through `js_sys::Reflect`. Everything the page owns
//! (dialogs, the save worker, downloads, the editor document) is reached
//! through callbacks supplied on `JsHostBridge` and `JsCodec`.

use async_trait::async_trait;
use persist_core::{
    AccessMode, ChannelError, DirectHandle, DraftStore, ExportFile, Exporter, FilePicker,
    OutlineCodec, ParseError, PermissionState, Platform, ProbeError, SandboxFile,
    SandboxStorage, SaveChannel, SaveRequest, StorageError, UiHost, WritableFile,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Call helpers
// ============================================================================

/// Await `value` if it is a Promise, otherwise return it as is.
async fn settle(value: JsValue) -> std::result::Result<JsValue, JsValue> {
    match value.dyn_into::<js_sys::Promise>() {
        Ok(promise) => JsFuture::from(promise).await,
        Err(value) => Ok(value),
    }
}

/// Call a JS function and await its (possibly Promise) result.
async fn call_js_async(
    func: &js_sys::Function,
    args: &[JsValue],
) -> std::result::Result<JsValue, JsValue> {
    let js_args = js_sys::Array::new();
    for arg in args {
        js_args.push(arg);
    }
    settle(func.apply(&JsValue::NULL, &js_args)?).await
}

/// Call `target[name](...args)` and await the result.
async fn call_method_async(
    target: &JsValue,
    name: &str,
    args: &[JsValue],
) -> std::result::Result<JsValue, JsValue> {
    let method: js_sys::Function = js_sys::Reflect::get(target, &name.into())?
        .dyn_into()
        .map_err(|_| JsValue::from_str(&format!("{name} is not a function")))?;
    let js_args = js_sys::Array::new();
    for arg in args {
        js_args.push(arg);
    }
    settle(method.apply(target, &js_args)?).await
}

fn has_method(target: &JsValue, name: &str) -> bool {
    js_sys::Reflect::get(target, &name.into())
        .map(|v| v.is_function())
        .unwrap_or(false)
}

fn js_error_name(err: &JsValue) -> Option<String> {
    js_sys::Reflect::get(err, &"name".into())
        .ok()
        .and_then(|v| v.as_string())
}

pub(crate) fn js_error_message(err: &JsValue) -> String {
    err.as_string()
        .or_else(|| {
            js_sys::Reflect::get(err, &"message".into())
                .ok()
                .and_then(|v| v.as_string())
        })
        .unwrap_or_else(|| format!("{:?}", err))
}

/// Convert a DOMException (or thrown value) to a storage error.
fn js_err_to_storage_err(err: JsValue) -> StorageError {
    let msg = js_error_message(&err);
    match js_error_name(&err).as_deref() {
        Some("NotFoundError") => StorageError::NotFound(msg),
        Some("QuotaExceededError") => StorageError::QuotaExceeded,
        Some("NotAllowedError") | Some("SecurityError") => StorageError::PermissionDenied(msg),
        _ if msg.contains("not found") => StorageError::NotFound(msg),
        _ => StorageError::Io(msg),
    }
}

fn options(entries: &[(&str, JsValue)]) -> JsValue {
    let object = js_sys::Object::new();
    for (key, value) in entries {
        let _ = js_sys::Reflect::set(&object, &(*key).into(), value);
    }
    object.into()
}

/// Read a `FileSystemFileHandle`'s content as text.
async fn read_handle_text(handle: &JsValue) -> Result<String> {
    let file = call_method_async(handle, "getFile", &[])
        .await
        .map_err(js_err_to_storage_err)?;
    let text = call_method_async(&file, "text", &[])
        .await
        .map_err(js_err_to_storage_err)?;
    text.as_string()
        .ok_or_else(|| StorageError::Io("File.text() did not return a string".to_string()))
}

fn handle_name(handle: &JsValue) -> String {
    js_sys::Reflect::get(handle, &"name".into())
        .ok()
        .and_then(|v| v.as_string())
        .unwrap_or_default()
}

// ============================================================================
// Direct file handles
// ============================================================================

/// A `FileSystemFileHandle` granted by the file picker.
pub struct JsDirectHandle {
    handle: JsValue,
}

impl JsDirectHandle {
    pub fn new(handle: JsValue) -> Self {
        Self { handle }
    }

    async fn permission(&self, method: &str, mode: AccessMode) -> Result<PermissionState> {
        let descriptor = options(&[("mode", mode.as_str().into())]);
        let state = call_method_async(&self.handle, method, &[descriptor])
            .await
            .map_err(js_err_to_storage_err)?;
        match state.as_string().as_deref() {
            Some("granted") => Ok(PermissionState::Granted),
            Some("denied") => Ok(PermissionState::Denied),
            Some("prompt") => Ok(PermissionState::Prompt),
            other => Err(StorageError::Io(format!(
                "Unexpected permission state: {other:?}"
            ))),
        }
    }
}

#[async_trait(?Send)]
impl DirectHandle for JsDirectHandle {
    fn name(&self) -> String {
        handle_name(&self.handle)
    }

    async fn read_text(&self) -> Result<String> {
        read_handle_text(&self.handle).await
    }

    async fn create_writable(&self) -> Result<Box<dyn WritableFile>> {
        let stream = call_method_async(&self.handle, "createWritable", &[])
            .await
            .map_err(js_err_to_storage_err)?;
        Ok(Box::new(JsWritable { stream }))
    }

    fn supports_permissions(&self) -> bool {
        has_method(&self.handle, "queryPermission") && has_method(&self.handle, "requestPermission")
    }

    async fn query_permission(&self, mode: AccessMode) -> Result<PermissionState> {
        self.permission("queryPermission", mode).await
    }

    async fn request_permission(&self, mode: AccessMode) -> Result<PermissionState> {
        self.permission("requestPermission", mode).await
    }
}

/// A `FileSystemWritableFileStream`.
struct JsWritable {
    stream: JsValue,
}

#[async_trait(?Send)]
impl WritableFile for JsWritable {
    async fn write(&mut self, content: &str) -> Result<()> {
        call_method_async(&self.stream, "write", &[content.into()])
            .await
            .map_err(js_err_to_storage_err)?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        call_method_async(&self.stream, "close", &[])
            .await
            .map_err(js_err_to_storage_err)?;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        call_method_async(&self.stream, "abort", &[])
            .await
            .map_err(js_err_to_storage_err)?;
        Ok(())
    }
}

/// Calls the page's `showOpenFilePicker` wrapper.
///
/// The callback resolves to a file handle, or null when dismissed.
struct JsPicker {
    pick_fn: js_sys::Function,
}

#[async_trait(?Send)]
impl FilePicker for JsPicker {
    async fn pick_file(&self) -> Result<Option<Arc<dyn DirectHandle>>> {
        match call_js_async(&self.pick_fn, &[]).await {
            Ok(handle) if handle.is_null() || handle.is_undefined() => Ok(None),
            Ok(handle) => {
                let handle: Arc<dyn DirectHandle> = Arc::new(JsDirectHandle::new(handle));
                Ok(Some(handle))
            }
            Err(err) if js_error_name(&err).as_deref() == Some("AbortError") => Ok(None),
            Err(err) => Err(js_err_to_storage_err(err)),
        }
    }
}

// ============================================================================
// OPFS
// ============================================================================

/// The OPFS root `FileSystemDirectoryHandle`.
struct JsSandboxRoot {
    dir: JsValue,
}

#[async_trait(?Send)]
impl SandboxStorage for JsSandboxRoot {
    async fn lookup(&self, name: &str) -> Result<Option<Arc<dyn SandboxFile>>> {
        match call_method_async(&self.dir, "getFileHandle", &[name.into()]).await {
            Ok(handle) => {
                let file: Arc<dyn SandboxFile> = Arc::new(JsSandboxFile { handle });
                Ok(Some(file))
            }
            Err(err) => match js_err_to_storage_err(err) {
                StorageError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn create(&self, name: &str) -> Result<Arc<dyn SandboxFile>> {
        let create = options(&[("create", JsValue::TRUE)]);
        let handle = call_method_async(&self.dir, "getFileHandle", &[name.into(), create])
            .await
            .map_err(js_err_to_storage_err)?;
        Ok(Arc::new(JsSandboxFile { handle }))
    }
}

struct JsSandboxFile {
    handle: JsValue,
}

#[async_trait(?Send)]
impl SandboxFile for JsSandboxFile {
    fn name(&self) -> String {
        handle_name(&self.handle)
    }

    async fn read_text(&self) -> Result<String> {
        read_handle_text(&self.handle).await
    }
}

// ============================================================================
// localStorage
// ============================================================================

/// A `Storage` object (normally `window.localStorage`).
struct JsDraftStore {
    storage: JsValue,
}

#[async_trait(?Send)]
impl DraftStore for JsDraftStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = call_method_async(&self.storage, "getItem", &[key.into()])
            .await
            .map_err(js_err_to_storage_err)?;
        Ok(value.as_string())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        call_method_async(&self.storage, "setItem", &[key.into(), value.into()])
            .await
            .map_err(js_err_to_storage_err)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        call_method_async(&self.storage, "removeItem", &[key.into()])
            .await
            .map_err(js_err_to_storage_err)?;
        Ok(())
    }
}

// ============================================================================
// Save worker
// ============================================================================

/// Posts requests to the save worker. Responses come back through
/// `WasmPersistence.handleWorkerMessage`.
struct JsSaveChannel {
    post_fn: js_sys::Function,
}

impl SaveChannel for JsSaveChannel {
    fn post(&self, request: SaveRequest) -> std::result::Result<(), ChannelError> {
        let message = request
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|e| ChannelError::Post(e.to_string()))?;
        self.post_fn
            .call1(&JsValue::NULL, &message)
            .map_err(|e| ChannelError::Post(js_error_message(&e)))?;
        Ok(())
    }
}

// ============================================================================
// UI and export
// ============================================================================

struct JsUi {
    confirm_fn: js_sys::Function,
    alert_fn: js_sys::Function,
    focus_fn: js_sys::Function,
}

#[async_trait(?Send)]
impl UiHost for JsUi {
    async fn confirm(&self, message: &str) -> bool {
        match call_js_async(&self.confirm_fn, &[message.into()]).await {
            Ok(answer) => answer.is_truthy(),
            Err(err) => {
                warn!("confirm callback failed: {}", js_error_message(&err));
                false
            }
        }
    }

    fn alert(&self, message: &str) {
        if let Err(err) = self.alert_fn.call1(&JsValue::NULL, &message.into()) {
            warn!("alert callback failed: {}", js_error_message(&err));
        }
    }

    fn focus_first_item(&self) {
        if let Err(err) = self.focus_fn.call0(&JsValue::NULL) {
            debug!("focus callback failed: {}", js_error_message(&err));
        }
    }
}

struct JsExporter {
    export_fn: js_sys::Function,
}

#[async_trait(?Send)]
impl Exporter for JsExporter {
    async fn export(&self, file: ExportFile) -> Result<()> {
        let descriptor = options(&[
            ("name", file.name.into()),
            ("mimeType", file.mime_type.into()),
            ("content", file.content.into()),
        ]);
        call_js_async(&self.export_fn, &[descriptor])
            .await
            .map_err(js_err_to_storage_err)?;
        Ok(())
    }
}

// ============================================================================
// Host bridge
// ============================================================================

/// Page-provided callbacks and browser objects.
///
/// # Example (TypeScript side)
///
/// ```typescript
/// const bridge = new JsHostBridge(
///   async (msg) => window.confirm(msg),
///   (msg) => window.alert(msg),
///   () => editor.focusFirstItem(),
///   async (file) => download(file),
///   window.localStorage,
/// )
///   .withFilePicker(async () => (await showOpenFilePicker())[0] ?? null)
///   .withSandboxRoot(() => navigator.storage.getDirectory())
///   .withSaveWorker((msg) => worker.postMessage(msg));
/// ```
#[wasm_bindgen]
pub struct JsHostBridge {
    confirm_fn: js_sys::Function,
    alert_fn: js_sys::Function,
    focus_fn: js_sys::Function,
    export_fn: js_sys::Function,
    storage: JsValue,
    pick_fn: Option<js_sys::Function>,
    sandbox_fn: Option<js_sys::Function>,
    post_fn: Option<js_sys::Function>,
}

#[wasm_bindgen]
impl JsHostBridge {
    #[wasm_bindgen(constructor)]
    pub fn new(
        confirm_fn: js_sys::Function,
        alert_fn: js_sys::Function,
        focus_fn: js_sys::Function,
        export_fn: js_sys::Function,
        storage: JsValue,
    ) -> Self {
        Self {
            confirm_fn,
            alert_fn,
            focus_fn,
            export_fn,
            storage,
            pick_fn: None,
            sandbox_fn: None,
            post_fn: None,
        }
    }

    /// Enable direct file editing. The callback resolves to a file handle or null.
    #[wasm_bindgen(js_name = withFilePicker)]
    pub fn with_file_picker(mut self, pick_fn: js_sys::Function) -> Self {
        self.pick_fn = Some(pick_fn);
        self
    }

    /// Enable app storage. The callback resolves to the OPFS root directory.
    #[wasm_bindgen(js_name = withSandboxRoot)]
    pub fn with_sandbox_root(mut self, sandbox_fn: js_sys::Function) -> Self {
        self.sandbox_fn = Some(sandbox_fn);
        self
    }

    /// Enable background saves. The callback posts a message to the worker.
    #[wasm_bindgen(js_name = withSaveWorker)]
    pub fn with_save_worker(mut self, post_fn: js_sys::Function) -> Self {
        self.post_fn = Some(post_fn);
        self
    }
}

impl JsHostBridge {
    pub(crate) fn ui(&self) -> Arc<dyn UiHost> {
        Arc::new(JsUi {
            confirm_fn: self.confirm_fn.clone(),
            alert_fn: self.alert_fn.clone(),
            focus_fn: self.focus_fn.clone(),
        })
    }

    pub(crate) fn drafts(&self) -> Arc<dyn DraftStore> {
        Arc::new(JsDraftStore {
            storage: self.storage.clone(),
        })
    }

    pub(crate) fn exporter(&self) -> Arc<dyn Exporter> {
        Arc::new(JsExporter {
            export_fn: self.export_fn.clone(),
        })
    }

    pub(crate) fn platform(&self) -> Arc<dyn Platform> {
        Arc::new(JsPlatform {
            pick_fn: self.pick_fn.clone(),
            sandbox_fn: self.sandbox_fn.clone(),
            post_fn: self.post_fn.clone(),
        })
    }
}

struct JsPlatform {
    pick_fn: Option<js_sys::Function>,
    sandbox_fn: Option<js_sys::Function>,
    post_fn: Option<js_sys::Function>,
}

#[async_trait(?Send)]
impl Platform for JsPlatform {
    fn open_save_channel(&self) -> std::result::Result<Option<Arc<dyn SaveChannel>>, ProbeError> {
        Ok(self.post_fn.clone().map(|post_fn| {
            let channel: Arc<dyn SaveChannel> = Arc::new(JsSaveChannel { post_fn });
            channel
        }))
    }

    fn file_picker(&self) -> Option<Arc<dyn FilePicker>> {
        self.pick_fn.clone().map(|pick_fn| {
            let picker: Arc<dyn FilePicker> = Arc::new(JsPicker { pick_fn });
            picker
        })
    }

    async fn sandbox_root(
        &self,
    ) -> std::result::Result<Option<Arc<dyn SandboxStorage>>, ProbeError> {
        let Some(sandbox_fn) = &self.sandbox_fn else {
            return Ok(None);
        };
        let dir = call_js_async(sandbox_fn, &[])
            .await
            .map_err(|e| ProbeError::Failed(js_error_message(&e)))?;
        if dir.is_null() || dir.is_undefined() {
            return Ok(None);
        }
        let root: Arc<dyn SandboxStorage> = Arc::new(JsSandboxRoot { dir });
        Ok(Some(root))
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Codec implemented by the page's editor.
///
/// Documents stay opaque JS values; parsing and serializing are delegated to
/// the callbacks.
#[wasm_bindgen]
pub struct JsCodec {
    parse_fn: js_sys::Function,
    serialize_fn: js_sys::Function,
    minimal_fn: js_sys::Function,
}

#[wasm_bindgen]
impl JsCodec {
    /// `parse(text)` returns a document or throws; `serialize(doc)` returns a
    /// string (anything else counts as failure); `minimal()` returns the
    /// smallest valid document.
    #[wasm_bindgen(constructor)]
    pub fn new(
        parse_fn: js_sys::Function,
        serialize_fn: js_sys::Function,
        minimal_fn: js_sys::Function,
    ) -> Self {
        Self {
            parse_fn,
            serialize_fn,
            minimal_fn,
        }
    }
}

impl OutlineCodec for JsCodec {
    type Document = JsValue;

    fn parse(&self, text: &str) -> std::result::Result<JsValue, ParseError> {
        let document = self
            .parse_fn
            .call1(&JsValue::NULL, &text.into())
            .map_err(|e| ParseError::Invalid(js_error_message(&e)))?;
        if document.is_null() || document.is_undefined() {
            return Err(ParseError::MissingRoot);
        }
        Ok(document)
    }

    fn serialize(&self, document: &JsValue) -> Option<String> {
        match self.serialize_fn.call1(&JsValue::NULL, document) {
            Ok(text) => text.as_string(),
            Err(err) => {
                warn!("serialize callback failed: {}", js_error_message(&err));
                None
            }
        }
    }

    fn minimal_structure(&self) -> JsValue {
        self.minimal_fn
            .call0(&JsValue::NULL)
            .unwrap_or_else(|err| {
                warn!("minimal structure callback failed: {}", js_error_message(&err));
                JsValue::NULL
            })
    }
}
