//! WASM bindings for persist-core.
//!
//! Lets a browser editor drive the persistence orchestrator.
//!
//! # Architecture
//!
//! The page builds a `JsHostBridge` (prompts, download, `localStorage`, and
//! optionally a file picker, the OPFS root and a save worker) and a `JsCodec`
//! (its own parse/serialize). `WasmPersistence` wires them into a
//! `Persistence<JsCodec>`.
//!
//! ```text
//! Page (TypeScript)               WASM (Rust)
//! ─────────────────               ───────────
//! callbacks ──────────────> JsHostBridge ──> Collaborators
//! editor parse/serialize ─> JsCodec               │
//!                                                 ▼
//!                                   Persistence<JsCodec>
//!                                                 │
//! worker.onmessage ──> handleWorkerMessage ──>    ▼
//!                                   WasmPersistence (exposed to JS)
//! ```
//!
//! **Note**: This crate only compiles for `wasm32` targets. When building for native
//! targets (e.g., during `cargo check --workspace`), this crate provides no exports.

#[cfg(target_arch = "wasm32")]
mod js_bridge;

#[cfg(target_arch = "wasm32")]
pub use js_bridge::{JsCodec, JsDirectHandle, JsHostBridge};

// ============================================================================
// All WASM-specific code is gated behind target_arch = "wasm32"
// This allows `cargo check --workspace` to succeed on native targets.
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::*;
    use persist_core::{
        Collaborators, DocumentSource, Outcome, PersistConfig, PersistError, Persistence,
        PlatformFamily, SaveResponse, TimerService, TimerToken,
    };
    use serde::Serialize;
    use std::cell::RefCell;
    use std::rc::{Rc, Weak};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::{debug, warn};
    use tracing_subscriber::layer::SubscriberExt;
    use wasm_bindgen::prelude::*;

    // ========== Callback Logger Layer ==========

    thread_local! {
        static LOGGER_CALLBACK: RefCell<Option<js_sys::Function>> = const { RefCell::new(None) };
    }

    /// Forwards each tracing event to the page's logger callback.
    struct JsCallbackLayer;

    impl<S> tracing_subscriber::Layer<S> for JsCallbackLayer
    where
        S: tracing::Subscriber,
    {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            LOGGER_CALLBACK.with(|cb| {
                let Some(callback) = cb.borrow().as_ref().cloned() else {
                    return;
                };
                let metadata = event.metadata();
                let mut visitor = MessageVisitor::default();
                event.record(&mut visitor);

                let js_event = js_sys::Object::new();
                let _ = js_sys::Reflect::set(
                    &js_event,
                    &"level".into(),
                    &metadata.level().as_str().into(),
                );
                let _ = js_sys::Reflect::set(&js_event, &"target".into(), &metadata.target().into());
                let _ = js_sys::Reflect::set(&js_event, &"message".into(), &visitor.message.into());
                let timestamp = web_time::SystemTime::now()
                    .duration_since(web_time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as f64)
                    .unwrap_or(0.0);
                let _ = js_sys::Reflect::set(&js_event, &"timestamp".into(), &timestamp.into());
                let _ = callback.call1(&JsValue::NULL, &js_event);
            });
        }
    }

    #[derive(Default)]
    struct MessageVisitor {
        message: String,
    }

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.message = format!("{:?}", value);
            } else if self.message.is_empty() {
                self.message = format!("{}={:?}", field.name(), value);
            } else {
                self.message.push_str(&format!(" {}={:?}", field.name(), value));
            }
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            if field.name() == "message" {
                self.message = value.to_string();
            } else if self.message.is_empty() {
                self.message = format!("{}={}", field.name(), value);
            } else {
                self.message.push_str(&format!(" {}={}", field.name(), value));
            }
        }
    }

    /// Initialize the WASM module (panic hook and tracing).
    ///
    /// - `init()` - console-only logging
    /// - `init({ logger: (event) => {...} })` - callback + console logging
    ///
    /// The logger callback receives `{ level, target, message, timestamp }`.
    #[wasm_bindgen]
    pub fn init(config: Option<js_sys::Object>) {
        console_error_panic_hook::set_once();

        let callback = config
            .as_ref()
            .and_then(|cfg| js_sys::Reflect::get(cfg, &"logger".into()).ok())
            .and_then(|v| v.dyn_into::<js_sys::Function>().ok());

        let console_config = tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(tracing::Level::DEBUG)
            .build();

        match callback {
            Some(cb) => {
                LOGGER_CALLBACK.with(|cell| *cell.borrow_mut() = Some(cb));
                let subscriber = tracing_subscriber::registry()
                    .with(JsCallbackLayer)
                    .with(tracing_wasm::WASMLayer::new(console_config));
                tracing::subscriber::set_global_default(subscriber).ok();
            }
            None => tracing_wasm::set_as_global_default_with_config(console_config),
        }

        log("persist-wasm initialized");
    }

    #[wasm_bindgen]
    pub fn version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    #[wasm_bindgen]
    extern "C" {
        #[wasm_bindgen(js_namespace = console)]
        pub fn log(s: &str);
    }

    fn js_error(e: PersistError) -> JsError {
        JsError::new(&e.to_string())
    }

    fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsError> {
        value
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|e| JsError::new(&e.to_string()))
    }

    // ========== Timers ==========

    type Target = Rc<RefCell<Weak<Persistence<JsCodec>>>>;

    /// `setTimeout`-backed timers that call back into the orchestrator.
    struct JsTimers {
        target: Target,
    }

    impl TimerService for JsTimers {
        fn schedule(&self, token: TimerToken, after: Duration) {
            let target = self.target.borrow().clone();
            let callback = Closure::once_into_js(move || {
                if let Some(persistence) = target.upgrade() {
                    wasm_bindgen_futures::spawn_local(async move {
                        persistence.on_timer(token).await;
                    });
                }
            });

            let global = js_sys::global();
            let set_timeout = js_sys::Reflect::get(&global, &"setTimeout".into())
                .ok()
                .and_then(|f| f.dyn_into::<js_sys::Function>().ok());
            let Some(set_timeout) = set_timeout else {
                warn!("setTimeout unavailable, timer {:?} dropped", token);
                return;
            };
            let delay = JsValue::from_f64(after.as_millis() as f64);
            if let Err(e) = set_timeout.call2(&global, &callback, &delay) {
                warn!("setTimeout failed: {:?}", e);
            }
        }
    }

    /// Read the config object, filling `platform` from the user agent when absent.
    fn read_config(config: JsValue) -> Result<PersistConfig, JsError> {
        if config.is_null() || config.is_undefined() {
            return Ok(PersistConfig {
                platform: detect_platform(),
                ..PersistConfig::default()
            });
        }
        let has_platform = js_sys::Reflect::has(&config, &"platform".into()).unwrap_or(false);
        let mut parsed: PersistConfig = serde_wasm_bindgen::from_value(config)
            .map_err(|e| JsError::new(&format!("Invalid config: {}", e)))?;
        if !has_platform {
            parsed.platform = detect_platform();
        }
        Ok(parsed)
    }

    fn detect_platform() -> PlatformFamily {
        js_sys::Reflect::get(&js_sys::global(), &"navigator".into())
            .and_then(|navigator| js_sys::Reflect::get(&navigator, &"userAgent".into()))
            .ok()
            .and_then(|ua| ua.as_string())
            .map(|ua| PlatformFamily::from_user_agent(&ua))
            .unwrap_or_default()
    }

    // ========== WASM Subscription Handle ==========

    /// Call `dispose()` to unsubscribe.
    #[wasm_bindgen]
    pub struct WasmSubscription {
        inner: RefCell<Option<persist_core::Subscription>>,
    }

    #[wasm_bindgen]
    impl WasmSubscription {
        /// Unsubscribe from events. Safe to call multiple times.
        pub fn dispose(&self) {
            self.inner.borrow_mut().take();
        }
    }

    /// Persistence orchestrator exposed to TypeScript.
    ///
    /// Methods returning `boolean` report whether the operation went ahead
    /// (`false` when the user cancelled a prompt).
    #[wasm_bindgen]
    pub struct WasmPersistence {
        inner: Rc<Persistence<JsCodec>>,
    }

    #[wasm_bindgen]
    impl WasmPersistence {
        #[wasm_bindgen(constructor)]
        pub fn new(
            bridge: JsHostBridge,
            codec: JsCodec,
            config: JsValue,
        ) -> Result<WasmPersistence, JsError> {
            let config = read_config(config)?;
            let target: Target = Rc::new(RefCell::new(Weak::new()));
            let collaborators = Collaborators {
                platform: bridge.platform(),
                ui: bridge.ui(),
                drafts: bridge.drafts(),
                timers: Arc::new(JsTimers {
                    target: Rc::clone(&target),
                }),
                exporter: bridge.exporter(),
            };
            let inner = Rc::new(Persistence::new(config, codec, collaborators));
            *target.borrow_mut() = Rc::downgrade(&inner);
            Ok(WasmPersistence { inner })
        }

        /// Probe features and run the load cascade. Call once on page load.
        pub async fn initialize(&self) -> Result<(), JsError> {
            self.inner.initialize().await.map_err(js_error)
        }

        /// Current `FileStatus` as a plain object.
        pub fn status(&self) -> Result<JsValue, JsError> {
            to_js(&self.inner.status())
        }

        #[wasm_bindgen(js_name = isDirty)]
        pub fn is_dirty(&self) -> bool {
            self.inner.is_dirty()
        }

        #[wasm_bindgen(js_name = isBusy)]
        pub fn is_busy(&self) -> bool {
            self.inner.is_busy()
        }

        /// The editor's document value, or null.
        #[wasm_bindgen(js_name = getDocument)]
        pub fn get_document(&self) -> JsValue {
            self.inner
                .with_document(|d| d.clone())
                .unwrap_or(JsValue::NULL)
        }

        /// Replace the document and record a content change.
        /// Returns false when nothing is loaded.
        #[wasm_bindgen(js_name = setDocument)]
        pub fn set_document(&self, document: JsValue) -> bool {
            self.inner.update_document(|d| *d = document).is_some()
        }

        /// Call after every editor mutation.
        #[wasm_bindgen(js_name = notifyContentChanged)]
        pub fn notify_content_changed(&self) {
            self.inner.notify_content_changed();
        }

        /// Install `content` from `source` ("direct", "opfs", "copy", "new", "draft").
        pub fn load(
            &self,
            content: &str,
            display_name: &str,
            source: JsValue,
        ) -> Result<(), JsError> {
            let source: DocumentSource = serde_wasm_bindgen::from_value(source)
                .map_err(|e| JsError::new(&format!("Invalid source: {}", e)))?;
            self.inner
                .load(content, display_name, source)
                .map_err(js_error)
        }

        #[wasm_bindgen(js_name = loadCopy)]
        pub async fn load_copy(&self, file_name: String, content: String) -> Result<bool, JsError> {
            let outcome = self
                .inner
                .load_copy(&file_name, &content)
                .await
                .map_err(js_error)?;
            Ok(outcome == Outcome::Done)
        }

        #[wasm_bindgen(js_name = openDirect)]
        pub async fn open_direct(&self) -> Result<bool, JsError> {
            let outcome = self.inner.open_direct().await.map_err(js_error)?;
            Ok(outcome == Outcome::Done)
        }

        #[wasm_bindgen(js_name = loadFromSandbox)]
        pub async fn load_from_sandbox(&self) -> Result<(), JsError> {
            self.inner.load_from_sandbox().await.map_err(js_error)
        }

        #[wasm_bindgen(js_name = saveDirect)]
        pub async fn save_direct(&self) -> Result<(), JsError> {
            self.inner.save_direct().await.map_err(js_error)
        }

        /// Post the document to the save worker. Returns the request id.
        #[wasm_bindgen(js_name = saveToSandbox)]
        pub async fn save_to_sandbox(&self) -> Result<String, JsError> {
            let id = self.inner.save_to_sandbox().await.map_err(js_error)?;
            Ok(id.to_string())
        }

        /// Feed `event.data` from the save worker's `onmessage`.
        #[wasm_bindgen(js_name = handleWorkerMessage)]
        pub fn handle_worker_message(&self, data: JsValue) {
            match serde_wasm_bindgen::from_value::<SaveResponse>(data) {
                Ok(response) => self.inner.handle_channel_message(&response),
                Err(e) => debug!("Ignoring unrecognized worker message: {}", e),
            }
        }

        #[wasm_bindgen(js_name = saveDraft)]
        pub async fn save_draft(&self) -> Result<bool, JsError> {
            self.inner.save_draft().await.map_err(js_error)
        }

        #[wasm_bindgen(js_name = loadDraft)]
        pub async fn load_draft(&self, force_prompt: bool) -> Result<bool, JsError> {
            self.inner.load_draft(force_prompt).await.map_err(js_error)
        }

        #[wasm_bindgen(js_name = checkUnsavedChanges)]
        pub async fn check_unsaved_changes(&self, action: String) -> bool {
            self.inner.check_unsaved_changes(&action).await
        }

        #[wasm_bindgen(js_name = createNew)]
        pub async fn create_new(&self) -> Result<bool, JsError> {
            let outcome = self.inner.create_new().await.map_err(js_error)?;
            Ok(outcome == Outcome::Done)
        }

        #[wasm_bindgen(js_name = exportCopy)]
        pub async fn export_copy(&self) -> Result<(), JsError> {
            self.inner.export_copy().await.map_err(js_error)
        }

        /// Subscribe to `PersistEvent`s (state changes, indicators, features).
        pub fn subscribe(&self, callback: js_sys::Function) -> WasmSubscription {
            let subscription = self.inner.events().subscribe(move |event| {
                match to_js(&event) {
                    Ok(js_event) => {
                        let _ = callback.call1(&JsValue::NULL, &js_event);
                    }
                    Err(_) => warn!("Failed to convert event for JS"),
                }
            });
            WasmSubscription {
                inner: RefCell::new(Some(subscription)),
            }
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_impl::*;

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn test_version_matches_package() {
        assert_eq!(version(), env!("CARGO_PKG_VERSION"));
    }

    #[wasm_bindgen_test]
    async fn test_bootstrap_without_optional_features() {
        let noop = js_sys::Function::new_no_args("");
        let confirm = js_sys::Function::new_no_args("return false;");
        let storage = js_sys::eval(
            "({ data: {}, getItem(k) { return k in this.data ? this.data[k] : null; }, \
               setItem(k, v) { this.data[k] = v; }, removeItem(k) { delete this.data[k]; } })",
        )
        .unwrap();
        let bridge = JsHostBridge::new(confirm, noop.clone(), noop.clone(), noop.clone(), storage);
        let codec = JsCodec::new(
            js_sys::Function::new_with_args("text", "return { text };"),
            js_sys::Function::new_with_args("doc", "return doc.text;"),
            js_sys::Function::new_no_args("return { text: '<ul><li></li></ul>' };"),
        );

        let persistence = WasmPersistence::new(bridge, codec, JsValue::UNDEFINED).unwrap();
        persistence.initialize().await.unwrap();

        assert!(!persistence.is_busy());
        assert!(!persistence.is_dirty());
        assert!(persistence.get_document().is_null());
    }
}
