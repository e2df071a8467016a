//! Storage backends over tokio::fs.
//!
//! - `NativeDirectHandle`: a user-chosen file on disk, written through a
//!   sibling temp file that is renamed into place on commit
//! - `NativeSandbox`: the app-storage directory
//! - `NativeDraftStore`: draft records in a single JSON file with a byte quota
//! - `DirectoryExporter`: writes exported copies into a directory

use async_trait::async_trait;
use persist_core::{
    AccessMode, DirectHandle, DraftStore, ExportFile, Exporter, PermissionState, SandboxFile,
    SandboxStorage, StorageError, WritableFile,
};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, StorageError>;

/// Map an io error on `path` to a storage error.
pub(crate) fn storage_err(path: &Path, e: std::io::Error) -> StorageError {
    match e.kind() {
        ErrorKind::NotFound => StorageError::NotFound(path.display().to_string()),
        ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.display().to_string()),
        _ => StorageError::Io(e.to_string()),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Write `content` to `path` via a temp file and rename.
pub(crate) async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_err(parent, e))?;
    }

    let temp = temp_path_for(path);
    if let Err(e) = fs::write(&temp, content).await {
        let _ = fs::remove_file(&temp).await;
        return Err(storage_err(&temp, e));
    }
    fs::rename(&temp, path).await.map_err(|e| {
        let err = storage_err(path, e);
        warn!("Failed to move {} into place: {}", temp.display(), err);
        err
    })
}

/// File names inside app storage must not escape the directory.
fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StorageError::Io(format!("Invalid storage file name: {name:?}")));
    }
    Ok(())
}

// ============================================================================
// Direct file handles
// ============================================================================

/// A file on disk opened for in-place editing.
pub struct NativeDirectHandle {
    path: PathBuf,
}

impl NativeDirectHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn permission(&self, mode: AccessMode) -> Result<PermissionState> {
        let metadata = fs::metadata(&self.path)
            .await
            .map_err(|e| storage_err(&self.path, e))?;
        let state = match mode {
            AccessMode::Read => PermissionState::Granted,
            AccessMode::ReadWrite if metadata.permissions().readonly() => PermissionState::Denied,
            AccessMode::ReadWrite => PermissionState::Granted,
        };
        Ok(state)
    }
}

#[async_trait]
impl DirectHandle for NativeDirectHandle {
    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    async fn read_text(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .await
            .map_err(|e| storage_err(&self.path, e))
    }

    async fn create_writable(&self) -> Result<Box<dyn WritableFile>> {
        let temp = temp_path_for(&self.path);
        let file = fs::File::create(&temp)
            .await
            .map_err(|e| storage_err(&temp, e))?;
        debug!("Opened writable {} for {}", temp.display(), self.path.display());
        Ok(Box::new(NativeWritable {
            target: self.path.clone(),
            temp,
            file,
        }))
    }

    fn supports_permissions(&self) -> bool {
        true
    }

    async fn query_permission(&self, mode: AccessMode) -> Result<PermissionState> {
        self.permission(mode).await
    }

    /// A headless host cannot escalate; the answer matches the file's mode bits.
    async fn request_permission(&self, mode: AccessMode) -> Result<PermissionState> {
        self.permission(mode).await
    }
}

/// Pending write to a direct file. Nothing reaches the target until `close`.
struct NativeWritable {
    target: PathBuf,
    temp: PathBuf,
    file: fs::File,
}

#[async_trait]
impl WritableFile for NativeWritable {
    async fn write(&mut self, content: &str) -> Result<()> {
        self.file
            .write_all(content.as_bytes())
            .await
            .map_err(|e| storage_err(&self.temp, e))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let NativeWritable { target, temp, mut file } = *self;
        file.flush().await.map_err(|e| storage_err(&temp, e))?;
        file.sync_all().await.map_err(|e| storage_err(&temp, e))?;
        drop(file);
        fs::rename(&temp, &target)
            .await
            .map_err(|e| storage_err(&target, e))
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let NativeWritable { temp, file, .. } = *self;
        drop(file);
        match fs::remove_file(&temp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(&temp, e)),
        }
    }
}

// ============================================================================
// App storage
// ============================================================================

/// App-private storage directory.
pub struct NativeSandbox {
    root: PathBuf,
}

impl NativeSandbox {
    /// Open (creating if needed) the storage directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| storage_err(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry(&self, name: &str) -> Result<NativeSandboxFile> {
        validate_entry_name(name)?;
        Ok(NativeSandboxFile {
            name: name.to_string(),
            path: self.root.join(name),
        })
    }
}

#[async_trait]
impl SandboxStorage for NativeSandbox {
    async fn lookup(&self, name: &str) -> Result<Option<Arc<dyn SandboxFile>>> {
        let entry = self.entry(name)?;
        let exists = fs::try_exists(&entry.path)
            .await
            .map_err(|e| storage_err(&entry.path, e))?;
        Ok(exists.then(|| Arc::new(entry) as Arc<dyn SandboxFile>))
    }

    async fn create(&self, name: &str) -> Result<Arc<dyn SandboxFile>> {
        let entry = self.entry(name)?;
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&entry.path)
            .await
            .map_err(|e| storage_err(&entry.path, e))?;
        debug!("App storage file ready: {}", entry.path.display());
        Ok(Arc::new(entry))
    }
}

/// A file inside the app-storage directory.
pub struct NativeSandboxFile {
    name: String,
    path: PathBuf,
}

#[async_trait]
impl SandboxFile for NativeSandboxFile {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn read_text(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .await
            .map_err(|e| storage_err(&self.path, e))
    }
}

// ============================================================================
// Drafts
// ============================================================================

/// Draft records kept as a JSON object in one file.
///
/// `set` fails with `QuotaExceeded` when the encoded file would exceed
/// `quota_bytes`, leaving the previous contents in place.
pub struct NativeDraftStore {
    path: PathBuf,
    quota_bytes: usize,
    lock: Mutex<()>,
}

impl NativeDraftStore {
    pub fn new(path: impl Into<PathBuf>, quota_bytes: usize) -> Self {
        Self {
            path: path.into(),
            quota_bytes,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_records(&self) -> Result<BTreeMap<String, String>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(storage_err(&self.path, e)),
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            StorageError::Io(format!("Corrupt draft file {}: {}", self.path.display(), e))
        })
    }

    async fn write_records(&self, records: &BTreeMap<String, String>) -> Result<()> {
        if records.is_empty() {
            return match fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(storage_err(&self.path, e)),
            };
        }
        let encoded =
            serde_json::to_string(records).map_err(|e| StorageError::Io(e.to_string()))?;
        if encoded.len() > self.quota_bytes {
            warn!(
                "Draft file would be {} bytes, quota is {}",
                encoded.len(),
                self.quota_bytes
            );
            return Err(StorageError::QuotaExceeded);
        }
        write_atomic(&self.path, &encoded).await
    }
}

#[async_trait]
impl DraftStore for NativeDraftStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_records().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_records().await?;
        records.insert(key.to_string(), value.to_string());
        self.write_records(&records).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_records().await?;
        if records.remove(key).is_some() {
            self.write_records(&records).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Export
// ============================================================================

/// Exports copies into a directory, replacing any file of the same name.
pub struct DirectoryExporter {
    dir: PathBuf,
}

impl DirectoryExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Exporter for DirectoryExporter {
    async fn export(&self, file: ExportFile) -> Result<()> {
        validate_entry_name(&file.name)?;
        let path = self.dir.join(&file.name);
        write_atomic(&path, &file.content).await?;
        info!("Exported {} ({})", path.display(), file.mime_type);
        Ok(())
    }
}
