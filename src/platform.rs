//! Platform abstraction: temporary object references and save actions.
//!
//! A widget never touches storage directly. When a conversion succeeds it asks
//! the platform for one [`ObjectRef`] per artifact, the exporter asks the
//! platform to save through those references, and the widget releases them
//! when the result is superseded, reset or closed.
//!
//! Two implementations ship with the crate:
//!
//! * [`MemoryPlatform`]: keeps payloads in memory and records saves. Useful
//!   for embedding hosts that stream bytes elsewhere, and for tests: it counts
//!   live references so leaks are observable.
//! * [`DirectoryPlatform`]: stages each artifact as a temp file and saves by
//!   copying it into an output directory with an atomic temp-file + rename.

use crate::error::PlatformError;
use crate::output::Artifact;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Opaque, revocable handle to an artifact's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef(String);

impl ObjectRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage and save primitives injected into widgets and the exporter.
pub trait Platform: Send + Sync {
    /// Make an artifact addressable. Called at most once per artifact.
    fn create_reference(&self, artifact: &Artifact) -> Result<ObjectRef, PlatformError>;

    /// Drop the backing storage. Called exactly once per created reference.
    fn release_reference(&self, reference: &ObjectRef);

    /// Save the referenced bytes under `file_name`. Must not release.
    fn trigger_save(
        &self,
        reference: &ObjectRef,
        file_name: &str,
        mime_type: &str,
    ) -> Result<(), PlatformError>;
}

// ── In-memory platform ───────────────────────────────────────────────────

/// A save performed through a [`MemoryPlatform`].
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub reference: ObjectRef,
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

#[derive(Default)]
struct MemoryState {
    live: HashMap<ObjectRef, Bytes>,
    created: u64,
    released: u64,
    saves: Vec<SavedFile>,
}

/// Keeps payloads in memory and records every save.
#[derive(Default)]
pub struct MemoryPlatform {
    next_id: AtomicU64,
    state: Mutex<MemoryState>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// References created and not yet released.
    pub fn live_references(&self) -> usize {
        self.lock().live.len()
    }

    pub fn created_count(&self) -> u64 {
        self.lock().created
    }

    pub fn released_count(&self) -> u64 {
        self.lock().released
    }

    /// Saves so far, in the order they were triggered.
    pub fn saved(&self) -> Vec<SavedFile> {
        self.lock().saves.clone()
    }

    pub fn is_live(&self, reference: &ObjectRef) -> bool {
        self.lock().live.contains_key(reference)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means another thread panicked mid-update of
        // plain counters; the data is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Platform for MemoryPlatform {
    fn create_reference(&self, artifact: &Artifact) -> Result<ObjectRef, PlatformError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = ObjectRef::new(format!("mem:{id}"));
        let mut state = self.lock();
        state.live.insert(reference.clone(), artifact.data.clone());
        state.created += 1;
        Ok(reference)
    }

    fn release_reference(&self, reference: &ObjectRef) {
        let mut state = self.lock();
        if state.live.remove(reference).is_some() {
            state.released += 1;
        } else {
            warn!("Release of unknown reference {}", reference);
        }
    }

    fn trigger_save(
        &self,
        reference: &ObjectRef,
        file_name: &str,
        mime_type: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.lock();
        let data = state
            .live
            .get(reference)
            .cloned()
            .ok_or_else(|| PlatformError::UnknownReference(reference.to_string()))?;
        state.saves.push(SavedFile {
            reference: reference.clone(),
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            data,
        });
        Ok(())
    }
}

// ── Filesystem platform ──────────────────────────────────────────────────

/// Stages artifacts in a private temp directory and saves them into
/// `output_dir`.
///
/// The staging directory is removed when the platform is dropped, so even
/// references that were never released do not outlive the process.
pub struct DirectoryPlatform {
    output_dir: PathBuf,
    staging: TempDir,
    next_id: AtomicU64,
    staged: Mutex<HashMap<ObjectRef, PathBuf>>,
    saved: Mutex<Vec<PathBuf>>,
}

impl DirectoryPlatform {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, PlatformError> {
        let staging = TempDir::new().map_err(|source| PlatformError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        Ok(Self {
            output_dir: output_dir.into(),
            staging,
            next_id: AtomicU64::new(0),
            staged: Mutex::new(HashMap::new()),
            saved: Mutex::new(Vec::new()),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Paths written by `trigger_save`, in order.
    pub fn saved_paths(&self) -> Vec<PathBuf> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of staged files not yet released.
    pub fn live_references(&self) -> usize {
        self.staged.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn staged_path(&self, reference: &ObjectRef) -> Result<PathBuf, PlatformError> {
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(reference)
            .cloned()
            .ok_or_else(|| PlatformError::UnknownReference(reference.to_string()))
    }
}

impl Platform for DirectoryPlatform {
    fn create_reference(&self, artifact: &Artifact) -> Result<ObjectRef, PlatformError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.staging.path().join(format!("{id}.part"));
        std::fs::write(&path, &artifact.data).map_err(|source| PlatformError::Io {
            path: path.clone(),
            source,
        })?;
        let reference = ObjectRef::new(format!("file:{id}"));
        debug!("Staged {} as {}", artifact.file_name, path.display());
        self.staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reference.clone(), path);
        Ok(reference)
    }

    fn release_reference(&self, reference: &ObjectRef) {
        let removed = self
            .staged
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(reference);
        match removed {
            Some(path) => {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to remove staged file {}: {}", path.display(), e);
                }
            }
            None => warn!("Release of unknown reference {}", reference),
        }
    }

    fn trigger_save(
        &self,
        reference: &ObjectRef,
        file_name: &str,
        _mime_type: &str,
    ) -> Result<(), PlatformError> {
        let staged = self.staged_path(reference)?;
        let target = self.output_dir.join(safe_file_name(file_name));

        std::fs::create_dir_all(&self.output_dir).map_err(|source| PlatformError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        // Atomic write: copy into a uniquely named sibling, then rename over the target.
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PlatformError::Io { path, source }
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".fileconv-")
            .suffix(".tmp")
            .tempfile_in(&self.output_dir)
            .map_err(io_err(&self.output_dir))?;
        let mut staged_file = std::fs::File::open(&staged).map_err(io_err(&staged))?;
        std::io::copy(&mut staged_file, tmp.as_file_mut()).map_err(io_err(tmp.path()))?;
        tmp.persist(&target).map_err(|e| PlatformError::Io {
            path: target.clone(),
            source: e.error,
        })?;

        debug!("Saved {}", target.display());
        self.saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(target);
        Ok(())
    }
}

/// Strip directory components so a suggested name cannot escape the output
/// directory.
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or("output")
        .to_string()
}
