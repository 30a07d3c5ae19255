//! Request-scoped scratch storage for intermediate artifacts
//!
//! The resized source and synthesized mask of every request are written to
//! scratch storage under collision-free names. A [`ScratchScope`] tracks what
//! one request wrote and removes all of it when dropped, whether the request
//! succeeded or failed.

use crate::error::{EditError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Reference to one stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScratchHandle {
    name: String,
    location: Option<PathBuf>,
}

impl ScratchHandle {
    /// Unique artifact name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File system location, for storage backed by files
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.location.as_deref()
    }
}

/// Put/get/remove storage for intermediate artifacts
pub trait ScratchStorage: Send + Sync {
    /// Store `bytes` under `name`
    ///
    /// # Errors
    /// - Storage write failure
    fn put(&self, name: &str, bytes: &[u8]) -> Result<ScratchHandle>;

    /// Read back a stored artifact
    ///
    /// # Errors
    /// - Unknown handle or storage read failure
    fn get(&self, handle: &ScratchHandle) -> Result<Vec<u8>>;

    /// Remove a stored artifact; removing an absent artifact is not an error
    ///
    /// # Errors
    /// - Storage failure other than "not found"
    fn remove(&self, handle: &ScratchHandle) -> Result<()>;
}

/// Build a collision-free artifact name: `<unix-millis>_<uuid>_<suffix>`
#[must_use]
pub fn unique_name(suffix: &str) -> String {
    format!(
        "{}_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple(),
        suffix
    )
}

/// Scratch storage in a directory on disk
#[derive(Debug, Clone)]
pub struct FsScratchStorage {
    dir: PathBuf,
}

impl FsScratchStorage {
    /// Use `dir`, creating it if needed
    ///
    /// # Errors
    /// - `Io` when the directory cannot be created
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| EditError::file_io_error("create scratch directory", &dir, &e))?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, handle: &ScratchHandle) -> PathBuf {
        handle
            .location
            .clone()
            .unwrap_or_else(|| self.dir.join(&handle.name))
    }
}

impl ScratchStorage for FsScratchStorage {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<ScratchHandle> {
        let path = self.dir.join(name);
        fs::write(&path, bytes).map_err(|e| EditError::file_io_error("write scratch file", &path, &e))?;
        log::trace!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(ScratchHandle {
            name: name.to_string(),
            location: Some(path),
        })
    }

    fn get(&self, handle: &ScratchHandle) -> Result<Vec<u8>> {
        let path = self.path_for(handle);
        fs::read(&path).map_err(|e| EditError::file_io_error("read scratch file", &path, &e))
    }

    fn remove(&self, handle: &ScratchHandle) -> Result<()> {
        let path = self.path_for(handle);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EditError::file_io_error("remove scratch file", &path, &e)),
        }
    }
}

/// Scratch storage held in memory
#[derive(Debug, Default)]
pub struct MemoryScratchStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryScratchStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of artifacts currently stored
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| EditError::internal("Scratch storage lock poisoned"))
    }
}

impl ScratchStorage for MemoryScratchStorage {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<ScratchHandle> {
        self.entries()?.insert(name.to_string(), bytes.to_vec());
        Ok(ScratchHandle {
            name: name.to_string(),
            location: None,
        })
    }

    fn get(&self, handle: &ScratchHandle) -> Result<Vec<u8>> {
        self.entries()?
            .get(&handle.name)
            .cloned()
            .ok_or_else(|| EditError::internal(format!("No scratch artifact named {}", handle.name)))
    }

    fn remove(&self, handle: &ScratchHandle) -> Result<()> {
        self.entries()?.remove(&handle.name);
        Ok(())
    }
}

/// Artifacts written by one request, removed together on drop
pub struct ScratchScope {
    storage: Arc<dyn ScratchStorage>,
    prefix: String,
    handles: Vec<ScratchHandle>,
}

impl ScratchScope {
    /// Open a scope whose artifacts share a unique per-request prefix
    #[must_use]
    pub fn new(storage: Arc<dyn ScratchStorage>) -> Self {
        Self {
            storage,
            prefix: unique_name("").trim_end_matches('_').to_string(),
            handles: Vec::new(),
        }
    }

    /// Per-request name prefix
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Store an artifact as `<prefix>_<suffix>` and track it for cleanup
    ///
    /// # Errors
    /// - Storage write failure
    pub fn put(&mut self, suffix: &str, bytes: &[u8]) -> Result<ScratchHandle> {
        let handle = self.storage.put(&format!("{}_{suffix}", self.prefix), bytes)?;
        self.handles.push(handle.clone());
        Ok(handle)
    }

    /// Read back an artifact
    ///
    /// # Errors
    /// - Storage read failure
    pub fn get(&self, handle: &ScratchHandle) -> Result<Vec<u8>> {
        self.storage.get(handle)
    }

    /// Artifacts tracked so far
    #[must_use]
    pub fn handles(&self) -> &[ScratchHandle] {
        &self.handles
    }
}

impl Drop for ScratchScope {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = self.storage.remove(&handle) {
                log::warn!("Failed to remove scratch artifact {}: {e}", handle.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unique_names_do_not_collide() {
        let names: std::collections::HashSet<_> = (0..1000).map(|_| unique_name("mask.png")).collect();
        assert_eq!(names.len(), 1000);
        assert!(names.iter().all(|name| name.ends_with("_mask.png")));
    }

    #[test]
    fn test_fs_storage_round_trip_and_remove() {
        let dir = TempDir::new().unwrap();
        let storage = FsScratchStorage::new(dir.path().join("scratch")).unwrap();

        let handle = storage.put("a_image.png", b"png").unwrap();
        assert!(handle.path().unwrap().exists());
        assert_eq!(storage.get(&handle).unwrap(), b"png");

        storage.remove(&handle).unwrap();
        assert!(!handle.path().unwrap().exists());
        // Second removal is a no-op
        storage.remove(&handle).unwrap();
    }

    #[test]
    fn test_scope_cleans_up_on_drop() {
        let storage = Arc::new(MemoryScratchStorage::new());
        {
            let mut scope = ScratchScope::new(storage.clone());
            let image = scope.put("image.png", b"image").unwrap();
            scope.put("mask.png", b"mask").unwrap();
            assert!(image.name().starts_with(scope.prefix()));
            assert_eq!(scope.get(&image).unwrap(), b"image");
            assert_eq!(storage.len(), 2);
        }
        assert!(storage.is_empty());
    }

    #[test]
    fn test_scope_cleans_up_when_request_fails() {
        fn failing_request(storage: Arc<dyn ScratchStorage>) -> Result<()> {
            let mut scope = ScratchScope::new(storage);
            scope.put("image.png", b"image")?;
            Err(EditError::inference("boom"))
        }

        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FsScratchStorage::new(dir.path()).unwrap());
        assert!(failing_request(storage).is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_concurrent_scopes_use_distinct_prefixes() {
        let storage: Arc<dyn ScratchStorage> = Arc::new(MemoryScratchStorage::new());
        let a = ScratchScope::new(storage.clone());
        let b = ScratchScope::new(storage);
        assert_ne!(a.prefix(), b.prefix());
    }
}
