//! Durable rotation state
//!
//! The read path is lenient: a missing or corrupt state file yields default
//! state. The write path is strict: every failure surfaces as a persistence
//! error. Writes go to a temporary sibling first and are renamed into place,
//! so a crash mid-write leaves the previously committed file intact.
//!
//! Only one process may own a state file. [`StateLock`] enforces this with an
//! advisory sidecar file; nothing else coordinates concurrent writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::error::{RotationError, RotationResult};
use super::state::StateTable;
use crate::pool::{AccountRegistry, PoolSource, Resource, ResourcePool};

/// Current state file format version
pub const STATE_FILE_VERSION: u32 = 1;

/// Persistence backend for the rotation state table
pub trait StateStore: Send + Sync + fmt::Debug {
    /// Load the table, with a default entry for every resource
    fn load(&self, resources: &[Resource]) -> RotationResult<StateTable>;

    /// Persist the full table
    fn save(&self, table: &StateTable) -> RotationResult<()>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

impl<T: StateStore + ?Sized> StateStore for std::sync::Arc<T> {
    fn load(&self, resources: &[Resource]) -> RotationResult<StateTable> {
        (**self).load(resources)
    }

    fn save(&self, table: &StateTable) -> RotationResult<()> {
        (**self).save(table)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Build the store matching a pool: the registry itself for account
/// registries, a separate JSON state file otherwise
pub fn store_for_pool(
    pool: &ResourcePool,
    state_file: &Path,
    lock: bool,
) -> RotationResult<Box<dyn StateStore>> {
    match pool.source() {
        PoolSource::Registry { path, document } => {
            let store = RegistryStateStore::new(path, document.clone());
            Ok(Box::new(if lock { store.locked()? } else { store }))
        }
        PoolSource::LineList(_) | PoolSource::Environment => {
            let store = JsonStateStore::new(state_file);
            Ok(Box::new(if lock { store.locked()? } else { store }))
        }
    }
}

/// Write bytes to `path` through a temporary file and rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> RotationResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| RotationError::io("create_dir", parent, e))?;
    }

    let temp_path = sidecar(path, ".tmp");
    let mut file =
        File::create(&temp_path).map_err(|e| RotationError::io("create", &temp_path, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| RotationError::io("write", &temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| RotationError::io("rename", path, e))?;
    Ok(())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

// ============================================================================
// JSON State File
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    updated_at: DateTime<Utc>,
    resources: StateTable,
}

/// Rotation state kept in its own JSON file, keyed by resource id
#[derive(Debug)]
pub struct JsonStateStore {
    path: PathBuf,
    lock: Option<StateLock>,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: None,
        }
    }

    /// Take the single-writer lock on the state file
    pub fn locked(mut self) -> RotationResult<Self> {
        self.lock = Some(StateLock::acquire(&self.path)?);
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonStateStore {
    fn load(&self, resources: &[Resource]) -> RotationResult<StateTable> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No state file, starting fresh");
                return Ok(StateTable::for_resources(resources));
            }
            Err(e) => return Err(RotationError::io("load", &self.path, e)),
        };

        let mut table = match serde_json::from_str::<StateFile>(&content) {
            Ok(file) if file.version == STATE_FILE_VERSION => {
                tracing::debug!(
                    path = %self.path.display(),
                    entries = file.resources.len(),
                    updated_at = %file.updated_at,
                    "Rotation state loaded"
                );
                file.resources
            }
            Ok(file) => {
                tracing::warn!(
                    path = %self.path.display(),
                    version = file.version,
                    "Unsupported state file version, starting fresh"
                );
                StateTable::new()
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Corrupt state file, starting fresh"
                );
                StateTable::new()
            }
        };

        table.ensure(resources);
        Ok(table)
    }

    fn save(&self, table: &StateTable) -> RotationResult<()> {
        let file = StateFile {
            version: STATE_FILE_VERSION,
            updated_at: Utc::now(),
            resources: table.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &bytes)?;
        tracing::trace!(path = %self.path.display(), "Rotation state saved");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// Account Registry
// ============================================================================

/// Rotation state written back into the account registry file
///
/// `last_used`, `duration` and `cookies_file` are updated in place; every
/// other key of the document is preserved. Timestamps are whole seconds.
#[derive(Debug)]
pub struct RegistryStateStore {
    path: PathBuf,
    document: Mutex<AccountRegistry>,
    lock: Option<StateLock>,
}

impl RegistryStateStore {
    pub fn new(path: impl Into<PathBuf>, document: AccountRegistry) -> Self {
        Self {
            path: path.into(),
            document: Mutex::new(document),
            lock: None,
        }
    }

    /// Read the registry from disk
    pub fn open(path: impl Into<PathBuf>) -> RotationResult<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path).map_err(|e| RotationError::io("load", &path, e))?;
        let document = AccountRegistry::parse(&content)?;
        Ok(Self::new(path, document))
    }

    pub fn locked(mut self) -> RotationResult<Self> {
        self.lock = Some(StateLock::acquire(&self.path)?);
        Ok(self)
    }

    /// Copy of the current document
    pub fn document(&self) -> AccountRegistry {
        self.document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl StateStore for RegistryStateStore {
    fn load(&self, resources: &[Resource]) -> RotationResult<StateTable> {
        let document = self
            .document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut table: StateTable = document
            .accounts
            .iter()
            .map(|account| (account.resource_id(), account.rotation_state()))
            .collect();
        table.ensure(resources);
        Ok(table)
    }

    fn save(&self, table: &StateTable) -> RotationResult<()> {
        let mut document = self
            .document
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (id, state) in table.iter() {
            match document.account_mut(id) {
                Some(account) => account.apply_state(state),
                None => tracing::warn!(resource = %id, "Resource missing from account registry"),
            }
        }

        let bytes = document.to_pretty_json()?;
        write_atomic(&self.path, &bytes)?;
        tracing::trace!(path = %self.path.display(), "Account registry updated");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Non-durable store for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    table: Mutex<Option<StateTable>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a table
    pub fn with_table(table: StateTable) -> Self {
        Self {
            table: Mutex::new(Some(table)),
            ..Default::default()
        }
    }

    /// Store whose writes always fail
    pub fn failing() -> Self {
        let store = Self::default();
        store.set_failing(true);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Last saved table
    pub fn saved(&self) -> Option<StateTable> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, resources: &[Resource]) -> RotationResult<StateTable> {
        let mut table = self.saved().unwrap_or_default();
        table.ensure(resources);
        Ok(table)
    }

    fn save(&self, table: &StateTable) -> RotationResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RotationError::persistence("save", "memory store is read-only"));
        }
        *self
            .table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(table.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// Advisory Lock
// ============================================================================

/// Single-writer guard on a state file
///
/// Creates `<state>.lock` exclusively and writes the owning pid into it. The
/// file is removed when the guard is dropped. A crashed process leaves the
/// lock behind; [`StateLock::remove_stale`] clears it.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Lock file path for a state file
    pub fn lock_path(state_path: &Path) -> PathBuf {
        sidecar(state_path, ".lock")
    }

    pub fn acquire(state_path: &Path) -> RotationResult<Self> {
        let path = Self::lock_path(state_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RotationError::io("create_dir", parent, e))?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = fs::read_to_string(&path).unwrap_or_default();
                return Err(RotationError::persistence(
                    "lock",
                    format!(
                        "{} is locked by pid {} (run `harvester unlock` if that process is gone)",
                        state_path.display(),
                        owner.trim()
                    ),
                ));
            }
            Err(e) => return Err(RotationError::io("lock", &path, e)),
        };

        write!(file, "{}", std::process::id()).map_err(|e| RotationError::io("lock", &path, e))?;
        tracing::debug!(path = %path.display(), "State lock acquired");
        Ok(Self { path })
    }

    /// Remove a leftover lock. Returns whether one existed.
    pub fn remove_stale(state_path: &Path) -> RotationResult<bool> {
        let path = Self::lock_path(state_path);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RotationError::io("unlock", &path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove state lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Credential, ProxyEndpoint, ResourceId};
    use crate::rotation::state::RotationState;
    use tempfile::TempDir;

    fn resources(ids: &[&str]) -> Vec<Resource> {
        ids.iter()
            .map(|id| {
                Resource::new(
                    *id,
                    ProxyEndpoint::parse("10.0.0.1:3128").unwrap(),
                    Credential::CookieFile(PathBuf::from(format!("{id}.json"))),
                )
            })
            .collect()
    }

    #[test]
    fn test_json_store_missing_file_defaults() {
        let dir = TempDir::new().unwrap();
        let store = JsonStateStore::new(dir.path().join("state.json"));
        let table = store.load(&resources(&["a", "b"])).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&ResourceId::new("a")), Some(&RotationState::default()));
    }

    #[test]
    fn test_json_store_corrupt_file_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let table = JsonStateStore::new(&path).load(&resources(&["a"])).unwrap();
        assert_eq!(table.get(&ResourceId::new("a")), Some(&RotationState::default()));
    }

    #[test]
    fn test_json_store_creates_parent_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state/rotation.json");
        let store = JsonStateStore::new(&path);

        store.save(&StateTable::for_resources(&resources(&["a"]))).unwrap();
        assert!(path.exists());
        assert!(!sidecar(&path, ".tmp").exists());
    }

    #[test]
    fn test_json_store_unreadable_is_error() {
        let dir = TempDir::new().unwrap();
        // A directory in place of the file cannot be read as text
        let store = JsonStateStore::new(dir.path());
        let err = store.load(&resources(&["a"])).unwrap_err();
        assert!(err.is_persistence());
    }

    #[test]
    fn test_memory_store_failing() {
        let store = MemoryStateStore::failing();
        let err = store.save(&StateTable::new()).unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(store.save_count(), 0);

        store.set_failing(false);
        store.save(&StateTable::new()).unwrap();
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state.json");

        let lock = StateLock::acquire(&state).unwrap();
        let err = StateLock::acquire(&state).unwrap_err();
        assert!(err.to_string().contains("locked"));

        drop(lock);
        assert!(!StateLock::lock_path(&state).exists());
        assert!(StateLock::acquire(&state).is_ok());
    }

    #[test]
    fn test_remove_stale_lock() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state.json");
        fs::write(StateLock::lock_path(&state), "99999").unwrap();

        assert!(StateLock::remove_stale(&state).unwrap());
        assert!(!StateLock::remove_stale(&state).unwrap());
    }
}
