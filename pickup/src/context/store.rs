//! Key/value regions: disk I/O, paths, atomic writes
//!
//! Each region is a single JSON object on disk:
//! - `<state_dir>/regions/global/state.json` for cross-workspace state
//! - `<state_dir>/regions/<workspace-hash>/state.json` per workspace
//!
//! Writes go through temp file + fsync + rename under an exclusive `fs2`
//! lock, with 0600 files and 0700 directories.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Region name used for state shared by every workspace
pub const GLOBAL_REGION: &str = "global";

/// Region name for contexts captured outside any workspace
pub const NO_WORKSPACE_REGION: &str = "_no_workspace";

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = ".lock";

/// Maximum number of files scanned during startup cleanup
const CLEANUP_SCAN_LIMIT: usize = 1000;

/// Age threshold for temp file cleanup (1 hour)
const CLEANUP_AGE_THRESHOLD: Duration = Duration::from_secs(3600);

/// Durable key/value storage scoped to one region
pub trait KeyValueStore: Send + Sync {
    /// Raw value stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Typed read with a fallback for missing keys
pub fn get_or<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
    default: T,
) -> Result<T, StoreError> {
    match store.get(key)? {
        Some(value) => serde_json::from_value(value).map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        }),
        None => Ok(default),
    }
}

/// Typed write
pub fn set_value<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set(key, serde_json::to_value(value)?)
}

/// In-memory region, lost on drop
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Region backed by `<dir>/state.json`
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
    available: bool,
}

impl FileKvStore {
    fn new(dir: PathBuf, available: bool) -> Self {
        Self { dir, available }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        if !self.available {
            return Err(StoreError::Unavailable(self.dir.clone()));
        }
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700))
                .map_err(|e| StoreError::io(&self.dir, e))?;
        }

        Ok(())
    }

    fn read_map(&self) -> Result<Map<String, Value>, StoreError> {
        let path = self.state_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(StoreError::io(path, e)),
        };

        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt { path, source })
    }

    fn write_map(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        let final_path = self.state_path();
        let temp_path = self
            .dir
            .join(format!("{}.tmp.{}", STATE_FILE, std::process::id()));

        let json = serde_json::to_string_pretty(map)?;

        let mut file = File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| StoreError::io(&temp_path, e))?;
        }

        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &final_path).map_err(|e| StoreError::io(&final_path, e))?;
        Ok(())
    }

    /// Open the region lock file and block until it is held exclusively
    fn lock(&self) -> Result<File, StoreError> {
        let lock_path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| StoreError::io(&lock_path, e))?;
        }

        file.lock_exclusive()
            .map_err(|e| StoreError::io(&lock_path, e))?;
        Ok(file)
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        if !self.available {
            return Err(StoreError::Unavailable(self.dir.clone()));
        }
        Ok(self.read_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.ensure_dir()?;
        // released when dropped
        let _guard = self.lock()?;

        let mut map = self.read_map()?;
        map.insert(key.to_string(), value);
        self.write_map(&map)
    }
}

/// Root of every key/value region
///
/// If the regions directory cannot be created the store is marked
/// unavailable and every region it hands out fails with
/// [`StoreError::Unavailable`].
#[derive(Debug, Clone)]
pub struct StateStore {
    regions_dir: PathBuf,
    available: bool,
}

impl StateStore {
    pub fn new(state_dir: &Path) -> Self {
        let regions_dir = state_dir.join("regions");
        let available = Self::ensure_regions_dir(&regions_dir);

        Self {
            regions_dir,
            available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn regions_dir(&self) -> &Path {
        &self.regions_dir
    }

    fn ensure_regions_dir(dir: &Path) -> bool {
        match fs::create_dir_all(dir) {
            Ok(()) => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                        tracing::warn!(dir = %dir.display(), error = %e, "failed to set region dir permissions");
                        return false;
                    }
                }
                true
            }
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "failed to create regions directory");
                false
            }
        }
    }

    /// SHA-256 of the canonical workspace path, truncated to 16 hex chars
    pub fn workspace_hash(workspace: &Path) -> String {
        let canonical = workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.to_path_buf());

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_os_str().as_encoded_bytes());
        let hash = hasher.finalize();

        hex::encode(&hash[..8])
    }

    /// Directory name of the region owning `workspace`
    pub fn region_name(workspace: Option<&str>) -> String {
        match workspace {
            Some(path) if !path.trim().is_empty() => Self::workspace_hash(Path::new(path)),
            _ => NO_WORKSPACE_REGION.to_string(),
        }
    }

    pub fn global_region(&self) -> FileKvStore {
        FileKvStore::new(self.regions_dir.join(GLOBAL_REGION), self.available)
    }

    pub fn workspace_region(&self, workspace: Option<&str>) -> FileKvStore {
        FileKvStore::new(
            self.regions_dir.join(Self::region_name(workspace)),
            self.available,
        )
    }

    /// Delete `*.tmp.*` files older than an hour left behind by interrupted writes
    ///
    /// Returns (deleted_count, scanned_count, hit_limit)
    pub fn cleanup_stale_temps(&self) -> io::Result<(usize, usize, bool)> {
        if !self.available || !self.regions_dir.exists() {
            return Ok((0, 0, false));
        }

        let mut scanned = 0;
        let mut deleted = 0;
        let now = SystemTime::now();

        for entry in walkdir::WalkDir::new(&self.regions_dir)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if scanned >= CLEANUP_SCAN_LIMIT {
                tracing::warn!(
                    limit = CLEANUP_SCAN_LIMIT,
                    dir = %self.regions_dir.display(),
                    "hit cleanup scan limit"
                );
                return Ok((deleted, scanned, true));
            }

            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            scanned += 1;

            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.contains(".tmp."));
            if !is_temp {
                continue;
            }

            let age = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok());

            if matches!(age, Some(age) if age > CLEANUP_AGE_THRESHOLD) {
                match fs::remove_file(path) {
                    Ok(()) => deleted += 1,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to delete stale temp file")
                    }
                }
            }
        }

        Ok((deleted, scanned, false))
    }
}
