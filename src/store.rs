//! Key-value persistence for sessions and aggregates.
//!
//! The store holds one JSON object. Every primitive is atomic per call: a
//! `set` with several keys either lands completely or not at all.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{MonitorError, Result};

pub type StoreMap = Map<String, Value>;

pub const STORE_SCHEMA_VERSION: u64 = 1;

pub mod keys {
    pub const VERSION: &str = "version";
    pub const SESSIONS: &str = "sessions";
    pub const GLOBAL_STATS: &str = "globalStats";
    pub const MODE_STATS: &str = "modeStats";
    pub const DAILY_STATS: &str = "dailyStats";
    pub const TODAY_TOKENS: &str = "todayTokens";
}

pub trait KeyValueStore {
    /// Returns the requested keys that exist, or everything for `None`.
    fn get(&self, keys: Option<&[&str]>) -> Result<StoreMap>;
    fn set(&mut self, items: StoreMap) -> Result<()>;
    fn remove(&mut self, keys: &[&str]) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
    fn bytes_in_use(&self, keys: Option<&[&str]>) -> Result<u64>;

    /// Exclusive writer lock held across a read-modify-write cycle. Stores
    /// that are never shared return `None`.
    fn writer_lock(&self) -> Result<Option<WriterLock>> {
        Ok(None)
    }
}

/// Process-local store, mostly for tests and one-shot runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: StoreMap,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: Option<&[&str]>) -> Result<StoreMap> {
        Ok(select(&self.data, keys))
    }

    fn set(&mut self, items: StoreMap) -> Result<()> {
        self.data.extend(items);
        Ok(())
    }

    fn remove(&mut self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.data.remove(*key);
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }

    fn bytes_in_use(&self, keys: Option<&[&str]>) -> Result<u64> {
        serialized_size(&self.data, keys)
    }
}

/// Store persisted as a single JSON file, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    exclusive_writer: bool,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let lock_path = path.with_extension("lock");
        Ok(Self {
            path,
            lock_path,
            exclusive_writer: true,
        })
    }

    pub fn with_exclusive_writer(mut self, enabled: bool) -> Self {
        self.exclusive_writer = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<StoreMap> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StoreMap::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(StoreMap::new());
        }
        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => Ok(map),
            other => Err(MonitorError::Store {
                key: "<root>".to_string(),
                message: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
        }
    }

    fn write_all(&self, data: &StoreMap) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, data)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        debug!(path = %self.path.display(), keys = data.len(), "store written");
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, keys: Option<&[&str]>) -> Result<StoreMap> {
        let data = self.read_all()?;
        Ok(select(&data, keys))
    }

    fn set(&mut self, items: StoreMap) -> Result<()> {
        let mut data = self.read_all()?;
        data.extend(items);
        self.write_all(&data)
    }

    fn remove(&mut self, keys: &[&str]) -> Result<()> {
        let mut data = self.read_all()?;
        for key in keys {
            data.remove(*key);
        }
        self.write_all(&data)
    }

    fn clear(&mut self) -> Result<()> {
        self.write_all(&StoreMap::new())
    }

    fn bytes_in_use(&self, keys: Option<&[&str]>) -> Result<u64> {
        serialized_size(&self.read_all()?, keys)
    }

    fn writer_lock(&self) -> Result<Option<WriterLock>> {
        if !self.exclusive_writer {
            return Ok(None);
        }
        WriterLock::acquire(&self.lock_path).map(Some)
    }
}

/// Advisory exclusive lock on a sidecar file; released on drop.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
    path: PathBuf,
}

impl WriterLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive().map_err(|source| MonitorError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The store was empty and now holds the default schema.
    Seeded,
    /// Data without a version stamp was marked as the current version.
    Stamped,
    Migrated { from: u64 },
    Current,
}

/// Seeds defaults into an empty store and brings the schema version up to
/// date.
pub fn init(store: &mut dyn KeyValueStore) -> Result<InitOutcome> {
    let data = store.get(None)?;
    if data.is_empty() {
        store.set(default_items())?;
        info!("store initialized with defaults");
        return Ok(InitOutcome::Seeded);
    }

    let version = data.get(keys::VERSION).and_then(Value::as_u64);
    match version {
        None => {
            store.set(single(keys::VERSION, Value::from(STORE_SCHEMA_VERSION)))?;
            Ok(InitOutcome::Stamped)
        }
        Some(from) if from < STORE_SCHEMA_VERSION => {
            info!(from, to = STORE_SCHEMA_VERSION, "migrating store schema");
            store.set(single(keys::VERSION, Value::from(STORE_SCHEMA_VERSION)))?;
            Ok(InitOutcome::Migrated { from })
        }
        Some(_) => Ok(InitOutcome::Current),
    }
}

pub fn default_items() -> StoreMap {
    let mut items = StoreMap::new();
    items.insert(keys::VERSION.to_string(), Value::from(STORE_SCHEMA_VERSION));
    items.insert(
        keys::GLOBAL_STATS.to_string(),
        serde_json::json!({
            "totalTokens": 0,
            "inputTokens": 0,
            "outputTokens": 0,
            "totalTurns": 0
        }),
    );
    items.insert(keys::MODE_STATS.to_string(), Value::Object(Map::new()));
    items.insert(keys::DAILY_STATS.to_string(), Value::Object(Map::new()));
    items.insert(keys::SESSIONS.to_string(), Value::Object(Map::new()));
    items.insert(keys::TODAY_TOKENS.to_string(), Value::from(0));
    items
}

/// Decodes one key, treating a missing or null value as the type's default.
pub fn read_key<T>(data: &StoreMap, key: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match data.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|err| MonitorError::Store {
                key: key.to_string(),
                message: err.to_string(),
            })
        }
    }
}

fn single(key: &str, value: Value) -> StoreMap {
    let mut map = StoreMap::new();
    map.insert(key.to_string(), value);
    map
}

fn select(data: &StoreMap, keys: Option<&[&str]>) -> StoreMap {
    match keys {
        None => data.clone(),
        Some(keys) => keys
            .iter()
            .filter_map(|key| {
                data.get(*key)
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect(),
    }
}

fn serialized_size(data: &StoreMap, keys: Option<&[&str]>) -> Result<u64> {
    let mut total = 0u64;
    for (key, value) in select(data, keys) {
        total += key.len() as u64 + serde_json::to_string(&value)?.len() as u64;
    }
    Ok(total)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
