use crate::errors::{AppError, AppResult};
use crate::models::StoreSettings;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const SCHEMA_SQL: &str = include_str!("schema.sql");

pub const SETTINGS_KEY: &str = "settings";

/// Durable string slots addressed by key.
pub trait KvStore: Send + Sync {
    fn read(&self, key: &str) -> AppResult<Option<String>>;
    fn write(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<bool>;
    fn keys(&self) -> AppResult<Vec<String>>;
}

#[derive(Debug)]
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        info!(path = %path.display(), "sqlite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

impl KvStore for SqliteKvStore {
    fn read(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM kv_entries WHERE key = ?1",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(raw)
    }

    fn write(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv_entries (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM kv_entries WHERE key = ?1", [key])?;
        Ok(changed > 0)
    }

    fn keys(&self) -> AppResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv_entries ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

/// In-process store. `set_read_only(true)` makes every write fail, which lets
/// callers observe how the app behaves when storage is unavailable.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<BTreeMap<String, String>>,
    read_only: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn entries(&self) -> AppResult<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| AppError::Internal("memory store mutex poisoned".to_string()))
    }

    fn ensure_writable(&self) -> AppResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(AppError::Persistence("store is read-only".to_string()));
        }
        Ok(())
    }
}

impl KvStore for MemoryKvStore {
    fn read(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> AppResult<()> {
        self.ensure_writable()?;
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<bool> {
        self.ensure_writable()?;
        Ok(self.entries()?.remove(key).is_some())
    }

    fn keys(&self) -> AppResult<Vec<String>> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}

/// JSON-blob persistence over a [`KvStore`].
///
/// Reads and writes never fail the caller: unreadable or unparsable content is
/// reported as absent and failed writes are logged and reported as `false`.
#[derive(Clone)]
pub struct Persistence {
    store: Arc<dyn KvStore>,
}

impl Persistence {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(%key, error = %error, "stored value could not be read");
                return None;
            }
        };
        match serde_json::from_str::<T>(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(%key, error = %error, "stored value is corrupt; ignoring");
                None
            }
        }
    }

    pub fn try_save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> AppResult<()> {
        let raw = serde_json::to_string(value)?;
        self.store.write(key, &raw)?;
        debug!(%key, bytes = raw.len(), "value persisted");
        Ok(())
    }

    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match self.try_save(key, value) {
            Ok(()) => true,
            Err(error) => {
                warn!(%key, error = %error, "value could not be persisted");
                false
            }
        }
    }

    pub fn clear(&self, key: &str) -> bool {
        match self.store.remove(key) {
            Ok(existed) => {
                debug!(%key, existed, "value cleared");
                true
            }
            Err(error) => {
                warn!(%key, error = %error, "value could not be cleared");
                false
            }
        }
    }

    pub fn get_settings(&self) -> StoreSettings {
        self.load::<StoreSettings>(SETTINGS_KEY).unwrap_or_default()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<StoreSettings> {
        let current = self.get_settings();
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: StoreSettings = serde_json::from_value(merged)?;
        self.try_save(SETTINGS_KEY, &settings)?;
        Ok(settings)
    }
}

pub(crate) fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
