use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rusqlite::config::DbConfig;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use time::OffsetDateTime;

use crate::config::{ConfigPaths, StorageOptions, ThemeName};

mod records;
mod schema;

pub use records::{Attachment, AttachmentKind, NoteRecord, Priority, TodoRecord};

pub const NOTES_KEY: &str = "notes";
pub const TODOS_KEY: &str = "todos";
pub const THEME_KEY: &str = "theme";
pub const PENDING_UNDO_KEY: &str = "pendingUndo";

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .with_context(|| format!("reading key {key}"))
        })
    }

    pub fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        if value.len() > self.options.max_value_bytes {
            bail!(
                "value for {key} is {} bytes, over the {} byte quota",
                value.len(),
                self.options.max_value_bytes
            );
        }
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .with_context(|| format!("writing key {key}"))?;
            Ok(())
        })
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        self.with_connection(|conn| {
            let removed = conn
                .execute("DELETE FROM kv WHERE key = ?1", [key])
                .with_context(|| format!("removing key {key}"))?;
            Ok(removed > 0)
        })
    }

    /// Reads and decodes `key`, falling back to `default` when the key is
    /// missing or unreadable. Failures are logged, never returned.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get_raw(key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(err) => {
                    tracing::error!(?err, key, "stored value is not valid json");
                    default
                }
            },
            Ok(None) => default,
            Err(err) => {
                tracing::error!(?err, key, "failed to read from storage");
                default
            }
        }
    }

    pub fn try_set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).with_context(|| format!("serializing {key}"))?;
        self.put_raw(key, &raw)
    }

    /// Encodes and stores `value`. Returns `false` when the write failed so
    /// callers can surface a retry message.
    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match self.try_set_json(key, value) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(?err, key, "failed to save to storage");
                false
            }
        }
    }

    pub fn load_notes(&self) -> Vec<NoteRecord> {
        self.get_json(NOTES_KEY, Vec::new())
    }

    pub fn save_notes(&self, notes: &[NoteRecord]) -> bool {
        self.set_json(NOTES_KEY, notes)
    }

    pub fn load_todos(&self) -> Vec<TodoRecord> {
        self.get_json(TODOS_KEY, Vec::new())
    }

    pub fn save_todos(&self, todos: &[TodoRecord]) -> bool {
        self.set_json(TODOS_KEY, todos)
    }

    pub fn saved_theme(&self) -> Option<ThemeName> {
        match self.get_raw(THEME_KEY) {
            Ok(Some(raw)) => match ThemeName::from_str(raw.trim()) {
                Ok(theme) => Some(theme),
                Err(_) => {
                    tracing::warn!(%raw, "ignoring unknown stored theme");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::error!(?err, "failed to read theme");
                None
            }
        }
    }

    pub fn save_theme(&self, theme: ThemeName) -> bool {
        match self.put_raw(THEME_KEY, theme.as_ref()) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(?err, "failed to save theme");
                false
            }
        }
    }
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> Result<StorageHandle> {
    let db_path = if storage.database_path.as_os_str().is_empty() {
        &paths.database_path
    } else {
        &storage.database_path
    };
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    tracing::debug!(path = %db_path.display(), "storage ready");
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)
        .context("enabling foreign keys")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}
