//! Structured tier: SQLite-backed record store.
//!
//! Records live in a single table keyed by storage key. Every write runs in
//! its own transaction, so a record is replaced as a whole or not at all.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::models::StorageRecord;
use crate::storage::{Capability, StorageDriver, StorageKey, Tier};
use crate::{Error, Result};

/// SQLite record store.
pub struct SqliteDriver {
    /// Database file, or `None` for an in-memory database
    path: Option<PathBuf>,
    /// Lazily opened connection
    conn: Mutex<Option<Connection>>,
    /// Set when the driver has been switched off by configuration
    disabled: bool,
}

impl SqliteDriver {
    /// Driver over the database file at `path`. Nothing is opened until first use.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            conn: Mutex::new(None),
            disabled: false,
        }
    }

    /// Driver over a private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            conn: Mutex::new(None),
            disabled: false,
        }
    }

    /// Driver that always reports itself unavailable.
    pub fn disabled() -> Self {
        Self {
            path: None,
            conn: Mutex::new(None),
            disabled: true,
        }
    }

    /// Database path, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connect(&self) -> Result<Connection> {
        let conn = match &self.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings_records (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                checksum TEXT NOT NULL,
                written_at TEXT NOT NULL
            );
            "#,
        )?;

        Self::run_migrations(conn)?;
        Ok(())
    }

    /// Run database migrations for schema changes.
    fn run_migrations(conn: &Connection) -> Result<()> {
        // Databases created before writer tracking lack the column
        let has_writer: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('settings_records') WHERE name = 'writer'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !has_writer {
            conn.execute("ALTER TABLE settings_records ADD COLUMN writer TEXT", [])?;
        }

        Ok(())
    }

    /// Run `f` against the connection, opening it on first use.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        if self.disabled {
            return Err(Error::StorageUnavailable(
                "structured storage is disabled".to_string(),
            ));
        }
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| Error::Other("sqlite connection lock poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(Error::StorageUnavailable(
                "sqlite connection not open".to_string(),
            )),
        }
    }

    fn probe(conn: &mut Connection) -> Result<()> {
        let status: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if status != "ok" {
            return Err(Error::StorageUnavailable(format!(
                "integrity check failed: {}",
                status
            )));
        }

        // Prove the database is writable without touching stored records
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO settings_records (key, payload, checksum, written_at) \
             VALUES ('ballast.__probe__', '', '', '')",
            [],
        )?;
        tx.rollback()?;
        Ok(())
    }
}

impl StorageDriver for SqliteDriver {
    fn capability_check(&self) -> Capability {
        match self.with_conn(Self::probe) {
            Ok(()) => Capability::Available,
            Err(e) => Capability::Unavailable(e.to_string()),
        }
    }

    fn read(&self, key: &StorageKey) -> Result<Option<StorageRecord>> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT payload, checksum, written_at, writer FROM settings_records WHERE key = ?1",
                    params![key.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                        ))
                    },
                )
                .optional()?)
        })?;

        let Some((payload, checksum, written_at, writer)) = row else {
            return Ok(None);
        };
        // The checksum covers the payload only; a damaged timestamp is not fatal
        let written_at = match DateTime::parse_from_rfc3339(&written_at) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                warn!(%key, error = %e, "Unreadable written_at on settings record");
                DateTime::<Utc>::default()
            }
        };

        Ok(Some(StorageRecord {
            payload,
            checksum,
            written_at,
            writer,
        }))
    }

    fn write(&self, key: &StorageKey, record: &StorageRecord) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR REPLACE INTO settings_records (key, payload, checksum, written_at, writer) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    key.as_str(),
                    record.payload,
                    record.checksum,
                    record.written_at.to_rfc3339(),
                    record.writer,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        debug!(key = %key, bytes = record.payload.len(), "Wrote record to sqlite");
        Ok(())
    }

    fn tier(&self) -> Tier {
        Tier::Structured
    }

    fn location(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None if self.disabled => "disabled".to_string(),
            None => ":memory:".to_string(),
        }
    }

    fn driver_type(&self) -> &'static str {
        "sqlite"
    }
}
