//! SQLite storage shared by the image registry and the namespace catalog.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Cloneable handle to one SQLite connection.
///
/// The connection is only locked for the length of a statement or a
/// transaction and never across an `.await`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        info!("Database initialized at: {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Invariant("Database lock poisoned".to_string()))
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    // One row per distinct original image reference
    conn.execute(
        "CREATE TABLE IF NOT EXISTS images (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            original    TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL
        )",
        [],
    )?;

    // Size-specific outputs; an unprocessed row is the claim on its key
    conn.execute(
        "CREATE TABLE IF NOT EXISTS renditions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            image_id    INTEGER NOT NULL,
            width       INTEGER NOT NULL,
            height      INTEGER NOT NULL,
            webp        INTEGER NOT NULL,
            kind        TEXT NOT NULL,
            processed   INTEGER NOT NULL DEFAULT 0,
            path        TEXT NOT NULL,
            format      TEXT,
            out_width   INTEGER,
            out_height  INTEGER,
            created_at  TEXT NOT NULL,
            UNIQUE(image_id, width, height, webp, kind),
            FOREIGN KEY(image_id) REFERENCES images(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_renditions_processed
         ON renditions(processed)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS namespaces (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id   INTEGER,
            slug        TEXT NOT NULL,
            path        TEXT NOT NULL UNIQUE,
            FOREIGN KEY(parent_id) REFERENCES namespaces(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS emotes (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            namespace_id  INTEGER NOT NULL,
            slug          TEXT NOT NULL,
            image         TEXT NOT NULL,
            type          TEXT NOT NULL,
            UNIQUE(namespace_id, slug),
            FOREIGN KEY(namespace_id) REFERENCES namespaces(id) ON DELETE CASCADE
        )",
        [],
    )?;

    Ok(())
}
