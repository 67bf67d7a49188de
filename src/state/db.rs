// SQLite database setup and migrations
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;

const DB_FILE_NAME: &str = "vocal_notes.db";

// Thread-safe database connection wrapper
#[derive(Clone)]
pub struct DbConnection {
    conn: Arc<Mutex<Connection>>,
}

impl DbConnection {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Fresh in-memory database with the schema applied
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self::new(conn))
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        // Recover from a poisoned lock
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Open (or create) the database inside `data_dir` and apply migrations
pub fn init_db(data_dir: &Path) -> DbResult<DbConnection> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(DB_FILE_NAME);

    let conn = Connection::open(&db_path)?;
    run_migrations(&conn)?;

    log::info!("Database ready at {}", db_path.display());
    Ok(DbConnection::new(conn))
}

fn run_migrations(conn: &Connection) -> DbResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version < 1 {
        migration_v1(conn)?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])?;
    }

    Ok(())
}

fn migration_v1(conn: &Connection) -> DbResult<()> {
    // One analysis per (user, source) pair
    conn.execute(
        "CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL,
            vocals_path TEXT NOT NULL,
            vocals_sha256 TEXT NOT NULL,
            frame_count INTEGER NOT NULL,
            note_count INTEGER NOT NULL,
            notes_json TEXT NOT NULL,
            UNIQUE (user_id, source_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_analyses_user_created
         ON analyses(user_id, created_at DESC)",
        [],
    )?;

    Ok(())
}
