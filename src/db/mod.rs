pub mod migrations;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared database connection. rusqlite is synchronous, so every access goes
/// through `tokio::task::spawn_blocking`.
pub type DbPool = Arc<Mutex<Connection>>;

/// Open (or create) `{data_dir}/chathub.db`, enable WAL and foreign keys, and
/// bring the schema up to date.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("chathub.db");
    let mut conn = Connection::open(&db_path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database with the full schema, for tests.
#[cfg(test)]
pub fn init_memory_db() -> DbPool {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    migrations::migrations().to_latest(&mut conn).unwrap();
    Arc::new(Mutex::new(conn))
}
