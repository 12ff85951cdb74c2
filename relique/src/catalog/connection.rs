use crate::utils::{Result, ResultExt};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open the catalog database, creating its folder if needed.
pub fn create_pool(db_file: &Path) -> Result<DbPool> {
    if let Some(parent) = db_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database folder {}", parent.display()))?;
    }

    // Pragmas are per connection, so they run on every pooled connection
    let manager = SqliteConnectionManager::file(db_file).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = DELETE;
             PRAGMA synchronous = FULL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .with_context(|| format!("open catalog database {}", db_file.display()))?;

    Ok(pool)
}
