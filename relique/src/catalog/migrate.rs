//! Forward-only schema migrations tracked with `PRAGMA user_version`.

use crate::catalog::connection::DbPool;
use crate::utils::{Error, Result, ResultExt};

/// Schema steps in order. Step `n` brings the database to version `n + 1`.
const MIGRATIONS: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS jobs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  uuid TEXT NOT NULL UNIQUE,
  kind TEXT NOT NULL CHECK(kind IN ('backup','restore')),
  mode TEXT CHECK(mode IN ('full','incremental')),
  status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','active','success','incomplete','error')),
  done INTEGER NOT NULL DEFAULT 0,
  start_time TEXT,
  end_time TEXT,
  module_type TEXT NOT NULL,
  module_name TEXT NOT NULL,
  client_name TEXT NOT NULL,
  repo_name TEXT NOT NULL,
  previous_job_uuid TEXT,
  restore_image_uuid TEXT,
  custom_restore_paths TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_jobs_lookup ON jobs(client_name, module_type, mode, done);

CREATE TABLE IF NOT EXISTS images (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  uuid TEXT NOT NULL UNIQUE REFERENCES jobs(uuid),
  created_at TEXT NOT NULL,
  module_type TEXT NOT NULL,
  module_name TEXT NOT NULL,
  client_name TEXT NOT NULL,
  repo_name TEXT NOT NULL,
  number_of_elements INTEGER NOT NULL DEFAULT 0,
  number_of_files INTEGER NOT NULL DEFAULT 0,
  number_of_folders INTEGER NOT NULL DEFAULT 0,
  size_on_disk INTEGER NOT NULL DEFAULT 0
);
"#,
    r#"
CREATE INDEX IF NOT EXISTS idx_images_lookup ON images(client_name, module_type);
"#,
];

/// Bring the schema to the latest version. Running it again is a no-op.
pub fn migrate(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get()?;

    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let latest = MIGRATIONS.len() as i64;
    if current > latest {
        return Err(Error::Fatal(format!(
            "catalog schema version {current} is newer than this build ({latest})"
        )));
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as i64 + 1;
        tracing::info!(version, "Applying catalog migration");

        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("apply catalog migration {version}"))?;
        // PRAGMA does not accept bound parameters
        tx.execute_batch(&format!("PRAGMA user_version = {version}"))?;
        tx.commit()?;
    }

    tracing::debug!(version = latest, "Catalog schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::connection::create_pool;
    use tempfile::TempDir;

    fn user_version(pool: &DbPool) -> i64 {
        pool.get()
            .unwrap()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(&dir.path().join("relique.sqlite")).unwrap();

        migrate(&pool).unwrap();
        assert_eq!(user_version(&pool), MIGRATIONS.len() as i64);
        migrate(&pool).unwrap();
        assert_eq!(user_version(&pool), MIGRATIONS.len() as i64);

        let tables: i64 = pool
            .get()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('jobs', 'images')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(&dir.path().join("relique.sqlite")).unwrap();
        pool.get()
            .unwrap()
            .execute_batch("PRAGMA user_version = 99")
            .unwrap();

        let err = migrate(&pool).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Fatal);
    }
}
