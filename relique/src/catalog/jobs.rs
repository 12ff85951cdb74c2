//! `jobs` relation.

use crate::catalog::filter::{JobFilter, Page};
use crate::client::Client;
use crate::job::{Job, JobKind, JobStatus};
use crate::module::{BackupMode, Module};
use crate::repository::{Repository, Storage};
use crate::sync::SyncStats;
use crate::utils::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

/// Indexed columns of a job. Entities live in the catalog bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: i64,
    pub uuid: String,
    pub kind: String,
    pub mode: Option<String>,
    pub status: String,
    pub done: bool,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub module_type: String,
    pub module_name: String,
    pub client_name: String,
    pub repo_name: String,
    pub previous_job_uuid: Option<String>,
    pub restore_image_uuid: Option<String>,
    pub custom_restore_paths: String, // JSON object stored as text
}

fn row_to_job(row: &Row) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get("id")?,
        uuid: row.get("uuid")?,
        kind: row.get("kind")?,
        mode: row.get("mode")?,
        status: row.get("status")?,
        done: row.get("done")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        module_type: row.get("module_type")?,
        module_name: row.get("module_name")?,
        client_name: row.get("client_name")?,
        repo_name: row.get("repo_name")?,
        previous_job_uuid: row.get("previous_job_uuid")?,
        restore_image_uuid: row.get("restore_image_uuid")?,
        custom_restore_paths: row.get("custom_restore_paths")?,
    })
}

pub(crate) fn parse_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| Error::Invalid(format!("uuid '{text}': {e}")))
}

pub(crate) fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Invalid(format!("timestamp '{text}': {e}")))
}

impl JobRow {
    pub fn from_job(job: &Job) -> Result<Self> {
        Ok(JobRow {
            id: job.id.unwrap_or_default(),
            uuid: job.uuid.to_string(),
            kind: job.kind.as_str().to_string(),
            mode: job
                .mode
                .filter(BackupMode::is_known)
                .map(|m| m.as_str().to_string()),
            status: job.status.as_str().to_string(),
            done: job.done,
            start_time: job.start_time.map(|t| t.to_rfc3339()),
            end_time: job.end_time.map(|t| t.to_rfc3339()),
            module_type: job.module.module_type.clone(),
            module_name: job.module.name.clone(),
            client_name: job.client.name.clone(),
            repo_name: job.repository.name().to_string(),
            previous_job_uuid: job.previous_job_uuid.map(|u| u.to_string()),
            restore_image_uuid: job.restore_image_uuid.map(|u| u.to_string()),
            custom_restore_paths: serde_json::to_string(&job.custom_restore_paths)?,
        })
    }

    /// Rebuild a job around the entities read back from its bundle.
    pub fn into_job(
        self,
        client: Client,
        module: Module,
        repository: Repository,
        stats: SyncStats,
    ) -> Result<Job> {
        Ok(Job {
            id: Some(self.id),
            uuid: parse_uuid(&self.uuid)?,
            kind: JobKind::parse(&self.kind)?,
            mode: self.mode.as_deref().map(BackupMode::parse),
            status: JobStatus::parse(&self.status)?,
            done: self.done,
            client,
            module,
            repository,
            start_time: self.start_time.as_deref().map(parse_time).transpose()?,
            end_time: self.end_time.as_deref().map(parse_time).transpose()?,
            previous_job_uuid: self.previous_job_uuid.as_deref().map(parse_uuid).transpose()?,
            restore_image_uuid: self.restore_image_uuid.as_deref().map(parse_uuid).transpose()?,
            custom_restore_paths: serde_json::from_str(&self.custom_restore_paths)?,
            tasks: Vec::new(),
            stats,
        })
    }
}

/// Insert or update the row keyed by `uuid`; returns its insertion key.
pub fn upsert(conn: &Connection, row: &JobRow) -> Result<i64> {
    conn.execute(
        "INSERT INTO jobs (uuid, kind, mode, status, done, start_time, end_time, module_type, module_name, client_name, repo_name, previous_job_uuid, restore_image_uuid, custom_restore_paths)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(uuid) DO UPDATE SET
           kind = excluded.kind,
           mode = excluded.mode,
           status = excluded.status,
           done = excluded.done,
           start_time = excluded.start_time,
           end_time = excluded.end_time,
           module_type = excluded.module_type,
           module_name = excluded.module_name,
           client_name = excluded.client_name,
           repo_name = excluded.repo_name,
           previous_job_uuid = excluded.previous_job_uuid,
           restore_image_uuid = excluded.restore_image_uuid,
           custom_restore_paths = excluded.custom_restore_paths",
        params![
            row.uuid,
            row.kind,
            row.mode,
            row.status,
            row.done,
            row.start_time,
            row.end_time,
            row.module_type,
            row.module_name,
            row.client_name,
            row.repo_name,
            row.previous_job_uuid,
            row.restore_image_uuid,
            row.custom_restore_paths,
        ],
    )?;

    let id = conn.query_row(
        "SELECT id FROM jobs WHERE uuid = ?",
        params![row.uuid],
        |r| r.get(0),
    )?;
    Ok(id)
}

pub fn find_by_uuid(conn: &Connection, uuid: &str) -> Result<Option<JobRow>> {
    let row = conn
        .query_row("SELECT * FROM jobs WHERE uuid = ?", params![uuid], row_to_job)
        .optional()?;
    Ok(row)
}

pub fn exists(conn: &Connection, uuid: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM jobs WHERE uuid = ?", params![uuid], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn search(conn: &Connection, filter: &JobFilter, page: Page) -> Result<Vec<JobRow>> {
    let conditions = filter.conditions();
    let (limit, offset) = page.bounds();
    let sql = format!(
        "SELECT * FROM jobs{} ORDER BY id DESC LIMIT ? OFFSET ?",
        conditions.sql()
    );

    let extra: [&dyn ToSql; 2] = [&limit, &offset];
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(conditions.params(&extra).as_slice(), row_to_job)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn count(conn: &Connection, filter: &JobFilter) -> Result<u64> {
    let conditions = filter.conditions();
    let sql = format!("SELECT COUNT(*) FROM jobs{}", conditions.sql());
    let count: i64 = conn.query_row(&sql, conditions.params(&[]).as_slice(), |r| r.get(0))?;
    Ok(count.max(0) as u64)
}

/// Most recent done job of `client_name`/`module_type` taken with `mode`.
pub fn find_previous(
    conn: &Connection,
    client_name: &str,
    module_type: &str,
    mode: BackupMode,
) -> Result<Option<JobRow>> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs
             WHERE client_name = ? AND module_type = ? AND mode = ? AND done = 1
             ORDER BY id DESC LIMIT 1",
            params![client_name, module_type, mode.as_str()],
            row_to_job,
        )
        .optional()?;
    Ok(row)
}

/// Close every job left unfinished; returns the uuids that were changed.
pub fn mark_interrupted(conn: &Connection, now: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT uuid FROM jobs WHERE done = 0")?;
    let uuids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    conn.execute(
        "UPDATE jobs SET status = 'error', done = 1, end_time = COALESCE(end_time, ?) WHERE done = 0",
        params![now],
    )?;
    Ok(uuids)
}
