//! `images` relation.

use crate::catalog::filter::{ImageFilter, Page};
use crate::catalog::jobs::{parse_time, parse_uuid};
use crate::client::Client;
use crate::image::Image;
use crate::module::Module;
use crate::repository::{Repository, Storage};
use crate::utils::Result;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRow {
    pub id: i64,
    pub uuid: String,
    pub created_at: String,
    pub module_type: String,
    pub module_name: String,
    pub client_name: String,
    pub repo_name: String,
    pub number_of_elements: i64,
    pub number_of_files: i64,
    pub number_of_folders: i64,
    pub size_on_disk: i64,
}

fn row_to_image(row: &Row) -> rusqlite::Result<ImageRow> {
    Ok(ImageRow {
        id: row.get("id")?,
        uuid: row.get("uuid")?,
        created_at: row.get("created_at")?,
        module_type: row.get("module_type")?,
        module_name: row.get("module_name")?,
        client_name: row.get("client_name")?,
        repo_name: row.get("repo_name")?,
        number_of_elements: row.get("number_of_elements")?,
        number_of_files: row.get("number_of_files")?,
        number_of_folders: row.get("number_of_folders")?,
        size_on_disk: row.get("size_on_disk")?,
    })
}

fn to_count(n: i64) -> u64 {
    n.max(0) as u64
}

impl ImageRow {
    pub fn from_image(image: &Image) -> Self {
        ImageRow {
            id: image.id.unwrap_or_default(),
            uuid: image.uuid.to_string(),
            created_at: image.created_at.to_rfc3339(),
            module_type: image.module.module_type.clone(),
            module_name: image.module.name.clone(),
            client_name: image.client.name.clone(),
            repo_name: image.repository.name().to_string(),
            number_of_elements: image.number_of_elements as i64,
            number_of_files: image.number_of_files as i64,
            number_of_folders: image.number_of_folders as i64,
            size_on_disk: image.size_on_disk as i64,
        }
    }

    pub fn into_image(self, client: Client, module: Module, repository: Repository) -> Result<Image> {
        let uuid = parse_uuid(&self.uuid)?;
        let storage_path = repository.storage_path(&uuid)?;
        Ok(Image {
            id: Some(self.id),
            uuid,
            created_at: parse_time(&self.created_at)?,
            client,
            module,
            repository,
            number_of_elements: to_count(self.number_of_elements),
            number_of_files: to_count(self.number_of_files),
            number_of_folders: to_count(self.number_of_folders),
            size_on_disk: to_count(self.size_on_disk),
            storage_path,
        })
    }
}

pub fn upsert(conn: &Connection, row: &ImageRow) -> Result<i64> {
    conn.execute(
        "INSERT INTO images (uuid, created_at, module_type, module_name, client_name, repo_name, number_of_elements, number_of_files, number_of_folders, size_on_disk)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(uuid) DO UPDATE SET
           created_at = excluded.created_at,
           module_type = excluded.module_type,
           module_name = excluded.module_name,
           client_name = excluded.client_name,
           repo_name = excluded.repo_name,
           number_of_elements = excluded.number_of_elements,
           number_of_files = excluded.number_of_files,
           number_of_folders = excluded.number_of_folders,
           size_on_disk = excluded.size_on_disk",
        params![
            row.uuid,
            row.created_at,
            row.module_type,
            row.module_name,
            row.client_name,
            row.repo_name,
            row.number_of_elements,
            row.number_of_files,
            row.number_of_folders,
            row.size_on_disk,
        ],
    )?;

    let id = conn.query_row(
        "SELECT id FROM images WHERE uuid = ?",
        params![row.uuid],
        |r| r.get(0),
    )?;
    Ok(id)
}

pub fn find_by_uuid(conn: &Connection, uuid: &str) -> Result<Option<ImageRow>> {
    let row = conn
        .query_row("SELECT * FROM images WHERE uuid = ?", params![uuid], row_to_image)
        .optional()?;
    Ok(row)
}

pub fn search(conn: &Connection, filter: &ImageFilter, page: Page) -> Result<Vec<ImageRow>> {
    let conditions = filter.conditions();
    let (limit, offset) = page.bounds();
    let sql = format!(
        "SELECT * FROM images{} ORDER BY id DESC LIMIT ? OFFSET ?",
        conditions.sql()
    );

    let extra: [&dyn ToSql; 2] = [&limit, &offset];
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(conditions.params(&extra).as_slice(), row_to_image)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn count(conn: &Connection, filter: &ImageFilter) -> Result<u64> {
    let conditions = filter.conditions();
    let sql = format!("SELECT COUNT(*) FROM images{}", conditions.sql());
    let count: i64 = conn.query_row(&sql, conditions.params(&[]).as_slice(), |r| r.get(0))?;
    Ok(to_count(count))
}
