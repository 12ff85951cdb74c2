//! Per-job catalog bundle: `${catalog_root}/${uuid}/`.
//!
//! Holds the exact client, module and repository a job ran with, plus its
//! merged statistics once it has finished.

use crate::client::Client;
use crate::module::Module;
use crate::repository::Repository;
use crate::sync::SyncStats;
use crate::utils::{Error, Result, ResultExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const MODULE_FILE: &str = "module.toml";
pub const CLIENT_FILE: &str = "client.toml";
pub const REPOSITORY_FILE: &str = "repo.toml";
pub const STATS_FILE: &str = "stats.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogBundle {
    dir: PathBuf,
}

impl CatalogBundle {
    pub fn new(catalog_root: &Path, uuid: &Uuid) -> Self {
        Self {
            dir: catalog_root.join(uuid.to_string()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_entities(
        &self,
        module: &Module,
        client: &Client,
        repository: &Repository,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create catalog bundle {}", self.dir.display()))?;
        self.write(MODULE_FILE, module)?;
        self.write(CLIENT_FILE, client)?;
        self.write(REPOSITORY_FILE, repository)
    }

    pub fn write_stats(&self, stats: &SyncStats) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create catalog bundle {}", self.dir.display()))?;
        self.write(STATS_FILE, stats)
    }

    pub fn module(&self) -> Result<Module> {
        self.read(MODULE_FILE)
    }

    pub fn client(&self) -> Result<Client> {
        self.read(CLIENT_FILE)
    }

    pub fn repository(&self) -> Result<Repository> {
        self.read(REPOSITORY_FILE)
    }

    /// Merged statistics, absent until the job has finished.
    pub fn stats(&self) -> Result<Option<SyncStats>> {
        match self.read(STATS_FILE) {
            Ok(stats) => Ok(Some(stats)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and flush to disk before returning.
    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let content = toml::to_string(value).with_context(|| format!("serialize {name}"))?;

        let mut file =
            File::create(&path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        file.sync_all()
            .with_context(|| format!("flush {}", path.display()))?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("catalog file {}", path.display())))
            }
            Err(e) => return Err(Error::from(e).context(format!("read {}", path.display()))),
        };
        let value = toml::from_str(&content).with_context(|| format!("parse {}", path.display()))?;
        Ok(value)
    }
}
