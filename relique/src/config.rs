//! Configuration management for the relique core.
//!
//! The root TOML file points at the client and repository directories, the
//! module install root and the catalog locations. Relative paths are resolved
//! against the directory holding the root file. The result is immutable once
//! loaded and is threaded explicitly through the loaders that need it.

use crate::client::Client;
use crate::repository::{self, Repository, Storage};
use crate::utils::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name used when `db_path` designates a directory.
pub const DB_FILE_NAME: &str = "relique.sqlite";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Directory of client definitions
    #[serde(default = "default_client_cfg_path")]
    pub client_cfg_path: PathBuf,

    /// Directory of repository definitions
    #[serde(default = "default_repo_cfg_path")]
    pub repo_cfg_path: PathBuf,

    /// Root of installed module templates
    #[serde(default = "default_module_install_path")]
    pub module_install_path: PathBuf,

    /// Catalog database file, or a directory that receives `relique.sqlite`
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root of per-job catalog bundles
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// rsync binary
    #[serde(default = "default_rsync_path")]
    pub rsync_path: PathBuf,

    /// ssh binary, used for the reachability check and as rsync's remote shell
    #[serde(default = "default_ssh_path")]
    pub ssh_path: PathBuf,

    /// Seconds between two progress reports of a running job
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// ssh ConnectTimeout of the reachability check
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// Default values
fn default_client_cfg_path() -> PathBuf {
    PathBuf::from("clients")
}

fn default_repo_cfg_path() -> PathBuf {
    PathBuf::from("repositories")
}

fn default_module_install_path() -> PathBuf {
    PathBuf::from("/var/lib/relique/modules")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("db")
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog")
}

fn default_rsync_path() -> PathBuf {
    PathBuf::from("rsync")
}

fn default_ssh_path() -> PathBuf {
    PathBuf::from("ssh")
}

fn default_heartbeat_interval_secs() -> u64 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rsync_path: default_rsync_path(),
            ssh_path: default_ssh_path(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl SyncConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            client_cfg_path: default_client_cfg_path(),
            repo_cfg_path: default_repo_cfg_path(),
            module_install_path: default_module_install_path(),
            db_path: default_db_path(),
            catalog_path: default_catalog_path(),
            sync: SyncConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load the root configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read configuration {}", path.display()))?;
        let mut config: CoreConfig = toml::from_str(&content)
            .with_context(|| format!("parse configuration {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_relative_to(base);
        Ok(config)
    }

    /// Default layout rooted at `root`: every relative default lands below it
    /// and module templates are read from `${root}/modules`.
    pub fn rooted_at(root: &Path) -> Self {
        let mut config = CoreConfig {
            module_install_path: PathBuf::from("modules"),
            ..CoreConfig::default()
        };
        config.resolve_relative_to(root);
        config
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for path in [
            &mut self.client_cfg_path,
            &mut self.repo_cfg_path,
            &mut self.module_install_path,
            &mut self.db_path,
            &mut self.catalog_path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Catalog database file. A `db_path` without extension is a directory.
    pub fn db_file(&self) -> PathBuf {
        if self.db_path.is_dir() || self.db_path.extension().is_none() {
            self.db_path.join(DB_FILE_NAME)
        } else {
            self.db_path.clone()
        }
    }
}

/// Core configuration together with the clients and repositories it names.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub core: CoreConfig,
    pub clients: Vec<Client>,
    pub repositories: Vec<Repository>,
}

impl Configuration {
    /// Load clients and repositories. Missing directories yield empty lists.
    pub fn load(core: CoreConfig) -> Result<Self> {
        let clients = if core.client_cfg_path.is_dir() {
            Client::load_from_dir(&core.client_cfg_path, &core.module_install_path)?
        } else {
            tracing::warn!(path = %core.client_cfg_path.display(), "Client directory not found");
            Vec::new()
        };

        let repositories = if core.repo_cfg_path.is_dir() {
            Repository::load_from_dir(&core.repo_cfg_path)?
        } else {
            tracing::warn!(path = %core.repo_cfg_path.display(), "Repository directory not found");
            Vec::new()
        };

        let config = Configuration {
            core,
            clients,
            repositories,
        };
        config.validate()?;

        tracing::info!(
            clients = config.clients.len(),
            repositories = config.repositories.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for client in &self.clients {
            client.validate()?;
        }
        for (i, client) in self.clients.iter().enumerate() {
            if self.clients[..i].iter().any(|c| c.same_entity(client)) {
                return Err(Error::Invalid(format!(
                    "clients: duplicate name '{}'",
                    client.name
                )));
            }
        }
        repository::validate_set(&self.repositories)
    }

    pub fn client(&self, name: &str) -> Result<&Client> {
        self.clients
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::NotFound(format!("client '{name}'")))
    }

    /// Named repository, or the default one when `name` is `None`.
    pub fn repository(&self, name: Option<&str>) -> Result<&Repository> {
        match name {
            Some(name) => repository::find_by_name(&self.repositories, name),
            None => repository::find_default(&self.repositories),
        }
    }

    /// Opaque digest of the loaded clients and repositories.
    pub fn version(&self) -> String {
        let mut hasher = DefaultHasher::new();
        for client in &self.clients {
            toml::to_string(client).unwrap_or_default().hash(&mut hasher);
        }
        for repository in &self.repositories {
            repository.name().hash(&mut hasher);
            toml::to_string(repository).unwrap_or_default().hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }
}
