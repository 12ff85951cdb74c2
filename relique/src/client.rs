//! Client hosts reachable over ssh, with the modules configured for them.

use crate::module::Module;
use crate::utils::{slug, Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub name: String,

    /// Hostname or IP the ssh transport connects to
    pub address: String,

    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(default)]
    pub modules: Vec<Module>,
}

fn default_ssh_user() -> String {
    "relique".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl Client {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            modules: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Invalid("client: empty name".into()));
        }
        if self.address.trim().is_empty() {
            return Err(Error::Invalid(format!("client '{}': empty address", self.name)));
        }
        Ok(())
    }

    /// Clients are identified by name; two records with the same name
    /// describe the same host even if other fields differ.
    pub fn same_entity(&self, other: &Client) -> bool {
        self.name == other.name
    }

    /// `ssh_user@address:path`, the remote form understood by rsync.
    pub fn remote(&self, path: &str) -> String {
        format!("{}@{}:{}", self.ssh_user, self.address, path)
    }

    pub fn module(&self, name: &str) -> Result<&Module> {
        self.modules
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::NotFound(format!("module '{}' on client '{}'", name, self.name)))
    }

    /// Parse a client record as-is, without template defaults.
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read client file {}", path.display()))?;
        let client: Client = toml::from_str(&content)
            .with_context(|| format!("parse client file {}", path.display()))?;
        Ok(client)
    }

    /// Load a client configuration file.
    ///
    /// Each module receives the defaults of its installed template. Modules
    /// that are invalid or whose template cannot be read are dropped with an
    /// error log; the client itself must be valid.
    pub fn load_from_file(path: &Path, install_root: &Path) -> Result<Self> {
        let mut client = Client::read(path)?;
        client
            .validate()
            .with_context(|| format!("load client file {}", path.display()))?;

        let modules = std::mem::take(&mut client.modules);
        for mut module in modules {
            let loaded = module
                .validate()
                .and_then(|_| module.load_default_configuration(install_root));
            match loaded {
                Ok(()) => client.modules.push(module),
                Err(e) => {
                    tracing::error!(
                        client = %client.name,
                        module = %module.name,
                        error = %e,
                        "Dropping invalid module"
                    );
                }
            }
        }

        Ok(client)
    }

    /// Load every `*.toml` client file in `dir`, sorted by name.
    pub fn load_from_dir(dir: &Path, install_root: &Path) -> Result<Vec<Self>> {
        let mut clients = Vec::new();
        for path in toml_files(dir)? {
            clients.push(Client::load_from_file(&path, install_root)?);
        }
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clients)
    }

    /// Write this client to `${dir}/${slug(name)}.toml`.
    pub fn write_config(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!("{}.toml", slug(&self.name)));
        let content = toml::to_string(self)?;
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

/// `*.toml` files directly inside `dir`, in directory order.
pub(crate) fn toml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("toml") {
            files.push(path);
        }
    }
    Ok(files)
}
