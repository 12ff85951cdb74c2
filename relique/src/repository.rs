//! Repositories: named storage locations that hold job data trees.
//!
//! Only the `local` kind is understood. Records of any other kind load as a
//! [`GenericRepository`] that keeps every field so it can be carried through
//! catalog bundles untouched, but it cannot resolve storage paths.

use crate::client::toml_files;
use crate::utils::{normalize, slug, Error, Result, ResultExt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Capabilities shared by every repository kind.
pub trait Storage {
    fn name(&self) -> &str;

    fn kind(&self) -> &str;

    fn is_default(&self) -> bool;

    /// Absolute location of the data tree belonging to `uuid`.
    fn storage_path(&self, uuid: &Uuid) -> Result<PathBuf>;

    /// Serialize the record to `${to_dir}/${slug(name)}.toml`.
    fn write_config(&self, to_dir: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalRepository {
    pub name: String,
    pub path: PathBuf,
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericRepository {
    pub name: String,
    pub kind: String,
    pub default: bool,
    /// Every other key of the record
    pub fields: toml::Table,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Repository {
    Local(LocalRepository),
    Generic(GenericRepository),
}

impl Storage for LocalRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "local"
    }

    fn is_default(&self) -> bool {
        self.default
    }

    fn storage_path(&self, uuid: &Uuid) -> Result<PathBuf> {
        Ok(normalize(&self.path.join(uuid.to_string())))
    }

    fn write_config(&self, to_dir: &Path) -> Result<PathBuf> {
        write_table(&self.name, &Repository::Local(self.clone()).to_table(), to_dir)
    }
}

impl Storage for GenericRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn is_default(&self) -> bool {
        self.default
    }

    fn storage_path(&self, _uuid: &Uuid) -> Result<PathBuf> {
        Err(Error::Invalid(format!(
            "repository '{}': type '{}' has no storage path",
            self.name, self.kind
        )))
    }

    fn write_config(&self, _to_dir: &Path) -> Result<PathBuf> {
        Err(Error::Invalid(format!(
            "repository '{}': type '{}' cannot be written",
            self.name, self.kind
        )))
    }
}

impl Storage for Repository {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn kind(&self) -> &str {
        self.inner().kind()
    }

    fn is_default(&self) -> bool {
        self.inner().is_default()
    }

    fn storage_path(&self, uuid: &Uuid) -> Result<PathBuf> {
        self.inner().storage_path(uuid)
    }

    fn write_config(&self, to_dir: &Path) -> Result<PathBuf> {
        self.inner().write_config(to_dir)
    }
}

fn write_table(name: &str, table: &toml::Table, to_dir: &Path) -> Result<PathBuf> {
    let path = to_dir.join(format!("{}.toml", slug(name)));
    let content = toml::to_string(table)?;
    fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

impl Repository {
    pub fn local(name: impl Into<String>, path: impl Into<PathBuf>, default: bool) -> Self {
        Repository::Local(LocalRepository {
            name: name.into(),
            path: path.into(),
            default,
        })
    }

    fn inner(&self) -> &dyn Storage {
        match self {
            Repository::Local(r) => r as &dyn Storage,
            Repository::Generic(r) => r as &dyn Storage,
        }
    }

    /// Build a repository from a raw record, dispatching on its `type` key.
    pub fn from_table(mut table: toml::Table) -> Result<Self> {
        let name = match table.remove("name") {
            Some(toml::Value::String(s)) if !s.trim().is_empty() => s,
            _ => return Err(Error::Invalid("repository: missing name".into())),
        };
        let kind = match table.remove("type") {
            Some(toml::Value::String(s)) => s,
            _ => return Err(Error::Invalid(format!("repository '{name}': missing type"))),
        };
        let default = match table.remove("default") {
            None => false,
            Some(toml::Value::Boolean(b)) => b,
            Some(_) => {
                return Err(Error::Invalid(format!(
                    "repository '{name}': default must be a boolean"
                )))
            }
        };

        if kind == "local" {
            let path = match table.remove("path") {
                Some(toml::Value::String(s)) if !s.is_empty() => PathBuf::from(s),
                _ => return Err(Error::Invalid(format!("repository '{name}': missing path"))),
            };
            return Ok(Repository::Local(LocalRepository {
                name,
                path,
                default,
            }));
        }

        Ok(Repository::Generic(GenericRepository {
            name,
            kind,
            default,
            fields: table,
        }))
    }

    pub fn to_table(&self) -> toml::Table {
        let mut table = match self {
            Repository::Local(r) => {
                let mut t = toml::Table::new();
                t.insert(
                    "path".into(),
                    toml::Value::String(r.path.to_string_lossy().into_owned()),
                );
                t
            }
            Repository::Generic(r) => r.fields.clone(),
        };
        table.insert("name".into(), toml::Value::String(self.name().to_string()));
        table.insert("type".into(), toml::Value::String(self.kind().to_string()));
        table.insert("default".into(), toml::Value::Boolean(self.is_default()));
        table
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read repository file {}", path.display()))?;
        let table: toml::Table = toml::from_str(&content)
            .with_context(|| format!("parse repository file {}", path.display()))?;
        Repository::from_table(table).with_context(|| format!("load {}", path.display()))
    }

    /// Load every `*.toml` repository file in `dir`, sorted by name.
    pub fn load_from_dir(dir: &Path) -> Result<Vec<Self>> {
        let mut repositories = Vec::new();
        for path in toml_files(dir)? {
            repositories.push(Repository::load_from_file(&path)?);
        }
        repositories.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(repositories)
    }
}

impl Serialize for Repository {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_table().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Repository {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let table = toml::Table::deserialize(deserializer)?;
        Repository::from_table(table).map_err(serde::de::Error::custom)
    }
}

pub fn find_by_name<'a>(repositories: &'a [Repository], name: &str) -> Result<&'a Repository> {
    repositories
        .iter()
        .find(|r| r.name() == name)
        .ok_or_else(|| Error::NotFound(format!("repository '{name}'")))
}

pub fn find_default(repositories: &[Repository]) -> Result<&Repository> {
    repositories
        .iter()
        .find(|r| r.is_default())
        .ok_or_else(|| Error::NotFound("default repository".into()))
}

/// Names must be unique and at most one repository may be the default.
pub fn validate_set(repositories: &[Repository]) -> Result<()> {
    let mut seen = HashSet::new();
    for repository in repositories {
        if !seen.insert(repository.name()) {
            return Err(Error::Invalid(format!(
                "repositories: duplicate name '{}'",
                repository.name()
            )));
        }
    }

    let defaults = repositories.iter().filter(|r| r.is_default()).count();
    if defaults > 1 {
        return Err(Error::Invalid(format!(
            "repositories: {defaults} are marked as default"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_storage_path() {
        let repo = Repository::local("local", "/var/lib/relique/./storage/", true);
        let uuid = Uuid::parse_str("5f0c8a4e-3b1d-4c2e-9f7a-1d2b3c4d5e6f").unwrap();
        assert_eq!(
            repo.storage_path(&uuid).unwrap(),
            PathBuf::from("/var/lib/relique/storage/5f0c8a4e-3b1d-4c2e-9f7a-1d2b3c4d5e6f")
        );
        assert_eq!(repo.kind(), "local");
        assert!(repo.is_default());
    }

    #[test]
    fn test_local_write_and_load() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::local("Dépôt Local", "/mnt/backups", false);

        let path = repo.write_config(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("depot-local.toml"));
        assert_eq!(Repository::load_from_file(&path).unwrap(), repo);
    }

    #[test]
    fn test_unknown_kind_round_trips() {
        let text = r#"
name = "offsite"
type = "s3"
bucket = "backups"
region = "eu-west-1"
"#;
        let repo: Repository = toml::from_str(text).unwrap();
        match &repo {
            Repository::Generic(g) => {
                assert_eq!(g.kind, "s3");
                assert_eq!(g.fields.get("bucket").and_then(|v| v.as_str()), Some("backups"));
            }
            other => panic!("expected generic repository, got {other:?}"),
        }

        let dir = TempDir::new().unwrap();
        assert!(repo.write_config(dir.path()).is_err());
        assert!(repo.storage_path(&Uuid::new_v4()).is_err());

        let back: Repository = toml::from_str(&toml::to_string(&repo).unwrap()).unwrap();
        assert_eq!(back, repo);
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(toml::from_str::<Repository>("type = \"local\"\npath = \"/x\"\n").is_err());
        assert!(toml::from_str::<Repository>("name = \"a\"\ntype = \"local\"\n").is_err());
        assert!(toml::from_str::<Repository>("name = \"a\"\npath = \"/x\"\n").is_err());
    }

    #[test]
    fn test_lookup_helpers() {
        let repos = vec![
            Repository::local("a", "/a", false),
            Repository::local("b", "/b", true),
        ];
        assert_eq!(find_by_name(&repos, "a").unwrap().name(), "a");
        assert!(find_by_name(&repos, "c").unwrap_err().is_not_found());
        assert_eq!(find_default(&repos).unwrap().name(), "b");
        assert!(find_default(&repos[..1]).is_err());
    }

    #[test]
    fn test_validate_set() {
        let ok = vec![
            Repository::local("a", "/a", true),
            Repository::local("b", "/b", false),
        ];
        assert!(validate_set(&ok).is_ok());

        let duplicate = vec![
            Repository::local("a", "/a", false),
            Repository::local("a", "/b", false),
        ];
        assert!(validate_set(&duplicate).is_err());

        let two_defaults = vec![
            Repository::local("a", "/a", true),
            Repository::local("b", "/b", true),
        ];
        assert!(validate_set(&two_defaults).is_err());
    }
}
