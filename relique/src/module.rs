//! Backup modules: declarative recipes describing what to capture on a client.
//!
//! A module instance lives inside a client configuration. Unset fields are
//! filled from the module template installed under
//! `${install_root}/${module_type}/${variant}.toml`.

use crate::utils::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Backup strategy of a module or job.
///
/// Serialized as a plain token. `"diff"` is accepted as an alias of
/// `"incremental"`; any other token parses to [`BackupMode::Unknown`] so that
/// validation can reject it with a proper error instead of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BackupMode {
    Full,
    Incremental,
    #[default]
    Unknown,
}

impl BackupMode {
    pub fn parse(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "full" => BackupMode::Full,
            "incremental" | "diff" => BackupMode::Incremental,
            _ => BackupMode::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupMode::Full => "full",
            BackupMode::Incremental => "incremental",
            BackupMode::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != BackupMode::Unknown
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for BackupMode {
    fn from(token: String) -> Self {
        BackupMode::parse(&token)
    }
}

impl From<BackupMode> for String {
    fn from(mode: BackupMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Lifecycle points a module may attach a script to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    PreBackup,
    PostBackup,
    PreRestore,
    PostRestore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Installed template this module derives from
    #[serde(default)]
    pub module_type: String,

    /// Name of this instance, unique within a client
    #[serde(default)]
    pub name: String,

    #[serde(rename = "backup_type", default)]
    pub mode: BackupMode,

    /// Template parameter file to take defaults from
    #[serde(default = "default_variant")]
    pub variant: String,

    #[serde(default)]
    pub backup_paths: Vec<String>,

    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    /// Pass `--cvs-exclude` to the sync tool
    #[serde(rename = "exclude_cvs", default)]
    pub exclude_vcs: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_backup_script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_backup_script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_restore_script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_restore_script: Option<String>,

    /// Free-form template parameters
    #[serde(default, skip_serializing_if = "toml::Table::is_empty")]
    pub params: toml::Table,
}

fn default_variant() -> String {
    "default".to_string()
}

impl Module {
    pub fn new(module_type: impl Into<String>, name: impl Into<String>, mode: BackupMode) -> Self {
        Self {
            module_type: module_type.into(),
            name: name.into(),
            mode,
            variant: default_variant(),
            backup_paths: Vec::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_vcs: false,
            pre_backup_script: None,
            post_backup_script: None,
            pre_restore_script: None,
            post_restore_script: None,
            params: toml::Table::new(),
        }
    }

    /// Parse and validate a module definition.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read module file {}", path.display()))?;
        let module: Module = toml::from_str(&content)
            .with_context(|| format!("parse module file {}", path.display()))?;
        module
            .validate()
            .with_context(|| format!("load module file {}", path.display()))?;
        Ok(module)
    }

    pub fn validate(&self) -> Result<()> {
        if self.module_type.trim().is_empty() {
            return Err(Error::Invalid("module: empty module_type".into()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Invalid(format!(
                "module of type '{}': empty name",
                self.module_type
            )));
        }
        if !self.mode.is_known() {
            return Err(Error::Invalid(format!(
                "module '{}': unknown backup_type",
                self.name
            )));
        }
        Ok(())
    }

    pub fn template_dir(&self, install_root: &Path) -> PathBuf {
        install_root.join(&self.module_type)
    }

    /// Fill `backup_paths`, `exclude`, missing `params` and undeclared hook
    /// scripts from the installed template variant.
    pub fn load_default_configuration(&mut self, install_root: &Path) -> Result<()> {
        let template_path = self
            .template_dir(install_root)
            .join(format!("{}.toml", self.variant));
        let template = Module::load_from_file(&template_path).with_context(|| {
            format!(
                "load defaults of module '{}' (variant '{}')",
                self.name, self.variant
            )
        })?;

        if self.backup_paths.is_empty() {
            self.backup_paths = template.backup_paths;
        }
        if self.exclude.is_empty() {
            self.exclude = template.exclude;
        }
        for (key, value) in template.params {
            self.params.entry(key).or_insert(value);
        }

        for (script, default) in [
            (&mut self.pre_backup_script, template.pre_backup_script),
            (&mut self.post_backup_script, template.post_backup_script),
            (&mut self.pre_restore_script, template.pre_restore_script),
            (&mut self.post_restore_script, template.post_restore_script),
        ] {
            if script.is_none() {
                *script = default;
            }
        }

        Ok(())
    }

    /// Variant names offered by the installed template, sorted.
    pub fn available_variants(&self, install_root: &Path) -> Result<Vec<String>> {
        let dir = self.template_dir(install_root);
        let entries = fs::read_dir(&dir)
            .with_context(|| format!("list variants in {}", dir.display()))?;

        let mut variants = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                variants.push(stem.to_string());
            }
        }
        variants.sort();
        Ok(variants)
    }

    /// Declared script for `hook`, resolved inside the template's `scripts/` dir.
    pub fn hook(&self, hook: Hook, install_root: &Path) -> Option<PathBuf> {
        let script = match hook {
            Hook::PreBackup => self.pre_backup_script.as_deref(),
            Hook::PostBackup => self.post_backup_script.as_deref(),
            Hook::PreRestore => self.pre_restore_script.as_deref(),
            Hook::PostRestore => self.post_restore_script.as_deref(),
        }?;
        Some(self.template_dir(install_root).join("scripts").join(script))
    }

    /// Every installed template, loaded from its `default` variant.
    ///
    /// Directories without a valid default variant are skipped with a warning.
    pub fn installed(install_root: &Path) -> Result<Vec<Module>> {
        let entries = fs::read_dir(install_root)
            .with_context(|| format!("list modules in {}", install_root.display()))?;

        let mut modules = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            match Module::load_from_file(&path.join("default.toml")) {
                Ok(module) => modules.push(module),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping module template");
                }
            }
        }
        modules.sort_by(|a, b| a.module_type.cmp(&b.module_type));
        Ok(modules)
    }
}
