//! Relique core library
//!
//! Differential file-level backups of remote clients: each job pulls the
//! module's paths over rsync into a repository, incremental jobs hard-link
//! unchanged files against a previous job, and finished backups become
//! images recorded in the catalog.

pub mod catalog;
pub mod client;
pub mod config;
pub mod fs;
pub mod image;
pub mod job;
pub mod module;
pub mod orchestrator;
pub mod reachability;
pub mod repository;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use catalog::CatalogStore;
pub use client::Client;
pub use config::{Configuration, CoreConfig};
pub use image::Image;
pub use job::{Job, JobEngine, JobKind, JobStatus};
pub use module::{BackupMode, Module};
pub use orchestrator::Orchestrator;
pub use repository::{Repository, Storage};
pub use utils::{Error, ErrorKind, Result, ResultExt};
