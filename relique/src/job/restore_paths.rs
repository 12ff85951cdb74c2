//! Grammar of the paths given to a restore.
//!
//! - `src:dest` restores the image-side `src` to `dest` on the client.
//! - `src` restores `src` to the same path.
//! - `:dest` restores every backup path `bp` of the module to `dest/bp`,
//!   discarding any other entry.
//!
//! An empty result means every backup path is restored to itself.

use crate::utils::{normalize, Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

pub fn parse_restore_paths(
    raw: &[String],
    backup_paths: &[String],
) -> Result<BTreeMap<String, String>> {
    let mut paths = BTreeMap::new();

    for entry in raw {
        let (source, dest) = entry.split_once(':').unwrap_or((entry.as_str(), ""));

        if source.is_empty() {
            if dest.is_empty() {
                return Err(Error::Invalid(format!("restore path '{entry}'")));
            }
            paths = backup_paths
                .iter()
                .map(|bp| (bp.clone(), relocate(dest, bp)))
                .collect();
            break;
        }

        if !backup_paths.iter().any(|bp| is_within(source, bp)) {
            return Err(Error::Invalid(format!(
                "restore path '{source}': not part of the backed up paths"
            )));
        }

        let dest = if dest.is_empty() { source } else { dest };
        paths.insert(source.to_string(), dest.to_string());
    }

    Ok(paths)
}

/// `root/path`, with `path` taken relative even when absolute.
fn relocate(root: &str, path: &str) -> String {
    let joined = Path::new(root).join(path.trim_start_matches('/'));
    normalize(&joined).to_string_lossy().into_owned()
}

fn is_within(path: &str, root: &str) -> bool {
    normalize(Path::new(path)).starts_with(normalize(Path::new(root)))
}
