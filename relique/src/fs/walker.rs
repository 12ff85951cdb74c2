//! Directory traversal used to measure image trees.
//!
//! Incremental images share unchanged files with their predecessor through
//! hard links, so a file reachable through several names inside one tree is
//! only counted once.

use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use walkdir::WalkDir;

/// Totals gathered while walking a tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    /// Non-directory entries (regular files, symlinks, devices)
    pub files: u64,

    /// Directories below the root
    pub folders: u64,

    /// Sum of entry sizes, each inode counted once
    pub bytes: u64,
}

/// Measure the tree rooted at `root`. Symlinks are not followed.
///
/// A missing root yields zero usage.
///
/// # Example
/// ```no_run
/// use relique::fs::walker::disk_usage;
/// use std::path::Path;
///
/// let usage = disk_usage(Path::new("/var/lib/relique/storage")).unwrap();
/// println!("{} bytes in {} files", usage.bytes, usage.files);
/// ```
pub fn disk_usage(root: &Path) -> std::io::Result<DiskUsage> {
    let mut usage = DiskUsage::default();
    if !root.exists() {
        return Ok(usage);
    }

    let mut seen = HashSet::new();
    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            usage.folders += 1;
            continue;
        }

        let metadata = entry.metadata()?;
        usage.files += 1;
        if metadata.nlink() > 1 && !seen.insert((metadata.dev(), metadata.ino())) {
            continue;
        }
        usage.bytes += metadata.len();
    }

    Ok(usage)
}
