//! Parsing of the summary block rsync prints with `--stats`.
//!
//! Parsing is best-effort: fields that cannot be found stay at zero and lines
//! that do not match are ignored. Thousands separators are stripped before
//! numbers are parsed.

use crate::utils::{Result, ResultExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

static RE_FILES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Number of files: ([\d,.]*\d)(?: \(reg: ([\d,.]*\d)(?:, dir: ([\d,.]*\d))?)?").unwrap()
});
static RE_CREATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Number of created files: ([\d,.]*\d)(?: \(reg: ([\d,.]*\d))?").unwrap()
});
static RE_DELETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Number of deleted files: ([\d,.]*\d)").unwrap());
static RE_TOTAL_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total file size: ([\d,.]*\d) bytes").unwrap());
static RE_TRANSFERRED_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total transferred file size: ([\d,.]*\d) bytes").unwrap());
static RE_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Literal data: ([\d,.]*\d) bytes").unwrap());
static RE_MATCHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Matched data: ([\d,.]*\d) bytes").unwrap());
static RE_LIST_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"File list size: ([\d,.]*\d)").unwrap());
static RE_LIST_GENERATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"File list generation time: ([\d,.]*\d) seconds").unwrap());
static RE_LIST_TRANSFER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"File list transfer time: ([\d,.]*\d) seconds").unwrap());
static RE_SENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total bytes sent: ([\d,.]*\d)").unwrap());
static RE_RECEIVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total bytes received: ([\d,.]*\d)").unwrap());
static RE_SPEED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"received [\d,.]*\d bytes\s+([\d,.]*\d) bytes/sec").unwrap());
static RE_SPEEDUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speedup is ([\d,.]*\d)").unwrap());

/// Counters from one rsync run, or the sum over all runs of a job.
///
/// `transfer_speed` and `speedup` are rates; they are not persisted and are
/// dropped when statistics are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStats {
    pub number_of_files: u64,
    pub number_of_regular_files: u64,
    pub number_of_directories: u64,
    pub number_of_deleted_files: u64,
    pub number_of_created_files: u64,
    pub number_of_created_regular_files: u64,
    pub total_file_size: u64,
    pub total_transferred_file_size: u64,
    pub literal_data: u64,
    pub matched_data: u64,
    pub file_list_size: u64,
    pub file_list_generation_time: f64,
    pub file_list_transfer_time: f64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    #[serde(skip)]
    pub transfer_speed: f64,
    #[serde(skip)]
    pub speedup: f64,
}

fn integer(text: Option<regex::Match<'_>>) -> u64 {
    text.map(|m| {
        m.as_str()
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect::<String>()
    })
    .and_then(|digits| digits.parse().ok())
    .unwrap_or(0)
}

fn decimal(text: Option<regex::Match<'_>>) -> f64 {
    text.and_then(|m| m.as_str().replace(',', "").parse().ok())
        .unwrap_or(0.0)
}

fn first<'t>(re: &Regex, text: &'t str, group: usize) -> Option<regex::Match<'t>> {
    re.captures(text).and_then(|c| c.get(group))
}

impl SyncStats {
    pub fn parse(output: &str) -> Self {
        let files = RE_FILES.captures(output);
        let created = RE_CREATED.captures(output);

        SyncStats {
            number_of_files: integer(files.as_ref().and_then(|c| c.get(1))),
            number_of_regular_files: integer(files.as_ref().and_then(|c| c.get(2))),
            number_of_directories: integer(files.as_ref().and_then(|c| c.get(3))),
            number_of_created_files: integer(created.as_ref().and_then(|c| c.get(1))),
            number_of_created_regular_files: integer(created.as_ref().and_then(|c| c.get(2))),
            number_of_deleted_files: integer(first(&RE_DELETED, output, 1)),
            total_file_size: integer(first(&RE_TOTAL_SIZE, output, 1)),
            total_transferred_file_size: integer(first(&RE_TRANSFERRED_SIZE, output, 1)),
            literal_data: integer(first(&RE_LITERAL, output, 1)),
            matched_data: integer(first(&RE_MATCHED, output, 1)),
            file_list_size: integer(first(&RE_LIST_SIZE, output, 1)),
            file_list_generation_time: decimal(first(&RE_LIST_GENERATION, output, 1)),
            file_list_transfer_time: decimal(first(&RE_LIST_TRANSFER, output, 1)),
            total_bytes_sent: integer(first(&RE_SENT, output, 1)),
            total_bytes_received: integer(first(&RE_RECEIVED, output, 1)),
            transfer_speed: decimal(first(&RE_SPEED, output, 1)),
            speedup: decimal(first(&RE_SPEEDUP, output, 1)),
        }
    }

    /// Parse the stdout log of a finished rsync run.
    pub fn from_log_file(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read sync log {}", path.display()))?;
        Ok(SyncStats::parse(&String::from_utf8_lossy(&bytes)))
    }

    /// Componentwise sum of counters and durations. Rates are left at zero.
    pub fn merge<'a>(all: impl IntoIterator<Item = &'a SyncStats>) -> SyncStats {
        let mut sum = SyncStats::default();
        for s in all {
            sum.number_of_files += s.number_of_files;
            sum.number_of_regular_files += s.number_of_regular_files;
            sum.number_of_directories += s.number_of_directories;
            sum.number_of_deleted_files += s.number_of_deleted_files;
            sum.number_of_created_files += s.number_of_created_files;
            sum.number_of_created_regular_files += s.number_of_created_regular_files;
            sum.total_file_size += s.total_file_size;
            sum.total_transferred_file_size += s.total_transferred_file_size;
            sum.literal_data += s.literal_data;
            sum.matched_data += s.matched_data;
            sum.file_list_size += s.file_list_size;
            sum.file_list_generation_time += s.file_list_generation_time;
            sum.file_list_transfer_time += s.file_list_transfer_time;
            sum.total_bytes_sent += s.total_bytes_sent;
            sum.total_bytes_received += s.total_bytes_received;
        }
        sum
    }
}
