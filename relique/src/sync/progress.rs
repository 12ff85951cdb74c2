//! Live progress of a running rsync process.
//!
//! With `--progress` rsync rewrites a status line (separated by `\r`) for
//! every file. The most recent line carrying a `to-chk` counter tells how many
//! entries of the file list remain to be checked.

use regex::Regex;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::LazyLock;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

static RE_PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\d,.]+)([kMG]B)/s.*\(xfr#\d+, (?:to|ir)-chk=(\d+)/(\d+)\)").unwrap()
});

/// How much of the log is inspected when looking for the latest status line.
const TAIL_BYTES: u64 = 16 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncProgress {
    /// Entries already checked
    pub current: u64,

    /// Entries in the file list known so far
    pub total: u64,

    pub remaining: u64,

    /// Percentage complete (0-100)
    pub percent: f64,

    /// Speed of the current file, in kB/s
    pub speed_kbps: f64,
}

impl SyncProgress {
    /// Latest progress line in `output`, if any.
    pub fn parse(output: &str) -> Option<Self> {
        output
            .split(['\r', '\n'])
            .rev()
            .find_map(|line| RE_PROGRESS.captures(line))
            .map(|caps| {
                let speed: f64 = caps[1].replace(',', "").parse().unwrap_or(0.0);
                let speed_kbps = match &caps[2] {
                    "MB" => speed * 1024.0,
                    "GB" => speed * 1024.0 * 1024.0,
                    _ => speed,
                };
                let remaining: u64 = caps[3].parse().unwrap_or(0);
                let total: u64 = caps[4].parse().unwrap_or(0);
                let current = total.saturating_sub(remaining);
                let percent = if total > 0 {
                    (current as f64 / total as f64) * 100.0
                } else {
                    0.0
                };

                SyncProgress {
                    current,
                    total,
                    remaining,
                    percent,
                    speed_kbps,
                }
            })
    }

    /// Read the tail of a log that rsync may still be writing to.
    pub async fn from_log_tail(path: &Path) -> std::io::Result<Option<Self>> {
        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        if len > TAIL_BYTES {
            file.seek(SeekFrom::Start(len - TAIL_BYTES)).await?;
        }

        let mut buf = Vec::with_capacity(TAIL_BYTES.min(len) as usize);
        file.read_to_end(&mut buf).await?;
        Ok(SyncProgress::parse(&String::from_utf8_lossy(&buf)))
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LOG: &str = "sending incremental file list\n\
srv/data/a.bin\n\
\r     32,768   3%    1.20MB/s    0:00:01\r  1,048,576 100%  512.00kB/s    0:00:02 (xfr#1, to-chk=8/10)\n\
srv/data/b.bin\n\
\r     65,536  50%  256.00kB/s    0:00:00 (xfr#2, ir-chk=5/20)\n\
srv/data/c.bin\n";

    #[test]
    fn test_parse_uses_last_matching_line() {
        let progress = SyncProgress::parse(LOG).unwrap();
        assert_eq!(progress.total, 20);
        assert_eq!(progress.remaining, 5);
        assert_eq!(progress.current, 15);
        assert!((progress.percent - 75.0).abs() < 0.01);
        assert!((progress.speed_kbps - 256.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_megabytes() {
        let progress =
            SyncProgress::parse("  10,000 100%    2.00MB/s    0:00:00 (xfr#3, to-chk=0/4)").unwrap();
        assert_eq!(progress.current, 4);
        assert!((progress.percent - 100.0).abs() < 0.01);
        assert!((progress.speed_kbps - 2048.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_without_progress() {
        assert_eq!(SyncProgress::parse("sending incremental file list\n"), None);
        assert_eq!(SyncProgress::parse(""), None);
    }

    #[tokio::test]
    async fn test_from_log_tail() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("rsync.log");

        let mut content = "x\n".repeat(20_000);
        content.push_str("  1,024 100%  100.00kB/s    0:00:00 (xfr#9, to-chk=1/2)\n");
        std::fs::write(&path, content)?;

        let progress = SyncProgress::from_log_tail(&path).await?.unwrap();
        assert_eq!(progress.current, 1);
        assert_eq!(progress.total, 2);
        Ok(())
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }
}
