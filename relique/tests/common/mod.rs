//! Shared fixtures: a configuration rooted in a temp dir, with stub `rsync`
//! and `ssh` scripts standing in for the real tools.

#![allow(dead_code)]

use relique::{Client, Configuration, CoreConfig, Module, Orchestrator, Repository};
use relique::module::BackupMode;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Mimics a transfer: creates the destination tree, prints a summary block,
/// exits 24 for any source containing `flaky`. Arguments are appended to
/// `rsync.args` next to the script.
const RSYNC_STUB: &str = r#"#!/bin/sh
src=""
dst=""
for arg in "$@"; do src="$dst"; dst="$arg"; done
echo "$@" >> "$(dirname "$0")/rsync.args"

path="${src#*:}"
case "$dst" in
  *@*:*) ;;
  *) mkdir -p "$dst$path" && printf 'payload\n' > "$dst$path/file.txt" ;;
esac

echo "sending incremental file list"
printf '     8 100%%  100.00kB/s    0:00:00 (xfr#1, to-chk=0/2)\n'
echo ""
echo "Number of files: 2 (reg: 1, dir: 1)"
echo "Number of created files: 2 (reg: 1, dir: 1)"
echo "Number of deleted files: 0"
echo "Total file size: 8 bytes"
echo "Total transferred file size: 8 bytes"
echo "Literal data: 8 bytes"
echo "Matched data: 0 bytes"
echo "File list size: 0"
echo "Total bytes sent: 1,024"
echo "Total bytes received: 2,048"
echo ""
echo "sent 1,024 bytes  received 2,048 bytes  6,144.00 bytes/sec"
echo "total size is 8  speedup is 0.00"

case "$src" in
  *flaky*) echo "file has vanished: \"$path/tmp.swp\"" >&2; exit 24 ;;
esac
exit 0
"#;

const SSH_OK: &str = "#!/bin/sh\necho ping\n";

const SSH_DOWN: &str =
    "#!/bin/sh\necho 'ssh: connect to host 1.2.3.4 port 22: Connection refused' >&2\nexit 255\n";

/// Runs the remote command locally, skipping ssh options and the host.
const SSH_LOCAL: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -p|-l|-o) shift 2 ;;
    -*) shift ;;
    *) break ;;
  esac
done
shift
exec sh -c "$*"
"#;

pub struct Harness {
    pub dir: TempDir,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn storage(&self) -> PathBuf {
        self.dir.path().join("storage")
    }

    pub fn catalog_file(&self, uuid: &uuid::Uuid, name: &str) -> PathBuf {
        self.orchestrator
            .engine()
            .catalog()
            .bundle(uuid)
            .dir()
            .join(name)
    }

    /// Every recorded rsync invocation, one line each.
    pub fn rsync_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("bin/rsync.args"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn module(name: &str, mode: BackupMode, paths: &[&str]) -> Module {
    let mut module = Module::new("generic", name, mode);
    module.backup_paths = paths.iter().map(|p| p.to_string()).collect();
    module
}

pub enum Transport {
    Stub { reachable: bool },
    /// Real rsync through a local pseudo-ssh
    Local,
}

pub fn harness(transport: Transport, modules: Vec<Module>) -> Harness {
    let dir = TempDir::new().unwrap();
    let bin = dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();

    let mut core = CoreConfig::rooted_at(dir.path());
    match transport {
        Transport::Stub { reachable } => {
            core.sync.rsync_path = script(&bin, "rsync", RSYNC_STUB);
            core.sync.ssh_path = script(&bin, "ssh", if reachable { SSH_OK } else { SSH_DOWN });
        }
        Transport::Local => {
            core.sync.rsync_path = PathBuf::from("rsync");
            core.sync.ssh_path = script(&bin, "ssh", SSH_LOCAL);
        }
    }
    core.sync.connect_timeout_secs = 1;

    let mut c1 = Client::new("c1", "1.2.3.4");
    c1.modules = modules;
    let config = Configuration {
        clients: vec![c1, Client::new("c2", "5.6.7.8")],
        repositories: vec![Repository::local("local", dir.path().join("storage"), true)],
        core,
    };
    config.validate().unwrap();

    let orchestrator = Orchestrator::open(config).unwrap();
    Harness { dir, orchestrator }
}

pub fn rsync_available() -> bool {
    std::process::Command::new("rsync")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
