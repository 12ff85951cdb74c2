use crate::module::Module;

/// Command-line profile of one rsync invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub archive: bool,
    pub relative: bool,
    pub recursive: bool,
    pub perms: bool,
    pub verbose: bool,
    pub stats: bool,
    pub progress: bool,
    pub numeric_ids: bool,
    pub delay_updates: bool,
    pub delete: bool,
    pub delete_after: bool,
    /// Reference tree unchanged files are hard-linked against
    pub link_dest: Option<String>,
    /// Remote shell command
    pub rsh: Option<String>,
    pub cvs_exclude: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl SyncOptions {
    fn common() -> Self {
        Self {
            archive: true,
            recursive: true,
            perms: true,
            verbose: true,
            stats: true,
            progress: true,
            numeric_ids: true,
            delay_updates: true,
            ..Self::default()
        }
    }

    pub fn full_backup() -> Self {
        Self {
            relative: true,
            ..Self::common()
        }
    }

    pub fn incremental_backup(link_dest: impl Into<String>) -> Self {
        Self {
            relative: true,
            link_dest: Some(link_dest.into()),
            ..Self::common()
        }
    }

    pub fn restore() -> Self {
        Self {
            delete: true,
            delete_after: true,
            ..Self::common()
        }
    }

    /// Apply the module's include/exclude patterns and VCS filtering.
    pub fn with_filters(mut self, module: &Module) -> Self {
        self.include = module.include.clone();
        self.exclude = module.exclude.clone();
        self.cvs_exclude = module.exclude_vcs;
        self
    }

    pub fn with_rsh(mut self, rsh: impl Into<String>) -> Self {
        self.rsh = Some(rsh.into());
        self
    }

    pub fn to_args(&self) -> Vec<String> {
        let flags = [
            (self.archive, "--archive"),
            (self.relative, "--relative"),
            (self.recursive, "--recursive"),
            (self.perms, "--perms"),
            (self.verbose, "--verbose"),
            (self.stats, "--stats"),
            (self.progress, "--progress"),
            (self.numeric_ids, "--numeric-ids"),
            (self.delay_updates, "--delay-updates"),
            (self.delete, "--delete"),
            (self.delete_after, "--delete-after"),
            (self.cvs_exclude, "--cvs-exclude"),
        ];

        let mut args: Vec<String> = flags
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, flag)| flag.to_string())
            .collect();

        if let Some(link_dest) = &self.link_dest {
            args.push(format!("--link-dest={link_dest}"));
        }
        if let Some(rsh) = &self.rsh {
            args.push(format!("--rsh={rsh}"));
        }
        // includes first: rsync applies the first matching rule
        args.extend(self.include.iter().map(|p| format!("--include={p}")));
        args.extend(self.exclude.iter().map(|p| format!("--exclude={p}")));
        args
    }
}
