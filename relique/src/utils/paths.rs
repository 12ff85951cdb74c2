use std::path::{Component, Path, PathBuf};

/// Reduce an arbitrary name to a lowercase, accent-free file base name.
///
/// Joining characters (`space & _ = + : /`) become dashes, anything outside
/// `[a-z0-9.-]` is dropped, and runs of dashes collapse. Leading and trailing
/// dashes are trimmed so `/srv/data` becomes `srv-data`.
pub fn slug(name: &str) -> String {
    let folded = deunicode::deunicode(name).to_lowercase();

    let mut out = String::with_capacity(folded.len());
    for c in folded.chars() {
        let c = match c {
            'a'..='z' | '0'..='9' | '.' | '-' => c,
            ' ' | '&' | '_' | '=' | '+' | ':' | '/' | '\\' => '-',
            _ => continue,
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    while out.contains("..") {
        out = out.replace("..", ".");
    }

    let trimmed = out.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "root".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lexically clean a path: drop `.` components and resolve `..` against
/// preceding normal components. The filesystem is never consulted.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_paths() {
        assert_eq!(slug("/srv/data"), "srv-data");
        assert_eq!(slug("/home/user/My Documents/"), "home-user-my-documents");
        assert_eq!(slug("/"), "root");
    }

    #[test]
    fn test_slug_names() {
        assert_eq!(slug("Local Repo"), "local-repo");
        assert_eq!(slug("Dépôt Principal"), "depot-principal");
        assert_eq!(slug("web_01.example.com"), "web-01.example.com");
        assert_eq!(slug("../etc/passwd"), "etc-passwd");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/var/lib/./relique//storage/../storage/")),
            PathBuf::from("/var/lib/relique/storage")
        );
        assert_eq!(normalize(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }
}
