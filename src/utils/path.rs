//! Path normalization utilities.
//!
//! - `normalize_path` - absolute form (canonicalize + fallback)
//! - `safe_join` - join a resource name under a base directory

use std::path::{Component, Path, PathBuf};

/// Normalize a file system path to absolute form.
///
/// Tries `canonicalize()` first (resolves symlinks, `.`, `..`).
/// Falls back to:
/// - Return as-is if already absolute
/// - Join with current directory if relative
#[inline]
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

/// Join a `/`-separated resource name under `base`.
///
/// Returns `None` for names that would escape `base` (`..`, absolute paths,
/// drive prefixes) or that are empty.
pub fn safe_join(base: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name.trim_start_matches('/'));
    let mut joined = base.to_path_buf();
    let mut parts = 0;

    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                parts += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    (parts > 0).then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_relative() {
        let normalized = normalize_path(Path::new("relative/path/file.js"));
        assert!(normalized.is_absolute());
    }

    #[test]
    fn test_safe_join_nested_name() {
        let base = Path::new("/srv/app");
        assert_eq!(
            safe_join(base, "chat/room.js"),
            Some(PathBuf::from("/srv/app/chat/room.js"))
        );
        assert_eq!(
            safe_join(base, "/index.js"),
            Some(PathBuf::from("/srv/app/index.js"))
        );
    }

    #[test]
    fn test_safe_join_rejects_escape() {
        let base = Path::new("/srv/app");
        assert_eq!(safe_join(base, "../secret"), None);
        assert_eq!(safe_join(base, "a/../../b"), None);
        assert_eq!(safe_join(base, ""), None);
        assert_eq!(safe_join(base, "./"), None);
    }
}
