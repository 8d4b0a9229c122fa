//! Lexical path containment checks.
//!
//! Manifest targets and archive member names are untrusted input. Every path that the engine
//! writes to is checked here, purely lexically, against the directory it must stay inside.
//! Nothing is resolved against the filesystem, so the checks behave identically for paths
//! that do not exist yet.

use crate::constants::STATE_DIR;
use crate::core::PatchError;
use std::path::{Component, Path, PathBuf};

/// Collapse `.` and `..` components without touching the filesystem.
///
/// Returns `None` when a `..` would climb above the start of the path.
///
/// # Examples
///
/// ```rust
/// use launchpatch::utils::path_validation::normalize_lexically;
/// use std::path::{Path, PathBuf};
///
/// assert_eq!(normalize_lexically(Path::new("a/./b/../c")), Some(PathBuf::from("a/c")));
/// assert_eq!(normalize_lexically(Path::new("a/../../c")), None);
/// ```
#[must_use]
pub fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                normalized.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
        }
    }

    Some(normalized)
}

/// Whether `child` lies lexically inside `parent` (or equals it).
#[must_use]
pub fn is_subchild(parent: &Path, child: &Path) -> bool {
    match (normalize_lexically(parent), normalize_lexically(child)) {
        (Some(parent), Some(child)) => child.starts_with(parent),
        _ => false,
    }
}

/// Fail with [`PatchError::InvalidPath`] unless `child` lies inside `parent`.
pub fn check_subchild(parent: &Path, child: &Path) -> Result<(), PatchError> {
    if is_subchild(parent, child) {
        Ok(())
    } else {
        Err(PatchError::InvalidPath {
            path: child.display().to_string(),
        })
    }
}

/// Resolve an untrusted relative name (such as an archive member) under `base`.
///
/// Absolute names, drive prefixes and names that climb out of `base` are rejected.
pub fn resolve_within(base: &Path, name: &str) -> Result<PathBuf, PatchError> {
    let relative = Path::new(name);
    let rooted = relative
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)));
    if rooted {
        return Err(PatchError::InvalidPath {
            path: name.to_string(),
        });
    }

    let target = base.join(relative);
    check_subchild(base, &target)?;
    Ok(target)
}

/// Render `path` relative to `root` with `/` separators, as stored in the uninstall log.
#[must_use]
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let root = normalize_lexically(root)?;
    let path = normalize_lexically(path)?;
    let relative = path.strip_prefix(&root).ok()?;
    let parts: Vec<String> =
        relative.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    Some(parts.join("/"))
}

/// Whether `path` falls inside the engine's own state directory under `root`.
///
/// The first component is compared ASCII case-insensitively, since the installation may sit
/// on a case-insensitive filesystem. Paths outside `root` never match.
#[must_use]
pub fn is_state_path(root: &Path, path: &Path) -> bool {
    relative_slash_path(root, path).is_some_and(|relative| {
        relative.split('/').next().is_some_and(|first| first.eq_ignore_ascii_case(STATE_DIR))
    })
}
