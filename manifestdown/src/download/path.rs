//! Output path resolution.
//!
//! Manifest paths use either `/` or `\` as separator. They are split into
//! segments and rebuilt with the host separator. Anything that could land
//! outside the output root is rejected.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Why a manifest path was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path has no usable segments.
    #[error("path is empty")]
    Empty,

    /// The path starts at a filesystem root.
    #[error("absolute paths are not allowed")]
    Absolute,

    /// The path contains a `..` segment.
    #[error("parent traversal not allowed")]
    ParentTraversal,

    /// A segment holds a drive prefix, stream name or NUL byte.
    #[error("invalid path segment {0:?}")]
    InvalidSegment(String),
}

/// Normalize a manifest path into a relative host path.
///
/// Empty and `.` segments are dropped, so `a//./b` becomes `a/b`.
///
/// # Errors
///
/// Returns a [`PathError`] for absolute paths, `..` segments, segments
/// containing `:` or NUL, and paths with no segments left.
pub fn normalize_relative_path(raw: &str) -> Result<PathBuf, PathError> {
    if raw.starts_with(['/', '\\']) {
        return Err(PathError::Absolute);
    }

    let mut path = PathBuf::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::ParentTraversal),
            s if s.contains([':', '\0']) => {
                return Err(PathError::InvalidSegment(s.to_string()));
            }
            s => path.push(s),
        }
    }

    if path.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    Ok(path)
}

/// Resolve a manifest path to its destination under `root`.
pub fn resolve_destination(root: &Path, raw: &str) -> Result<PathBuf, PathError> {
    normalize_relative_path(raw).map(|rel| root.join(rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_forward_and_back_slashes_normalize() {
        let expected: PathBuf = ["Game", "Content", "Paks", "a.pak"].iter().collect();
        assert_eq!(
            normalize_relative_path("Game/Content/Paks/a.pak").unwrap(),
            expected
        );
        assert_eq!(
            normalize_relative_path("Game\\Content\\Paks\\a.pak").unwrap(),
            expected
        );
        assert_eq!(
            normalize_relative_path("Game/Content\\Paks/a.pak").unwrap(),
            expected
        );
    }

    #[test]
    fn test_empty_and_dot_segments_are_dropped() {
        let expected: PathBuf = ["a", "b.txt"].iter().collect();
        assert_eq!(normalize_relative_path("a//./b.txt").unwrap(), expected);
        assert_eq!(normalize_relative_path("./a/b.txt").unwrap(), expected);
    }

    #[test]
    fn test_rejects_traversal() {
        assert_eq!(
            normalize_relative_path("../evil.txt"),
            Err(PathError::ParentTraversal)
        );
        assert_eq!(
            normalize_relative_path("a/../../evil.txt"),
            Err(PathError::ParentTraversal)
        );
        assert_eq!(
            normalize_relative_path("a\\..\\evil.txt"),
            Err(PathError::ParentTraversal)
        );
    }

    #[test]
    fn test_rejects_absolute_and_prefixed() {
        assert_eq!(normalize_relative_path("/etc/passwd"), Err(PathError::Absolute));
        assert_eq!(
            normalize_relative_path("\\\\server\\share\\x"),
            Err(PathError::Absolute)
        );
        assert!(matches!(
            normalize_relative_path("C:\\Windows\\x.dll"),
            Err(PathError::InvalidSegment(_))
        ));
        assert!(matches!(
            normalize_relative_path("file.txt:stream"),
            Err(PathError::InvalidSegment(_))
        ));
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(normalize_relative_path(""), Err(PathError::Empty));
        assert_eq!(normalize_relative_path("./."), Err(PathError::Empty));
    }

    #[test]
    fn test_resolve_destination_joins_root() {
        let root = Path::new("out");
        let dest = resolve_destination(root, "a/b.txt").unwrap();
        assert_eq!(dest, root.join("a").join("b.txt"));
    }

    proptest! {
        #[test]
        fn prop_resolved_paths_stay_under_root(raw in "[a-z./\\\\:]{0,24}") {
            let root = Path::new("root");
            if let Ok(dest) = resolve_destination(root, &raw) {
                prop_assert!(dest.starts_with(root));
                prop_assert!(dest
                    .components()
                    .all(|c| matches!(c, std::path::Component::Normal(_))));
            }
        }
    }
}
