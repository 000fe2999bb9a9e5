//! Path normalization for catalog keys.
//!
//! Catalog keys are absolute POSIX paths beginning with `/`, with no
//! repeated separators and no trailing `/` except for the root itself.

use crate::error::FsError;

/// Normalize `path` into catalog-key form.
///
/// Collapses `//` runs, strips a trailing `/` (except for root), and
/// rejects `.`/`..` segments.
pub fn normalize(path: &str) -> Result<String, FsError> {
    let mut p = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    while p.contains("//") {
        p = p.replace("//", "/");
    }
    if p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    if p.split('/').any(|seg| seg == "." || seg == "..") {
        return Err(FsError::Invalid);
    }
    Ok(p)
}

/// Join a parent path and a child name, then normalize.
pub fn join(parent: &str, name: &str) -> Result<String, FsError> {
    normalize(&format!("{parent}/{name}"))
}

/// Final component of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Suffix after the final `.` of the file name, if any.
pub fn suffix_of(path: &str) -> Option<&str> {
    file_name(path).rsplit_once('.').map(|(_, ext)| ext)
}

/// Parent of a normalized path; `None` for root.
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// If `path` is a direct child of `parent`, return the child name.
pub fn child_name<'a>(parent: &str, path: &'a str) -> Option<&'a str> {
    let rest = if parent == "/" {
        path.strip_prefix('/')?
    } else {
        path.strip_prefix(parent)?.strip_prefix('/')?
    };
    if rest.is_empty() || rest.contains('/') {
        None
    } else {
        Some(rest)
    }
}

/// Every ancestor directory of a normalized path, root first, excluding
/// the path itself.
pub fn ancestors_of(path: &str) -> Vec<String> {
    let mut out = vec!["/".to_string()];
    let mut acc = String::new();
    let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
    while let Some(seg) = segments.next() {
        if segments.peek().is_none() {
            break;
        }
        acc.push('/');
        acc.push_str(seg);
        out.push(acc.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_repeated_slashes() {
        assert_eq!(normalize("/a//b///c").unwrap(), "/a/b/c");
    }

    #[test]
    fn normalize_strips_trailing_slash_except_root() {
        assert_eq!(normalize("/a/b/").unwrap(), "/a/b");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("//").unwrap(), "/");
    }

    #[test]
    fn normalize_prepends_root() {
        assert_eq!(normalize("a/b").unwrap(), "/a/b");
    }

    #[test]
    fn normalize_rejects_dot_segments() {
        assert!(matches!(normalize("/a/./b"), Err(FsError::Invalid)));
        assert!(matches!(normalize("/a/../b"), Err(FsError::Invalid)));
        assert!(matches!(normalize(".."), Err(FsError::Invalid)));
    }

    #[test]
    fn join_normalizes_result() {
        assert_eq!(join("/", "A").unwrap(), "/A");
        assert_eq!(join("/A", "X.ts").unwrap(), "/A/X.ts");
        assert_eq!(join("/A/", "X").unwrap(), "/A/X");
    }

    #[test]
    fn suffix_of_reads_final_extension() {
        assert_eq!(suffix_of("/A/X/X.ts"), Some("ts"));
        assert_eq!(suffix_of("/A/X.tar.gz"), Some("gz"));
        assert_eq!(suffix_of("/A/X"), None);
    }

    #[test]
    fn parent_of_walks_up() {
        assert_eq!(parent_of("/A/X/X.ts"), Some("/A/X"));
        assert_eq!(parent_of("/A"), Some("/"));
        assert_eq!(parent_of("/"), None);
    }

    #[test]
    fn child_name_matches_direct_children_only() {
        assert_eq!(child_name("/", "/A"), Some("A"));
        assert_eq!(child_name("/A", "/A/X"), Some("X"));
        assert_eq!(child_name("/A", "/A/X/X.ts"), None);
        assert_eq!(child_name("/A", "/AB"), None);
        assert_eq!(child_name("/A", "/A"), None);
    }

    #[test]
    fn ancestors_lists_root_first() {
        assert_eq!(ancestors_of("/A/X/X.ts"), vec!["/", "/A", "/A/X"]);
        assert_eq!(ancestors_of("/A"), vec!["/"]);
    }
}
