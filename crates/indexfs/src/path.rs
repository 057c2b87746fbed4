//! Logical path helpers.
//!
//! Logical paths are absolute `/`-separated strings with no trailing slash
//! (except the root `/`), no empty components and no `.` / `..`.

use crate::error::{FsError, FsResult};

/// Normalize a logical path.
///
/// Collapses repeated slashes, resolves `.` and `..`, strips the trailing
/// slash. `..` above the root is an error.
pub fn normalize(path: &str) -> FsResult<String> {
    if path.is_empty() {
        return Err(FsError::invalid_path("empty path"));
    }
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(FsError::invalid_path(path));
                }
            }
            c => parts.push(c),
        }
    }
    if parts.is_empty() {
        return Ok("/".to_string());
    }
    let mut out = String::with_capacity(path.len());
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    Ok(out)
}

/// Join a normalized base with a relative (or absolute-looking) child.
pub fn join(base: &str, child: &str) -> FsResult<String> {
    if child.is_empty() {
        return normalize(base);
    }
    normalize(&format!("{}/{}", base.trim_end_matches('/'), child))
}

/// Parent of a normalized path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last component of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// True when `path` equals `dir` or lies below it as a real path
/// descendant (`/a/b` is not under `/a/bb`).
pub fn is_under(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return path.starts_with('/');
    }
    path == dir
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

/// True when `path` lies strictly below `dir`.
pub fn is_strictly_under(path: &str, dir: &str) -> bool {
    path != dir && is_under(path, dir)
}

/// Path of `path` relative to `dir`; empty when equal.
pub fn relative<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    if !is_under(path, dir) {
        return None;
    }
    if dir == "/" {
        return Some(path.trim_start_matches('/'));
    }
    Some(path[dir.len()..].trim_start_matches('/'))
}

/// Key range `[lower, upper)` covering every strict descendant of `dir`
/// in a sorted string map.
///
/// `'0'` is the byte after `'/'`, so `dir + "0"` bounds `dir + "/..."`
/// without touching siblings like `dir + "bbb"`.
pub fn subtree_range(dir: &str) -> (String, String) {
    if dir == "/" {
        return ("/".to_string(), "0".to_string());
    }
    (format!("{dir}/"), format!("{dir}0"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a//b/./c/").unwrap(), "/a/b/c");
        assert_eq!(normalize("a/b/../c").unwrap(), "/a/c");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("///").unwrap(), "/");
        assert!(normalize("/..").is_err());
        assert!(normalize("").is_err());
    }

    #[test]
    fn test_join_and_parent() {
        assert_eq!(join("/root", "seg/attr").unwrap(), "/root/seg/attr");
        assert_eq!(join("/", "x").unwrap(), "/x");
        assert_eq!(join("/root", "").unwrap(), "/root");
        assert_eq!(parent("/root/seg"), Some("/root"));
        assert_eq!(parent("/root"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(file_name("/root/seg"), "seg");
    }

    #[test]
    fn test_is_under_prefix_collision() {
        assert!(is_under("/a/b", "/a/b"));
        assert!(is_under("/a/b/c", "/a/b"));
        assert!(!is_under("/a/bbb.txt", "/a/b"));
        assert!(is_under("/anything", "/"));
        assert!(!is_strictly_under("/a/b", "/a/b"));
    }

    #[test]
    fn test_relative() {
        assert_eq!(relative("/a/b/c", "/a"), Some("b/c"));
        assert_eq!(relative("/a", "/a"), Some(""));
        assert_eq!(relative("/a/b", "/"), Some("a/b"));
        assert_eq!(relative("/ab", "/a"), None);
    }

    #[test]
    fn test_subtree_range_excludes_siblings() {
        let (lo, hi) = subtree_range("/a/b");
        assert!("/a/b/c".to_string() >= lo && "/a/b/c".to_string() < hi);
        assert!(!("/a/bbb.txt".to_string() >= lo && "/a/bbb.txt".to_string() < hi));
        assert!(!("/a/b".to_string() >= lo && "/a/b".to_string() < hi));
    }
}
