//! Slash-separated path helpers shared by the indexer and the resolver.
//!
//! Paths handled here are archive-relative: the root is the empty string and
//! components are joined with `/`.

use crate::{Error, Result};

/// Normalizes an archive member name.
///
/// Leading `./`, empty segments, `.` segments and trailing slashes are
/// dropped. Returns `Ok(None)` when the name denotes the archive root.
///
/// # Errors
///
/// Returns [`Error::InvalidPath`] for absolute names and names with `..`.
pub fn normalize_member(name: &str) -> Result<Option<String>> {
    if name.starts_with('/') {
        return Err(Error::InvalidPath(name.to_string()));
    }

    let mut parts = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(Error::InvalidPath(name.to_string())),
            part => parts.push(part),
        }
    }

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

/// Iterates the components of a normalized path. The root yields nothing.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

/// Splits a normalized path into its parent and final component.
///
/// Top-level names have the root (`""`) as parent.
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

/// Joins `name` below `dir`, where `""` is the root.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Resolves a symlink target against the directory holding the link.
///
/// Absolute targets start at the archive root. `..` above the root stays at
/// the root, so the result never escapes the archive.
pub fn resolve_link(dir: &str, target: &str) -> String {
    let mut parts: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        components(dir).collect()
    };

    for part in target.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }

    parts.join("/")
}
