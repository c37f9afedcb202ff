use crate::path;
use crate::source::{ReadAt, SourceCursor};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use tar::EntryType;

/// Permission bits given to directories that are implied but never listed.
const IMPLICIT_DIR_MODE: u32 = 0o755;

/// Kind of an archive member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Symlink,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryKind::File => "regular file",
            EntryKind::Dir => "directory",
            EntryKind::Symlink => "symlink",
        })
    }
}

/// Location of a file's bytes within the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    /// Byte offset of the first content byte.
    pub offset: u64,
    /// Number of content bytes.
    pub len: u64,
}

/// One archive member, recorded before symlink resolution.
#[derive(Debug, Clone)]
pub struct RawEntry {
    /// Normalized path; the root is `""`.
    pub path: String,
    /// Member kind.
    pub kind: EntryKind,
    /// Content size in bytes (zero for directories and symlinks).
    pub size: u64,
    /// Permission bits.
    pub mode: u32,
    /// Modification time.
    pub modified: DateTime<Utc>,
    /// Link target exactly as stored in the archive (symlinks only).
    pub link_target: Option<String>,
    /// Content location (files only).
    pub span: Option<Span>,
    /// Whether this is a placeholder for a directory that was never listed.
    pub implicit: bool,
}

impl RawEntry {
    fn implicit_dir(path: String) -> Self {
        Self {
            path,
            kind: EntryKind::Dir,
            size: 0,
            mode: IMPLICIT_DIR_MODE,
            modified: DateTime::default(),
            link_target: None,
            span: None,
            implicit: true,
        }
    }
}

/// Order-preserving table of the members of a tar archive.
#[derive(Debug)]
pub struct TarIndex {
    root: RawEntry,
    entries: Vec<RawEntry>,
    by_path: HashMap<String, usize>,
}

impl Default for TarIndex {
    fn default() -> Self {
        Self {
            root: RawEntry::implicit_dir(String::new()),
            entries: Vec::new(),
            by_path: HashMap::new(),
        }
    }
}

impl TarIndex {
    /// Index every member of the tar stream starting at offset zero of
    /// `source`.
    ///
    /// The whole stream is consumed before this returns. File contents are
    /// not read; only their spans are recorded.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPath`] for absolute, `..`, or non-UTF-8 names
    /// - [`Error::Unsupported`] for member types other than file, directory,
    ///   and symlink
    /// - [`Error::Conflict`] when a path is listed with two different kinds
    /// - [`Error::IoError`] for read failures and malformed headers
    pub fn build(source: &dyn ReadAt) -> Result<Self> {
        let mut archive = tar::Archive::new(SourceCursor::new(source));
        let mut index = Self::default();

        for entry in archive.entries_with_seek()? {
            let entry = entry?;
            if let Some(raw) = raw_entry(&entry)? {
                index.insert(raw)?;
            }
        }

        debug!(
            "indexed {} entries ({} implicit directories)",
            index.entries.len(),
            index.entries.iter().filter(|e| e.implicit).count()
        );
        Ok(index)
    }

    /// The root directory entry. Its metadata comes from a `./` member when
    /// the archive has one.
    pub fn root(&self) -> &RawEntry {
        &self.root
    }

    /// All non-root entries in first-seen order.
    pub fn entries(&self) -> &[RawEntry] {
        &self.entries
    }

    /// Find an entry by normalized path. `""` returns the root.
    pub fn get(&self, path: &str) -> Option<&RawEntry> {
        if path.is_empty() {
            return Some(&self.root);
        }
        self.by_path.get(path).map(|&i| &self.entries[i])
    }

    /// Number of non-root entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive has no entries besides the root.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `entry`, synthesizing any missing parent directories.
    ///
    /// A later explicit entry replaces an implicit placeholder or an earlier
    /// entry of the same kind, keeping the original table position.
    pub fn insert(&mut self, entry: RawEntry) -> Result<()> {
        if entry.path.is_empty() {
            if entry.kind != EntryKind::Dir {
                return Err(Error::InvalidPath(entry.path));
            }
            self.root = entry;
            return Ok(());
        }

        self.ensure_parents(&entry.path);

        match self.by_path.get(&entry.path) {
            Some(&i) => {
                let existing = &mut self.entries[i];
                if !existing.implicit && existing.kind != entry.kind {
                    return Err(Error::Conflict {
                        path: entry.path,
                        existing: existing.kind,
                        incoming: entry.kind,
                    });
                }
                *existing = entry;
            }
            None => {
                self.by_path.insert(entry.path.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        Ok(())
    }

    fn ensure_parents(&mut self, path: &str) {
        for (i, _) in path.match_indices('/') {
            let parent = &path[..i];
            if !self.by_path.contains_key(parent) {
                trace!("synthesizing directory {:?}", parent);
                self.by_path.insert(parent.to_string(), self.entries.len());
                self.entries.push(RawEntry::implicit_dir(parent.to_string()));
            }
        }
    }
}

/// Convert one tar member into a [`RawEntry`]. PAX global headers yield
/// `None`.
fn raw_entry<R: Read>(entry: &tar::Entry<'_, R>) -> Result<Option<RawEntry>> {
    let header = entry.header();
    let entry_type = header.entry_type();
    if entry_type.is_pax_global_extensions() {
        trace!("skipping PAX global header");
        return Ok(None);
    }

    let raw_name = entry.path_bytes();
    let name = utf8(&raw_name)?;

    let kind = match entry_type {
        EntryType::Regular | EntryType::Continuous if name.ends_with('/') => EntryKind::Dir,
        EntryType::Regular | EntryType::Continuous => EntryKind::File,
        EntryType::Directory => EntryKind::Dir,
        EntryType::Symlink => EntryKind::Symlink,
        other => {
            return Err(Error::Unsupported {
                path: name.to_string(),
                kind: describe(other),
            })
        }
    };

    let path = path::normalize_member(name)?.unwrap_or_default();
    let modified = i64::try_from(header.mtime()?)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_default();

    let (size, span) = match kind {
        EntryKind::File => (
            entry.size(),
            Some(Span {
                offset: entry.raw_file_position(),
                len: entry.size(),
            }),
        ),
        _ => (0, None),
    };

    let link_target = match kind {
        EntryKind::Symlink => {
            let target = entry
                .link_name_bytes()
                .ok_or_else(|| Error::InvalidPath(name.to_string()))?;
            let target = utf8(&target)?;
            if target.is_empty() {
                return Err(Error::InvalidPath(name.to_string()));
            }
            Some(target.to_string())
        }
        _ => None,
    };

    trace!("member {:?} kind={} size={}", path, kind, size);
    Ok(Some(RawEntry {
        path,
        kind,
        size,
        mode: header.mode()? & 0o7777,
        modified,
        link_target,
        span,
        implicit: false,
    }))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map_err(|_| Error::InvalidPath(String::from_utf8_lossy(bytes).into_owned()))
}

fn describe(entry_type: EntryType) -> String {
    match entry_type {
        EntryType::Link => "hard link".to_string(),
        EntryType::Char => "character device".to_string(),
        EntryType::Block => "block device".to_string(),
        EntryType::Fifo => "fifo".to_string(),
        EntryType::GNUSparse => "sparse file".to_string(),
        other => format!("type flag {:?}", other.as_byte() as char),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::{Builder, Header};

    fn header(path: &str, entry_type: EntryType, size: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_entry_type(entry_type);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        header
    }

    fn append_file(builder: &mut Builder<Vec<u8>>, path: &str, data: &[u8]) {
        let mut h = header(path, EntryType::Regular, data.len() as u64);
        h.set_cksum();
        builder.append(&h, data).unwrap();
    }

    fn append_dir(builder: &mut Builder<Vec<u8>>, path: &str) {
        let mut h = header(path, EntryType::Directory, 0);
        h.set_mode(0o750);
        h.set_cksum();
        builder.append(&h, std::io::empty()).unwrap();
    }

    fn append_link(builder: &mut Builder<Vec<u8>>, path: &str, entry_type: EntryType, target: &str) {
        let mut h = header(path, entry_type, 0);
        h.set_link_name(target).unwrap();
        h.set_cksum();
        builder.append(&h, std::io::empty()).unwrap();
    }

    /// Single-member archive with a raw name, bypassing `tar::Builder`'s
    /// path validation.
    fn raw_archive(name: &[u8], content: &[u8]) -> Vec<u8> {
        let mut header = [0u8; 512];
        header[..name.len()].copy_from_slice(name);
        header[100..107].copy_from_slice(b"0000644");
        header[108..115].copy_from_slice(b"0000000");
        header[116..123].copy_from_slice(b"0000000");
        header[124..135].copy_from_slice(format!("{:011o}", content.len()).as_bytes());
        header[136..147].copy_from_slice(b"00000000000");
        header[156] = b'0';
        header[257..262].copy_from_slice(b"ustar");
        header[263..265].copy_from_slice(b"00");
        header[148..156].copy_from_slice(b"        ");
        let checksum: u32 = header.iter().map(|&b| u32::from(b)).sum();
        header[148..156].copy_from_slice(format!("{:06o}\0 ", checksum).as_bytes());

        let mut data = header.to_vec();
        data.extend_from_slice(content);
        data.resize(data.len() + (512 - content.len() % 512) % 512, 0);
        data.extend_from_slice(&[0u8; 1024]);
        data
    }

    #[test]
    fn test_empty_archive() {
        let data = vec![0u8; 1024];
        let index = TarIndex::build(&data).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.root().kind, EntryKind::Dir);
        assert!(index.root().implicit);
    }

    #[test]
    fn test_spans_point_at_content() {
        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "hello.txt", b"hello");
        append_file(&mut builder, "nested/world.txt", b"world!");
        let data = builder.into_inner().unwrap();

        let index = TarIndex::build(&data).unwrap();
        for (path, want) in [("hello.txt", &b"hello"[..]), ("nested/world.txt", b"world!")] {
            let entry = index.get(path).unwrap();
            let span = entry.span.unwrap();
            assert_eq!(span.len, want.len() as u64);
            let start = span.offset as usize;
            assert_eq!(&data[start..start + span.len as usize], want);
            assert_eq!(entry.mode, 0o644);
            assert_eq!(entry.modified.timestamp(), 1_700_000_000);
        }
    }

    #[test]
    fn test_implicit_parents_are_synthesized_in_order() {
        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "a/b/c.txt", b"x");
        let data = builder.into_inner().unwrap();

        let index = TarIndex::build(&data).unwrap();
        let paths: Vec<_> = index.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["a", "a/b", "a/b/c.txt"]);
        assert!(index.get("a").unwrap().implicit);
        assert_eq!(index.get("a").unwrap().mode, IMPLICIT_DIR_MODE);
    }

    #[test]
    fn test_explicit_dir_replaces_placeholder() {
        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "a/c.txt", b"x");
        append_dir(&mut builder, "a");
        let data = builder.into_inner().unwrap();

        let index = TarIndex::build(&data).unwrap();
        let dir = index.get("a").unwrap();
        assert!(!dir.implicit);
        assert_eq!(dir.mode, 0o750);
        assert_eq!(index.entries()[0].path, "a");
    }

    #[test]
    fn test_symlink_replaces_placeholder() {
        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "b/c", b"");
        append_link(&mut builder, "b", EntryType::Symlink, "a");
        let data = builder.into_inner().unwrap();

        let index = TarIndex::build(&data).unwrap();
        let link = index.get("b").unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.link_target.as_deref(), Some("a"));
    }

    #[test]
    fn test_root_member_sets_root_metadata() {
        let mut builder = Builder::new(Vec::new());
        append_dir(&mut builder, ".");
        append_file(&mut builder, "./etc/hostname", b"box\n");
        let data = builder.into_inner().unwrap();

        let index = TarIndex::build(&data).unwrap();
        assert!(!index.root().implicit);
        assert_eq!(index.root().mode, 0o750);
        assert!(index.get("etc/hostname").is_some());
    }

    #[test]
    fn test_duplicate_same_kind_keeps_latest() {
        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "f", b"old");
        append_file(&mut builder, "f", b"newer");
        let data = builder.into_inner().unwrap();

        let index = TarIndex::build(&data).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("f").unwrap().size, 5);
    }

    #[test]
    fn test_conflicting_kinds_rejected() {
        let mut builder = Builder::new(Vec::new());
        append_dir(&mut builder, "etc");
        append_link(&mut builder, "etc", EntryType::Symlink, "private/etc");
        let data = builder.into_inner().unwrap();

        let err = TarIndex::build(&data).unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict {
                ref path,
                existing: EntryKind::Dir,
                incoming: EntryKind::Symlink,
            } if path == "etc"
        ));
    }

    #[test]
    fn test_hard_link_unsupported() {
        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "a", b"data");
        append_link(&mut builder, "b", EntryType::Link, "a");
        let data = builder.into_inner().unwrap();

        let err = TarIndex::build(&data).unwrap_err();
        assert!(matches!(err, Error::Unsupported { ref path, ref kind } if path == "b" && kind == "hard link"));
    }

    #[test]
    fn test_invalid_member_paths_rejected() {
        for name in [&b"../escape/file.txt"[..], b"/etc/passwd", b"a/../../b"] {
            let data = raw_archive(name, b"x");
            let err = TarIndex::build(&data).unwrap_err();
            assert!(matches!(err, Error::InvalidPath(_)), "{:?}", err);
        }
    }

    #[test]
    fn test_trailing_slash_regular_is_directory() {
        let data = raw_archive(b"legacy/", b"");
        let index = TarIndex::build(&data).unwrap();
        assert_eq!(index.get("legacy").unwrap().kind, EntryKind::Dir);
    }
}
