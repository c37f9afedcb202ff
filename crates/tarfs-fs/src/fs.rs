use crate::reader::FileReader;
use crate::tree::{NodeId, NodeKind, Tree, ROOT};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;
use tarfs_format::{path, Error, ReadAt, Result, SeekSource, TarIndex};

/// Kind of a filesystem object as seen by callers. Symlinks are always
/// reported as the kind of their target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FileKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
}

/// Metadata of a file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Metadata {
    /// Final component of the path that was looked up (`.` for a view root).
    pub name: String,
    /// Resolved kind.
    pub kind: FileKind,
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Permission bits.
    pub mode: u32,
    /// Modification time.
    pub modified: DateTime<Utc>,
}

impl Metadata {
    /// Whether this describes a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }

    /// Whether this describes a regular file.
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Size in bytes.
    pub fn len(&self) -> u64 {
        self.size
    }

    /// Whether the size is zero.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DirEntry {
    /// Name within the directory.
    pub name: String,
    /// Resolved kind.
    pub kind: FileKind,
    /// Size in bytes (zero for directories).
    pub size: u64,
}

impl DirEntry {
    /// Whether the entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Dir
    }
}

/// An open directory. Iterating yields its entries sorted by name; the cursor
/// belongs to this handle alone.
#[derive(Debug)]
pub struct DirHandle {
    metadata: Metadata,
    entries: Vec<DirEntry>,
    position: usize,
}

impl DirHandle {
    /// Metadata captured when the directory was opened.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Return up to `n` further entries. An empty result means the listing
    /// is exhausted.
    pub fn read_dir(&mut self, n: usize) -> Vec<DirEntry> {
        let end = self.entries.len().min(self.position.saturating_add(n));
        let batch = self.entries[self.position..end].to_vec();
        self.position = end;
        batch
    }
}

impl Iterator for DirHandle {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        let entry = self.entries.get(self.position).cloned()?;
        self.position += 1;
        Some(entry)
    }
}

/// Result of [`TarFs::open`].
#[derive(Debug)]
pub enum Handle {
    /// A regular file, readable and seekable.
    File(FileReader),
    /// A directory listing.
    Dir(DirHandle),
}

impl Handle {
    /// Metadata captured at open time.
    pub fn metadata(&self) -> &Metadata {
        match self {
            Handle::File(file) => file.metadata(),
            Handle::Dir(dir) => dir.metadata(),
        }
    }

    /// Whether the handle is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, Handle::Dir(_))
    }

    /// The file reader, if this is a file.
    pub fn into_file(self) -> Option<FileReader> {
        match self {
            Handle::File(file) => Some(file),
            Handle::Dir(_) => None,
        }
    }
}

/// A read-only filesystem over a tar archive.
///
/// The archive is indexed and resolved once, at construction. Afterwards the
/// value is immutable and cheap to clone; clones and [`TarFs::sub`] views
/// share the resolved tree and the byte source.
///
/// Paths are relative and `/`-separated, with `.` naming the view root.
#[derive(Clone)]
pub struct TarFs {
    inner: Arc<TarFsInner>,
    root: NodeId,
}

struct TarFsInner {
    tree: Tree,
    source: Arc<dyn ReadAt>,
}

impl TarFs {
    /// Build a filesystem from a seekable reader positioned at the start of a
    /// tar stream.
    ///
    /// Reads are serialized through a lock because the reader has a single
    /// cursor. Prefer [`TarFs::from_file`] or [`TarFs::from_source`] when
    /// positional reads are available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSeekable`] if the reader cannot report its
    /// position, and any indexing or resolution error otherwise.
    pub fn new<R: Read + Seek + Send + 'static>(reader: R) -> Result<Self> {
        Self::from_source(SeekSource::new(reader)?)
    }

    /// Build a filesystem from a file holding a tar archive from its first
    /// byte. Content is read with positional reads, without locking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSeekable`] for pipes and other unseekable files.
    pub fn from_file(mut file: File) -> Result<Self> {
        file.stream_position().map_err(Error::NotSeekable)?;
        Self::from_source(file)
    }

    /// Open the archive at `path` on disk.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("opening archive {}", path.display());
        Self::from_file(File::open(path)?)
    }

    /// Build a filesystem from any positional byte source.
    pub fn from_source<S: ReadAt + 'static>(source: S) -> Result<Self> {
        let index = TarIndex::build(&source)?;
        let tree = Tree::build(&index)?;
        debug!(
            "built filesystem: {} members, {} nodes",
            index.len(),
            tree.len()
        );

        Ok(Self {
            inner: Arc::new(TarFsInner {
                tree,
                source: Arc::new(source),
            }),
            root: ROOT,
        })
    }

    /// Metadata of the object at `path`, following symlinks.
    pub fn stat(&self, path: &str) -> Result<Metadata> {
        trace!("stat({:?})", path);
        let id = self.resolve(path)?;
        Ok(self.metadata(id, path))
    }

    /// Open the object at `path`. Every call returns a fresh handle.
    pub fn open(&self, path: &str) -> Result<Handle> {
        trace!("open({:?})", path);
        let id = self.resolve(path)?;
        let metadata = self.metadata(id, path);

        let handle = match &self.inner.tree.node(id).kind {
            NodeKind::File(span) => Handle::File(FileReader::new(
                Arc::clone(&self.inner.source),
                *span,
                metadata,
            )),
            NodeKind::Dir(_) => Handle::Dir(DirHandle {
                metadata,
                entries: self.entries(id),
                position: 0,
            }),
        };
        Ok(handle)
    }

    /// List the directory at `path`, sorted by name.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        trace!("read_dir({:?})", path);
        let id = self.resolve(path)?;
        if !self.inner.tree.node(id).is_dir() {
            return Err(Error::NotADirectory(path.to_string()));
        }
        let entries = self.entries(id);
        debug!("read_dir: returning {} entries", entries.len());
        Ok(entries)
    }

    /// Read the whole file at `path`.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        trace!("read_file({:?})", path);
        match self.open(path)? {
            Handle::File(mut file) => {
                // The declared size is untrusted until the bytes are read.
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                Ok(data)
            }
            Handle::Dir(_) => Err(Error::IsADirectory(path.to_string())),
        }
    }

    /// A view rooted at the directory at `path`, sharing this filesystem's
    /// tree and source.
    pub fn sub(&self, path: &str) -> Result<TarFs> {
        trace!("sub({:?})", path);
        let id = self.resolve(path)?;
        if !self.inner.tree.node(id).is_dir() {
            return Err(Error::NotADirectory(path.to_string()));
        }
        Ok(TarFs {
            inner: Arc::clone(&self.inner),
            root: id,
        })
    }

    /// Every path below `path`, depth first with siblings sorted by name.
    /// Paths are relative to this view's root. A directory reachable under
    /// several names is listed under each of them.
    pub fn walk(&self, path: &str) -> Result<Vec<String>> {
        trace!("walk({:?})", path);
        let id = self.resolve(path)?;
        let prefix = if path == "." { "" } else { path };
        let mut out = Vec::new();
        self.walk_into(id, prefix, &mut out);
        Ok(out)
    }

    fn walk_into(&self, id: NodeId, prefix: &str, out: &mut Vec<String>) {
        let Some(children) = self.inner.tree.node(id).children() else {
            return;
        };
        for (name, &child) in children {
            let child_path = path::join(prefix, name);
            out.push(child_path.clone());
            self.walk_into(child, &child_path, out);
        }
    }

    fn resolve(&self, path: &str) -> Result<NodeId> {
        validate_path(path)?;
        if path == "." {
            return Ok(self.root);
        }
        self.inner.tree.lookup(self.root, path)
    }

    fn metadata(&self, id: NodeId, path: &str) -> Metadata {
        let node = self.inner.tree.node(id);
        let (_, name) = path::split(path);
        Metadata {
            name: name.to_string(),
            kind: if node.is_dir() {
                FileKind::Dir
            } else {
                FileKind::File
            },
            size: if node.is_dir() { 0 } else { node.size },
            mode: node.mode,
            modified: node.modified,
        }
    }

    fn entries(&self, id: NodeId) -> Vec<DirEntry> {
        let tree = &self.inner.tree;
        tree.node(id)
            .children()
            .map(|children| {
                children
                    .iter()
                    .map(|(name, &child)| {
                        let node = tree.node(child);
                        DirEntry {
                            name: name.clone(),
                            kind: if node.is_dir() {
                                FileKind::Dir
                            } else {
                                FileKind::File
                            },
                            size: if node.is_dir() { 0 } else { node.size },
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Debug for TarFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TarFs")
            .field("root", &self.root)
            .field("nodes", &self.inner.tree.len())
            .finish()
    }
}

/// Checks lookup path syntax: `.` or non-empty `/`-separated names without
/// `.` or `..` elements and without leading or trailing slashes.
fn validate_path(path: &str) -> Result<()> {
    if path == "." {
        return Ok(());
    }
    let valid = !path.is_empty()
        && path
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_string()))
    }
}
