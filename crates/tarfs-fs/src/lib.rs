//! # tarfs-fs
//!
//! Read-only filesystem over a tar archive, without extracting it.
//!
//! This crate provides:
//! - [`TarFs`], built once from a seekable tar source
//! - Symlink resolution at build time, independent of member order, with
//!   cycle and not-a-directory detection
//! - `stat`, `open`, `read_dir`, `read_file`, `sub`, and `walk` over the
//!   resolved tree, safe to call from many threads at once
//! - Independent bounded [`FileReader`]s for file contents
//!
//! ## Example
//!
//! ```ignore
//! use tarfs_fs::TarFs;
//!
//! let fs = TarFs::open_path("rootfs.tar")?;
//! for entry in fs.read_dir("etc")? {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//!
//! let release = fs.read_file("etc/os-release")?;
//! let usr = fs.sub("usr")?;
//! assert!(usr.stat("lib")?.is_dir());
//! ```
//!
//! ## Serde Support
//!
//! Enable the `serde` feature to serialize [`Metadata`] and [`DirEntry`].

mod fs;
mod reader;
mod tree;

pub use fs::{DirEntry, DirHandle, FileKind, Handle, Metadata, TarFs};
pub use reader::FileReader;

// Re-export tarfs-format types for convenience
pub use tarfs_format::{Error, ReadAt, Result, SeekSource};
