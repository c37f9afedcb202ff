//! # tarfs-format
//!
//! Core library for indexing tar archives without extracting them.
//!
//! This crate provides:
//! - A single-pass tar indexer producing an order-preserving table of members
//! - Positional byte sources ([`ReadAt`]) over files, memory, and seekable readers
//! - Member path normalization
//! - The error type shared by every `tarfs` crate
//!
//! ## Example
//!
//! ```ignore
//! use tarfs_format::{EntryKind, TarIndex};
//!
//! let bytes = std::fs::read("layer.tar")?;
//! let index = TarIndex::build(&bytes)?;
//!
//! for entry in index.entries() {
//!     if entry.kind == EntryKind::File {
//!         println!("{} ({} bytes)", entry.path, entry.size);
//!     }
//! }
//! ```

mod error;
mod index;
pub mod path;
mod source;

pub use error::{Error, Result};
pub use index::{EntryKind, RawEntry, Span, TarIndex};
pub use source::{ReadAt, SeekSource, SourceCursor};
