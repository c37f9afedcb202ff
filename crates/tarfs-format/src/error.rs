use crate::index::EntryKind;
use std::io;
use thiserror::Error;

/// Errors that can occur when indexing or reading a tar filesystem.
#[derive(Debug, Error)]
pub enum Error {
    /// A member name or lookup path is not a valid relative path.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// The same path is declared more than once with incompatible kinds.
    #[error("conflicting entries for {path:?}: {existing} and {incoming}")]
    Conflict {
        /// Path both entries claim.
        path: String,
        /// Kind already recorded at `path`.
        existing: EntryKind,
        /// Kind of the entry that collided with it.
        incoming: EntryKind,
    },

    /// Symlink resolution re-entered a path it was still resolving.
    #[error("symlink cycle at {0:?}")]
    Cycle(String),

    /// A path continues through something that is not a directory.
    #[error("not a directory: {0:?}")]
    NotADirectory(String),

    /// A file operation was attempted on a directory.
    #[error("is a directory: {0:?}")]
    IsADirectory(String),

    /// No entry exists at the path.
    #[error("file does not exist: {0:?}")]
    NotExist(String),

    /// The byte source cannot be read at arbitrary offsets.
    #[error("source is not seekable: {0}")]
    NotSeekable(#[source] io::Error),

    /// The archive holds a member type other than file, directory, or symlink.
    #[error("unsupported tar member {path:?}: {kind}")]
    Unsupported {
        /// Member name as it appears in the archive.
        path: String,
        /// Human-readable member type.
        kind: String,
    },

    /// I/O error from the underlying source.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Result type for tarfs operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::IoError(inner) => return inner,
            Error::NotExist(_) => io::ErrorKind::NotFound,
            Error::InvalidPath(_) | Error::NotADirectory(_) | Error::IsADirectory(_) => {
                io::ErrorKind::InvalidInput
            }
            Error::NotSeekable(_) | Error::Unsupported { .. } => io::ErrorKind::Unsupported,
            Error::Conflict { .. } | Error::Cycle(_) => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}
