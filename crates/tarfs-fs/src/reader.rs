//! Bounded readers over file spans.

use crate::fs::Metadata;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use tarfs_format::{ReadAt, Span};

/// An open regular file.
///
/// Each reader owns its position and reads the source with positional reads,
/// so any number of readers over the same archive can be used side by side.
pub struct FileReader {
    source: Arc<dyn ReadAt>,
    span: Span,
    position: u64,
    metadata: Metadata,
}

impl FileReader {
    pub(crate) fn new(source: Arc<dyn ReadAt>, span: Span, metadata: Metadata) -> Self {
        Self {
            source,
            span,
            position: 0,
            metadata,
        }
    }

    /// Metadata captured when the file was opened.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// File length in bytes.
    pub fn len(&self) -> u64 {
        self.span.len
    }

    /// Whether the file is empty.
    pub fn is_empty(&self) -> bool {
        self.span.len == 0
    }

    /// Current position within the file.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl fmt::Debug for FileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileReader")
            .field("name", &self.metadata.name)
            .field("span", &self.span)
            .field("position", &self.position)
            .finish()
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.span.len.saturating_sub(self.position);
        let to_read = remaining.min(buf.len() as u64) as usize;
        if to_read == 0 {
            return Ok(0);
        }

        let n = self
            .source
            .read_at(&mut buf[..to_read], self.span.offset + self.position)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ended inside file content",
            ));
        }

        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for FileReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.span.len.checked_add_signed(n),
            SeekFrom::Current(n) => self.position.checked_add_signed(n),
        };

        let new_pos = new_pos.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative position",
            )
        })?;
        self.position = new_pos;
        Ok(new_pos)
    }
}
