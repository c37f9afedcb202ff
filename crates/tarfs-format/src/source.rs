//! Positional byte sources.
//!
//! Every read of archive content goes through [`ReadAt`], so no two readers
//! ever share a cursor. Sources that only expose a single cursor are wrapped
//! in [`SeekSource`], which serializes seek-then-read pairs behind a lock.

use crate::{Error, Result};
use log::trace;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

/// Random-access byte source.
///
/// Implementations must be safe to call from several threads at once.
pub trait ReadAt: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read; `0` means `offset` is at or past the
    /// end of the source.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = match usize::try_from(offset) {
            Ok(start) if start < self.len() => start,
            _ => return Ok(0),
        };
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Box<T> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

#[cfg(unix)]
impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

/// Adapter turning a single-cursor `Read + Seek` value into a [`ReadAt`].
///
/// Offsets are relative to the reader's position when it was wrapped, so a
/// tar stream embedded at a non-zero position is addressed from its start.
#[derive(Debug)]
pub struct SeekSource<R> {
    inner: Mutex<R>,
    base: u64,
}

impl<R: Read + Seek + Send> SeekSource<R> {
    /// Wrap `inner`, recording its current position as offset zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSeekable`] if the reader cannot report its
    /// position, which is how pipes and sockets present themselves.
    pub fn new(mut inner: R) -> Result<Self> {
        let base = inner.stream_position().map_err(Error::NotSeekable)?;
        trace!("SeekSource::new(base={})", base);
        Ok(Self {
            inner: Mutex::new(inner),
            base,
        })
    }

    /// Offset of the wrapped stream's start within the reader.
    pub fn base(&self) -> u64 {
        self.base
    }
}

impl<R: Read + Seek + Send> ReadAt for SeekSource<R> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "source lock poisoned"))?;
        let position = self.base.checked_add(offset).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "offset overflows source")
        })?;
        inner.seek(SeekFrom::Start(position))?;
        inner.read(buf)
    }
}

/// Sequential `Read + Seek` view over a [`ReadAt`], used to drive the tar
/// parser during indexing.
///
/// The cursor is private to its owner; the source itself stays shareable.
pub struct SourceCursor<'a> {
    source: &'a dyn ReadAt,
    position: u64,
}

impl<'a> SourceCursor<'a> {
    /// Create a cursor positioned at offset zero.
    pub fn new(source: &'a dyn ReadAt) -> Self {
        Self {
            source,
            position: 0,
        }
    }
}

impl Read for SourceCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read_at(buf, self.position)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for SourceCursor<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(n) => self.position.checked_add_signed(n),
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "source length is unknown",
                ))
            }
        };

        let new_pos = new_pos.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "invalid seek to a negative position")
        })?;
        self.position = new_pos;
        Ok(new_pos)
    }
}
