//! One physical source, many logical cursors.
//!
//! Every open member reader gets its own [`SharedFile`] with its own
//! position. The source itself sits behind a mutex; each operation locks
//! it, moves the real cursor to the handle's position, does its work and
//! records the new position. Handles therefore never observe each other's
//! seeks.

use std::io::{self, Read, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

use super::Source;
use crate::error::{Result, ZipError};

struct Inner<R> {
    source: Option<R>,
    refs: usize,
    close_on_release: bool,
}

/// Reference-counted owner of an archive's byte source.
///
/// The archive holds the first reference; every member reader takes one
/// more. When the count drops to zero and the source was opened by the
/// archive itself, the source is dropped (closing the descriptor).
pub struct SharedSource<R> {
    inner: Mutex<Inner<R>>,
    seekable: bool,
}

impl<R: Source> SharedSource<R> {
    /// Wrap `source` with one reference already held by the caller.
    pub fn new(source: R, close_on_release: bool) -> Arc<Self> {
        let seekable = source.seekable();
        Arc::new(Self {
            inner: Mutex::new(Inner {
                source: Some(source),
                refs: 1,
                close_on_release,
            }),
            seekable,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<R>>> {
        self.inner
            .lock()
            .map_err(|_| ZipError::Io(io::Error::other("shared source lock poisoned")))
    }

    /// Take another reference. Fails once the source has been dropped.
    pub fn acquire(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.source.is_none() {
            return Err(ZipError::ArchiveClosed);
        }
        inner.refs += 1;
        Ok(())
    }

    /// Give back one reference.
    pub fn release(&self) {
        // A poisoned lock only means another holder panicked mid-read; the
        // count itself is still consistent.
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.refs = inner.refs.saturating_sub(1);
        if inner.refs == 0 && inner.close_on_release && inner.source.take().is_some() {
            trace!("last reference released, closing source");
        }
    }

    /// Number of live references.
    pub fn refs(&self) -> usize {
        self.lock().map(|inner| inner.refs).unwrap_or(0)
    }

    /// True while the underlying source is still open.
    pub fn is_open(&self) -> bool {
        self.lock().map(|inner| inner.source.is_some()).unwrap_or(false)
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Run `f` on the source under the lock.
    pub fn with_source<T>(&self, f: impl FnOnce(&mut R) -> io::Result<T>) -> Result<T> {
        let mut inner = self.lock()?;
        let source = inner.source.as_mut().ok_or(ZipError::ArchiveClosed)?;
        Ok(f(source)?)
    }

    /// Take the source back if nothing else references it.
    pub fn into_inner(self: Arc<Self>) -> Option<R> {
        let shared = Arc::into_inner(self)?;
        let inner = match shared.inner.into_inner() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.source
    }
}

/// A cursor over a [`SharedSource`] that holds one reference to it.
pub struct SharedFile<R: Source> {
    shared: Arc<SharedSource<R>>,
    pos: u64,
    closed: bool,
}

impl<R: Source> SharedFile<R> {
    /// Take a new reference and start at `pos`.
    pub fn open(shared: &Arc<SharedSource<R>>, pos: u64) -> Result<Self> {
        shared.acquire()?;
        Ok(Self {
            shared: Arc::clone(shared),
            pos,
            closed: false,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(ZipError::EntryClosed);
        }
        Ok(())
    }

    /// Read into `buf` at this handle's position.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let pos = self.pos;
        let n = self.shared.with_source(|source| {
            source.seek(SeekFrom::Start(pos))?;
            source.read(buf)
        })?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Read up to `n` bytes, fewer only at end of source.
    pub fn read_up_to(&mut self, n: usize) -> Result<Vec<u8>> {
        self.check_open()?;
        let pos = self.pos;
        let data = self.shared.with_source(|source| {
            source.seek(SeekFrom::Start(pos))?;
            let mut data = Vec::with_capacity(n);
            source.take(n as u64).read_to_end(&mut data)?;
            Ok(data)
        })?;
        self.pos += data.len() as u64;
        Ok(data)
    }

    /// Move this handle. `Current` is relative to the handle, not the source.
    pub fn seek(&mut self, target: SeekFrom) -> Result<u64> {
        self.check_open()?;
        let pos = match target {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta).ok_or_else(|| {
                ZipError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "invalid seek to a negative position",
                ))
            })?,
            SeekFrom::End(_) => self.shared.with_source(|source| source.seek(target))?,
        };
        self.pos = pos;
        Ok(pos)
    }

    pub fn tell(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.pos)
    }

    pub fn is_seekable(&self) -> bool {
        self.shared.is_seekable()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release this handle's reference. Safe to call more than once.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.release();
        }
    }
}

impl<R: Source> Drop for SharedFile<R> {
    fn drop(&mut self) {
        self.close();
    }
}
