//! Byte sources an archive can be read from.
//!
//! Any `Read + Seek` type works. Opening members concurrently goes through
//! [`SharedFile`], which keeps one cursor per open member over a single
//! underlying source.

mod local;
mod shared;

pub use local::LocalFile;
pub use shared::{SharedFile, SharedSource};

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// A readable, positionable archive source.
pub trait Source: Read + Seek + Send {
    /// Whether entry readers may offer random access over this source.
    fn seekable(&self) -> bool {
        true
    }
}

impl Source for File {}

impl<T: AsRef<[u8]> + Send> Source for Cursor<T> {}

impl<S: Source + ?Sized> Source for Box<S> {
    fn seekable(&self) -> bool {
        (**self).seekable()
    }
}

impl<S: Source + ?Sized> Source for &mut S {
    fn seekable(&self) -> bool {
        (**self).seekable()
    }
}

/// Wrapper that hides random access from entry readers.
///
/// The central directory is still located by seeking, but readers opened
/// over a `Sequential` source only stream forward: `seek` and `tell` fail
/// and backward seeks have no snapshot to replay from.
#[derive(Debug)]
pub struct Sequential<R>(pub R);

impl<R: Read> Read for Sequential<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Seek> Seek for Sequential<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.0.seek(pos)
    }
}

impl<R: Read + Seek + Send> Source for Sequential<R> {
    fn seekable(&self) -> bool {
        false
    }
}
