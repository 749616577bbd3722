//! Error types for ZIP inspection.
//!
//! Every failure surfaces as a [`ZipError`]. Callers that only care about the
//! broad category (corrupt input vs. unsupported feature vs. misuse) can
//! match on [`ZipError::kind`] instead of the individual variants.

use std::io;
use thiserror::Error;

/// Broad category of a [`ZipError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing magic number, truncated record, corrupt extra field.
    Format,
    /// A feature the reader does not implement. Not a bug in the archive.
    Unsupported,
    /// Wrong password, overlapping entries or a CRC mismatch.
    Security,
    /// Programmer error: closed handle, missing password, non-seekable source.
    Usage,
    /// A member name that is not in the archive.
    NotFound,
    /// Error from the underlying byte source.
    Io,
}

/// The error type for archive operations.
#[derive(Debug, Error)]
pub enum ZipError {
    /// I/O error from the underlying source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No end of central directory record could be located.
    #[error("File is not a zip file")]
    NotAZip,

    /// Structural corruption.
    #[error("{0}")]
    Format(String),

    /// A feature (version, flag bit) this reader does not implement.
    #[error("{0}")]
    Unsupported(String),

    /// Compression method without a decoder.
    #[error("Unsupported compression type: {method}{}", describe_method(.method))]
    UnsupportedCompression {
        /// Method code from the entry header.
        method: u16,
    },

    /// The encryption header check byte did not match.
    #[error("Bad password for file {0:?}")]
    BadPassword(String),

    /// The entry's data region runs into the next entry or the central directory.
    #[error("Overlapped entries: {0:?} (possible zip bomb)")]
    OverlappedEntries(String),

    /// The decompressed data does not match the stored CRC-32.
    #[error("Bad CRC-32 for file {name:?}: expected {expected:#010x}, computed {computed:#010x}")]
    BadCrc {
        /// Entry name.
        name: String,
        /// CRC-32 stored in the central directory.
        expected: u32,
        /// CRC-32 over the bytes actually produced.
        computed: u32,
    },

    /// The entry is encrypted and no password was supplied.
    #[error("File {0:?} is encrypted, password required for extraction")]
    PasswordRequired(String),

    /// No member with that name.
    #[error("There is no item named {0:?} in the archive")]
    NotFound(String),

    /// Operation on an archive after `close()`.
    #[error("Attempt to use ZIP archive that was already closed")]
    ArchiveClosed,

    /// Operation on an entry reader after `close()`.
    #[error("I/O operation on closed entry")]
    EntryClosed,

    /// Random access requested over a sequential source.
    #[error("underlying stream is not seekable")]
    NotSeekable,

    /// Extraction target reduced to nothing after sanitizing.
    #[error("Empty filename after sanitizing {0:?}")]
    EmptyFilename(String),
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, ZipError>;

impl ZipError {
    /// Create a format (corruption) error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// Create an unsupported-feature error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::NotAZip | Self::Format(_) => ErrorKind::Format,
            Self::Unsupported(_) | Self::UnsupportedCompression { .. } => ErrorKind::Unsupported,
            Self::BadPassword(_) | Self::OverlappedEntries(_) | Self::BadCrc { .. } => {
                ErrorKind::Security
            }
            Self::PasswordRequired(_)
            | Self::ArchiveClosed
            | Self::EntryClosed
            | Self::NotSeekable
            | Self::EmptyFilename(_) => ErrorKind::Usage,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// True for errors that mean the archive content is damaged or hostile.
    ///
    /// This is what `testzip` reports as an offending member. A wrong password
    /// is deliberately not part of it.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::NotAZip
                | Self::Format(_)
                | Self::OverlappedEntries(_)
                | Self::BadCrc { .. }
        )
    }
}

fn describe_method(method: &u16) -> String {
    let name = match *method {
        1 => "shrink",
        2..=5 => "reduce",
        6 | 10 => "implode",
        7 => "tokenize",
        9 => "deflate64",
        18 => "terse",
        19 => "lz77",
        97 => "wavpack",
        98 => "ppmd",
        _ => return String::new(),
    };
    format!(" ({name})")
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        if let ZipError::Io(inner) = err {
            return inner;
        }
        let kind = match err.kind() {
            ErrorKind::Io => io::ErrorKind::Other,
            ErrorKind::Format | ErrorKind::Security => io::ErrorKind::InvalidData,
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            ErrorKind::Usage => io::ErrorKind::InvalidInput,
            ErrorKind::NotFound => io::ErrorKind::NotFound,
        };
        io::Error::new(kind, err)
    }
}
