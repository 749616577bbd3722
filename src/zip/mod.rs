//! ZIP container reading.
//!
//! ## Architecture
//!
//! - [`structures`]: fixed-layout records (EOCD, ZIP64 locator and record,
//!   central and local headers)
//! - [`parser`]: locates the end record and walks the central directory
//! - [`info`]: per-member metadata, including extra-field decoding
//! - [`codec`] and [`crypto`]: decompression and legacy PKWARE decryption
//! - [`reader`]: the seekable, CRC-checked stream over one member
//! - [`archive`]: the archive handle tying it together, plus extraction
//!
//! ## Reading order
//!
//! The end of central directory record is read first (from the end of the
//! source), then the central directory. Member data is only touched when a
//! member is opened, so listing a multi-gigabyte checkpoint costs a few
//! kilobytes of I/O.
//!
//! ## Supported features
//!
//! - ZIP64 end records and extra fields
//! - Archives with prepended data (self-extractors, concatenated files)
//! - STORED, DEFLATE, BZIP2 and LZMA members
//! - Traditional PKWARE encryption
//!
//! Multi-disk archives, strong encryption and patch data are rejected.

mod archive;
pub mod codec;
pub mod cp437;
pub mod crypto;
mod extractor;
pub mod info;
pub mod parser;
pub mod reader;
pub mod structures;
pub mod util;

pub use archive::{ArchiveConfig, ZipArchive, is_zip_source, is_zipfile};
pub use codec::{Decompressor, new_decompressor};
pub use crypto::ZipDecrypter;
pub use extractor::member_path;
pub use info::{DateTime, ZipInfo};
pub use parser::{Directory, EndRecord, ZipParser};
pub use reader::ZipEntryReader;
pub use structures::*;
