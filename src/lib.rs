//! # modelzip
//!
//! Read-only ZIP inspection for machine-learning model artifacts.
//!
//! PyTorch checkpoints and similar formats are ZIP containers, and they are a
//! popular place to hide payloads. This crate opens such containers without
//! trusting them: truncated records, overlapping members (zip bombs), bad
//! CRCs and wrong passwords all surface as a [`ZipError`] instead of a panic
//! or silently short data.
//!
//! ## Features
//!
//! - ZIP64 and archives with prepended data
//! - STORED, DEFLATE, BZIP2 and LZMA members
//! - Traditional PKWARE decryption
//! - Seekable member streams that share one file descriptor across threads
//! - A [`scan::ModelScanner`] hook for content scanners
//!
//! ## Example
//!
//! ```no_run
//! use std::io::Read;
//! use modelzip::ZipArchive;
//!
//! fn main() -> anyhow::Result<()> {
//!     let archive = ZipArchive::open_path("model.pt")?;
//!     for name in archive.namelist() {
//!         println!("{name}");
//!     }
//!
//!     let mut header = [0u8; 2];
//!     archive.open("archive/data.pkl")?.read_exact(&mut header)?;
//!
//!     if let Some(bad) = archive.testzip()? {
//!         eprintln!("corrupt member: {bad}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod scan;
pub mod zip;

pub use cli::Cli;
pub use error::{ErrorKind, Result, ZipError};
pub use io::{LocalFile, Sequential, SharedFile, SharedSource, Source};
pub use scan::{ModelScanner, Verdict, scan_archive};
pub use zip::{ArchiveConfig, ZipArchive, ZipEntryReader, ZipInfo, is_zip_source, is_zipfile};
