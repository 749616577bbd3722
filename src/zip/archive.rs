//! Top-level archive handle.

use encoding_rs::Encoding;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::info::ZipInfo;
use super::parser::{ZipParser, decode_name};
use super::reader::ZipEntryReader;
use super::structures::{
    FLAG_COMPRESSED_PATCH, FLAG_ENCRYPTED, FLAG_STRONG_ENCRYPTION, LocalFileHeader,
};
use crate::error::{Result, ZipError};
use crate::io::{LocalFile, SharedFile, SharedSource, Source};

/// Chunk size used by [`ZipArchive::testzip`].
const TEST_CHUNK_SIZE: usize = 1 << 20;

/// Options for opening an archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveConfig {
    /// Default password for encrypted members.
    pub password: Option<Vec<u8>>,
    /// Encoding for member names without the UTF-8 flag. CP437 when unset.
    pub metadata_encoding: Option<&'static Encoding>,
    /// Drop the source once the archive and all readers are closed.
    pub close_source: bool,
}

impl ArchiveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Look up a WHATWG encoding label such as `"shift_jis"` or `"gbk"`.
    pub fn metadata_encoding(mut self, label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| ZipError::unsupported(format!("unknown encoding: {label}")))?;
        self.metadata_encoding = Some(encoding);
        Ok(self)
    }

    pub fn close_source(mut self, close: bool) -> Self {
        self.close_source = close;
        self
    }
}

/// A ZIP archive opened for reading.
///
/// Members can be opened concurrently from several threads; each
/// [`ZipEntryReader`] keeps its own position over the shared source.
pub struct ZipArchive<R: Source> {
    shared: Arc<SharedSource<R>>,
    entries: Vec<ZipInfo>,
    names: HashMap<String, usize>,
    comment: Vec<u8>,
    password: Option<Vec<u8>>,
    encoding: Option<&'static Encoding>,
    start_dir: u64,
    closed: bool,
}

impl ZipArchive<LocalFile> {
    /// Open the archive at `path`. The file is closed with the last handle.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_path_with_config(path, ArchiveConfig::default())
    }

    pub fn open_path_with_config(path: impl AsRef<Path>, config: ArchiveConfig) -> Result<Self> {
        let file = LocalFile::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), size = file.size(), "opening archive");
        Self::with_config(file, config.close_source(true))
    }
}

impl<R: Source> ZipArchive<R> {
    /// Read the central directory of `source`.
    pub fn new(source: R) -> Result<Self> {
        Self::with_config(source, ArchiveConfig::default())
    }

    pub fn with_config(mut source: R, config: ArchiveConfig) -> Result<Self> {
        let directory = ZipParser::new(&mut source)?
            .with_encoding(config.metadata_encoding)
            .read_directory()?;

        let mut names = HashMap::with_capacity(directory.entries.len());
        for (index, info) in directory.entries.iter().enumerate() {
            names.insert(info.filename.clone(), index);
        }

        Ok(Self {
            shared: SharedSource::new(source, config.close_source),
            entries: directory.entries,
            names,
            comment: directory.comment,
            password: config.password,
            encoding: config.metadata_encoding,
            start_dir: directory.start_dir,
            closed: false,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(ZipError::ArchiveClosed);
        }
        Ok(())
    }

    /// Member names in central directory order.
    pub fn namelist(&self) -> Vec<&str> {
        self.entries.iter().map(|info| info.filename.as_str()).collect()
    }

    /// Member metadata in central directory order.
    pub fn infolist(&self) -> &[ZipInfo] {
        &self.entries
    }

    /// Metadata for `name`. With duplicate names the last member wins.
    pub fn getinfo(&self, name: &str) -> Result<&ZipInfo> {
        self.names
            .get(name)
            .map(|&index| &self.entries[index])
            .ok_or_else(|| ZipError::NotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Archive comment.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Offset of the central directory.
    pub fn central_directory_offset(&self) -> u64 {
        self.start_dir
    }

    /// Default password for encrypted members; `None` clears it.
    pub fn set_password(&mut self, password: Option<&[u8]>) {
        self.password = password.map(<[u8]>::to_vec);
    }

    /// Write a table of contents to `out`.
    pub fn print_dir(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "{:<46} {:>19} {:>12}", "File Name", "Modified    ", "Size")?;
        for info in &self.entries {
            writeln!(
                out,
                "{:<46} {} {:>12}",
                info.filename, info.date_time, info.file_size
            )?;
        }
        Ok(())
    }

    /// Open `name` for reading, using the default password if encrypted.
    pub fn open(&self, name: &str) -> Result<ZipEntryReader<R>> {
        let info = self.getinfo(name)?;
        self.open_info(info, None)
    }

    pub fn open_with_password(&self, name: &str, password: &[u8]) -> Result<ZipEntryReader<R>> {
        let info = self.getinfo(name)?;
        self.open_info(info, Some(password))
    }

    /// Open the member described by `info`.
    ///
    /// The local header is checked against the central directory and the
    /// member's data must end before the next member starts.
    pub fn open_info(&self, info: &ZipInfo, password: Option<&[u8]>) -> Result<ZipEntryReader<R>> {
        self.check_open()?;

        // Dropping `file` on any error below gives its reference back.
        let mut file = SharedFile::open(&self.shared, info.header_offset)?;

        let raw_header = file.read_up_to(LocalFileHeader::SIZE)?;
        let header = LocalFileHeader::from_bytes(&raw_header)?;
        let raw_name = file.read_up_to(header.file_name_length as usize)?;
        if header.extra_field_length > 0 {
            file.seek(SeekFrom::Current(header.extra_field_length as i64))?;
        }

        if info.flag_bits & FLAG_COMPRESSED_PATCH != 0 {
            return Err(ZipError::unsupported("compressed patched data (flag bit 5)"));
        }
        if info.flag_bits & FLAG_STRONG_ENCRYPTION != 0 {
            return Err(ZipError::unsupported("strong encryption (flag bit 6)"));
        }

        let name = decode_name(&raw_name, header.flags, self.encoding)?;
        if name != info.orig_filename {
            return Err(ZipError::format(format!(
                "File name in directory {:?} and header {:?} differ.",
                info.orig_filename, name
            )));
        }

        if let Some(end_offset) = info.end_offset {
            let data_start = file.tell()?;
            if data_start.saturating_add(info.compress_size) > end_offset {
                return Err(ZipError::OverlappedEntries(info.orig_filename.clone()));
            }
        }

        let password = if info.flag_bits & FLAG_ENCRYPTED != 0 {
            let password = password
                .or(self.password.as_deref())
                .filter(|password| !password.is_empty());
            if password.is_none() {
                return Err(ZipError::PasswordRequired(info.filename.clone()));
            }
            password
        } else {
            None
        };

        ZipEntryReader::new(file, info, password)
    }

    /// Read a whole member into memory.
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.open(name)?.read_all()
    }

    /// Fully read every member. Returns the name of the first damaged one.
    ///
    /// Only corruption (bad CRC, bad structure, overlapping members) is
    /// reported as a name; other failures such as a missing password are
    /// returned as errors.
    pub fn testzip(&self) -> Result<Option<String>> {
        self.check_open()?;
        for info in &self.entries {
            let outcome = self.open_info(info, None).and_then(|mut reader| {
                while !reader.read_up_to(TEST_CHUNK_SIZE)?.is_empty() {}
                Ok(())
            });
            match outcome {
                Ok(()) => {}
                Err(err) if err.is_corruption() => {
                    debug!(name = %info.filename, error = %err, "member failed integrity check");
                    return Ok(Some(info.filename.clone()));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Number of open handles on the source, the archive's own included.
    pub fn source_refs(&self) -> usize {
        self.shared.refs()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the archive's reference on the source. Readers that are
    /// still open keep working; later archive operations fail.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.release();
        }
    }
}

impl<R: Source> Drop for ZipArchive<R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<R: Source> fmt::Debug for ZipArchive<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipArchive")
            .field("entries", &self.entries.len())
            .field("comment_len", &self.comment.len())
            .field("closed", &self.closed)
            .finish()
    }
}

/// True when `path` names a file with an end of central directory record.
pub fn is_zipfile(path: impl AsRef<Path>) -> bool {
    match LocalFile::open(path.as_ref()) {
        Ok(mut file) => is_zip_source(&mut file),
        Err(_) => false,
    }
}

/// True when `source` ends with an end of central directory record.
pub fn is_zip_source<S: Read + Seek>(source: &mut S) -> bool {
    ZipParser::new(source)
        .and_then(|mut parser| parser.find_eocd())
        .is_ok()
}
