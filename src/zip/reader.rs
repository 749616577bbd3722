//! Streaming reader for a single archive member.
//!
//! Compressed bytes are pulled from the shared source in blocks, decrypted
//! if needed, decompressed and handed out through a small read-ahead
//! buffer. The declared uncompressed size is authoritative: codec output
//! beyond it is dropped, and input that runs out before it is reached is an
//! error. A running CRC-32 is checked once the last byte has been produced.
//!
//! Seeking works by moving inside the buffer when possible, skipping bytes
//! on the source for stored entries, and otherwise by rewinding to the
//! start of the member and decompressing forward again.

use std::fmt;
use std::io::{self, BufRead, Read, Seek, SeekFrom};
use tracing::trace;

use super::codec::{Decompressor, new_decompressor};
use super::crypto::{ENCRYPTION_HEADER_SIZE, ZipDecrypter};
use super::info::ZipInfo;
use super::structures::{CompressionMethod, FLAG_DATA_DESCRIPTOR};
use super::util::crc32_update;
use crate::error::{Result, ZipError};
use crate::io::{SharedFile, Source};

/// Smallest block of compressed data pulled from the source at once.
const MIN_READ_SIZE: usize = 4096;
/// Chunk size used while replaying a member to reach a seek target.
const MAX_SEEK_READ: u64 = 1 << 24;
/// Largest block produced by a single decompression step.
const MAX_BLOCK_SIZE: usize = 1 << 24;
/// Upper bound for [`ZipEntryReader::peek`].
const PEEK_LIMIT: usize = 512;

/// Where the member starts, kept for rewinding.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    compress_start: u64,
    compress_size: u64,
    expected_crc: Option<u32>,
}

/// Readable stream over one member, returned by `ZipArchive::open`.
pub struct ZipEntryReader<R: Source> {
    file: SharedFile<R>,
    name: String,
    method: CompressionMethod,
    codec: Box<dyn Decompressor>,
    password: Option<Vec<u8>>,
    decrypter: Option<ZipDecrypter>,
    check_byte: u8,
    compress_left: u64,
    left: u64,
    file_size: u64,
    eof: bool,
    buffer: Vec<u8>,
    offset: usize,
    running_crc: u32,
    expected_crc: Option<u32>,
    snapshot: Option<Snapshot>,
    closed: bool,
}

impl<R: Source> ZipEntryReader<R> {
    /// Start reading the member described by `info`.
    ///
    /// `file` must be positioned at the first byte after the local header.
    /// With a password the encryption header is consumed and checked here,
    /// so a wrong password fails before any plaintext is produced.
    pub(crate) fn new(file: SharedFile<R>, info: &ZipInfo, password: Option<&[u8]>) -> Result<Self> {
        let method = info.method();
        let codec = new_decompressor(method)?;

        let snapshot = if file.is_seekable() {
            Some(Snapshot {
                compress_start: file.tell()?,
                compress_size: info.compress_size,
                expected_crc: Some(info.crc),
            })
        } else {
            None
        };

        let check_byte = if info.flag_bits & FLAG_DATA_DESCRIPTOR != 0 {
            (info.raw_time >> 8) as u8
        } else {
            (info.crc >> 24) as u8
        };

        let mut reader = Self {
            file,
            name: info.filename.clone(),
            method,
            codec,
            password: password.map(<[u8]>::to_vec),
            decrypter: None,
            check_byte,
            compress_left: info.compress_size,
            left: info.file_size,
            file_size: info.file_size,
            eof: false,
            buffer: Vec::new(),
            offset: 0,
            running_crc: 0,
            expected_crc: Some(info.crc),
            snapshot,
            closed: false,
        };

        if reader.password.is_some() && reader.init_decrypter()? != reader.check_byte {
            return Err(ZipError::BadPassword(info.orig_filename.clone()));
        }
        Ok(reader)
    }

    /// Seed the decrypter and consume the 12-byte encryption header.
    ///
    /// Returns the decrypted check byte.
    fn init_decrypter(&mut self) -> Result<u8> {
        let Some(password) = self.password.as_deref() else {
            return Err(ZipError::PasswordRequired(self.name.clone()));
        };
        let mut decrypter = ZipDecrypter::new(password);

        if self.compress_left < ENCRYPTION_HEADER_SIZE as u64 {
            return Err(ZipError::format(format!(
                "Truncated encryption header for {:?}",
                self.name
            )));
        }
        let data = self.file.read_up_to(ENCRYPTION_HEADER_SIZE)?;
        let header: [u8; ENCRYPTION_HEADER_SIZE] = data
            .try_into()
            .map_err(|_| ZipError::format("truncated entry data"))?;
        self.compress_left -= ENCRYPTION_HEADER_SIZE as u64;

        let check = decrypter.decrypt_header(&header);
        self.decrypter = Some(decrypter);
        Ok(check)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(ZipError::EntryClosed);
        }
        Ok(())
    }

    /// Member name (sanitized).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared uncompressed size.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Read up to `n` bytes. Returns fewer only at the end of the member.
    pub fn read_up_to(&mut self, n: usize) -> Result<Vec<u8>> {
        self.check_open()?;
        let end = self.offset.saturating_add(n);
        if end < self.buffer.len() {
            let out = self.buffer[self.offset..end].to_vec();
            self.offset = end;
            return Ok(out);
        }

        let mut need = end - self.buffer.len();
        let mut out = self.take_buffer();
        while need > 0 && !self.eof {
            let data = self.read_block(need)?;
            if need < data.len() {
                out.extend_from_slice(&data[..need]);
                self.buffer = data;
                self.offset = need;
                break;
            }
            need -= data.len();
            out.extend(data);
        }
        Ok(out)
    }

    /// Read everything up to the end of the member.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.check_open()?;
        let mut out = self.take_buffer();
        while !self.eof {
            let data = self.read_block(MAX_BLOCK_SIZE)?;
            out.extend(data);
        }
        Ok(out)
    }

    /// Read up to `n` bytes with at most one block read.
    pub fn read1(&mut self, n: usize) -> Result<Vec<u8>> {
        self.check_open()?;
        let end = self.offset.saturating_add(n);
        if end < self.buffer.len() {
            let out = self.buffer[self.offset..end].to_vec();
            self.offset = end;
            return Ok(out);
        }

        let need = end - self.buffer.len();
        let mut out = self.take_buffer();
        if need > 0 {
            while !self.eof {
                let data = self.read_block(need)?;
                if need < data.len() {
                    out.extend_from_slice(&data[..need]);
                    self.buffer = data;
                    self.offset = need;
                    break;
                }
                if !data.is_empty() {
                    out.extend(data);
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Look at up to `n` upcoming bytes (at most 512) without consuming them.
    pub fn peek(&mut self, n: usize) -> Result<&[u8]> {
        self.check_open()?;
        let want = n.min(PEEK_LIMIT);
        while self.buffer.len() - self.offset < want && !self.eof {
            let data = self.read_block(want - (self.buffer.len() - self.offset))?;
            self.buffer.drain(..self.offset);
            self.offset = 0;
            self.buffer.extend(data);
        }
        let end = (self.offset + PEEK_LIMIT).min(self.buffer.len());
        Ok(&self.buffer[self.offset..end])
    }

    /// Whether `seek` and `tell` are available.
    pub fn is_seekable(&self) -> Result<bool> {
        self.check_open()?;
        Ok(self.snapshot.is_some())
    }

    /// Position in the uncompressed member.
    pub fn tell(&self) -> Result<u64> {
        self.check_open()?;
        if self.snapshot.is_none() {
            return Err(ZipError::NotSeekable);
        }
        Ok(self.file_size - self.left - self.buffer.len() as u64 + self.offset as u64)
    }

    /// Move to a position in the uncompressed member, clamped to
    /// `[0, size]`. Returns the new position.
    pub fn seek_to(&mut self, target: SeekFrom) -> Result<u64> {
        self.check_open()?;
        let Some(snapshot) = self.snapshot else {
            return Err(ZipError::NotSeekable);
        };

        let current = self.tell()?;
        let new_pos = match target {
            SeekFrom::Start(pos) => pos as i128,
            SeekFrom::Current(delta) => current as i128 + delta as i128,
            SeekFrom::End(delta) => self.file_size as i128 + delta as i128,
        }
        .clamp(0, self.file_size as i128) as u64;

        let mut read_offset = new_pos as i128 - current as i128;
        let buffer_pos = read_offset + self.offset as i128;

        if buffer_pos >= 0 && buffer_pos < self.buffer.len() as i128 {
            trace!(name = %self.name, new_pos, "seek within buffer");
            self.offset = buffer_pos as usize;
            read_offset = 0;
        } else if self.method == CompressionMethod::Stored
            && self.decrypter.is_none()
            && read_offset > 0
        {
            trace!(name = %self.name, new_pos, "seek by skipping stored bytes");
            // The CRC no longer covers a contiguous stream.
            self.expected_crc = None;
            let skip = (read_offset - (self.buffer.len() - self.offset) as i128) as u64;
            self.file.seek(SeekFrom::Current(skip as i64))?;
            self.left = self.left.saturating_sub(skip);
            self.compress_left = self.compress_left.saturating_sub(skip);
            self.buffer.clear();
            self.offset = 0;
            read_offset = 0;
        } else if read_offset < 0 {
            trace!(name = %self.name, new_pos, "seek by rewinding");
            self.file.seek(SeekFrom::Start(snapshot.compress_start))?;
            self.running_crc = 0;
            self.expected_crc = snapshot.expected_crc;
            self.compress_left = snapshot.compress_size;
            self.left = self.file_size;
            self.buffer.clear();
            self.offset = 0;
            self.codec = new_decompressor(self.method)?;
            self.eof = false;
            read_offset = new_pos as i128;
            if self.decrypter.is_some() {
                self.init_decrypter()?;
            }
        }

        let mut remaining = read_offset.max(0) as u64;
        while remaining > 0 {
            let chunk = remaining.min(MAX_SEEK_READ);
            self.read_up_to(chunk as usize)?;
            remaining -= chunk;
        }
        self.tell()
    }

    /// Release the reference on the shared source. Safe to call twice.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.buffer = Vec::new();
            self.offset = 0;
            self.file.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True once every byte of the member has been produced.
    pub fn is_eof(&self) -> bool {
        self.eof && self.offset >= self.buffer.len()
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.drain(..self.offset);
        self.offset = 0;
        buffer
    }

    /// Pull one block through decryption and decompression.
    fn read_block(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.eof || n == 0 {
            return Ok(Vec::new());
        }
        let n = n.min(MAX_BLOCK_SIZE);

        let mut data = if self.method == CompressionMethod::Stored {
            let data = self.read_compressed(n)?;
            self.eof = self.compress_left == 0;
            data
        } else {
            let pending = self.codec.unconsumed();
            let input = if n > pending {
                self.read_compressed(n - pending)?
            } else {
                Vec::new()
            };
            let limit = n.max(MIN_READ_SIZE);
            let mut data = self.codec.decompress(&input, limit)?;
            if data.is_empty() && input.is_empty() && !self.codec.is_finished() {
                // What the codec holds is not enough to make progress.
                let more = self.read_compressed(n)?;
                data = self.codec.decompress(&more, limit)?;
            }
            // Input exhausted and the codec made no progress on what it holds.
            self.eof = self.codec.is_finished() || (self.compress_left == 0 && data.is_empty());
            data
        };

        data.truncate(self.left.min(usize::MAX as u64) as usize);
        self.left -= data.len() as u64;
        if self.left == 0 {
            self.eof = true;
        } else if self.eof {
            return Err(ZipError::format(format!(
                "Compressed data for {:?} ended early, {} bytes missing",
                self.name, self.left
            )));
        }

        self.update_crc(&data)?;
        Ok(data)
    }

    /// Read raw member bytes, decrypting them when a password is set.
    fn read_compressed(&mut self, n: usize) -> Result<Vec<u8>> {
        if self.compress_left == 0 {
            return Ok(Vec::new());
        }
        let n = (n.max(MIN_READ_SIZE) as u64).min(self.compress_left) as usize;
        let mut data = self.file.read_up_to(n)?;
        self.compress_left -= data.len() as u64;
        if data.len() < n {
            return Err(ZipError::format(format!(
                "truncated entry data for {:?}",
                self.name
            )));
        }
        if let Some(decrypter) = self.decrypter.as_mut() {
            decrypter.decrypt_in_place(&mut data);
        }
        Ok(data)
    }

    fn update_crc(&mut self, data: &[u8]) -> Result<()> {
        let Some(expected) = self.expected_crc else {
            return Ok(());
        };
        self.running_crc = crc32_update(self.running_crc, data);
        if self.eof && self.running_crc != expected {
            return Err(ZipError::BadCrc {
                name: self.name.clone(),
                expected,
                computed: self.running_crc,
            });
        }
        Ok(())
    }
}

impl<R: Source> fmt::Debug for ZipEntryReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ZipEntryReader")?;
        if self.closed {
            write!(f, " [closed]")?;
        } else {
            write!(f, " name={:?}", self.name)?;
            match self.method {
                CompressionMethod::Stored => {}
                CompressionMethod::Unknown(code) => write!(f, " compress_type={code}")?,
                known => write!(f, " compress_type={}", known.name())?,
            }
        }
        write!(f, ">")
    }
}

impl<R: Source> Read for ZipEntryReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.read1(buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl<R: Source> BufRead for ZipEntryReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.check_open()?;
        while self.offset >= self.buffer.len() && !self.eof {
            self.buffer = self.read_block(MIN_READ_SIZE)?;
            self.offset = 0;
        }
        Ok(&self.buffer[self.offset.min(self.buffer.len())..])
    }

    fn consume(&mut self, amt: usize) {
        self.offset = (self.offset + amt).min(self.buffer.len());
    }
}

impl<R: Source> Seek for ZipEntryReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_to(pos)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SharedSource;
    use crate::zip::util::crc32;
    use std::io::{Cursor, Write};

    fn stored_info(data: &[u8]) -> ZipInfo {
        ZipInfo {
            filename: "weights.bin".into(),
            orig_filename: "weights.bin".into(),
            compress_size: data.len() as u64,
            file_size: data.len() as u64,
            crc: crc32(data),
            ..Default::default()
        }
    }

    fn open<S: Source>(source: S, info: &ZipInfo) -> ZipEntryReader<S> {
        let shared = SharedSource::new(source, false);
        let file = SharedFile::open(&shared, 0).unwrap();
        ZipEntryReader::new(file, info, None).unwrap()
    }

    fn payload() -> Vec<u8> {
        (0..20_000u32).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn reads_stored_data_in_pieces() {
        let data = payload();
        let mut reader = open(Cursor::new(data.clone()), &stored_info(&data));
        let mut out = reader.read_up_to(10).unwrap();
        out.extend(reader.read1(100).unwrap());
        out.extend(reader.read_all().unwrap());
        assert_eq!(out, data);
        assert!(reader.is_eof());
        assert!(reader.read_up_to(10).unwrap().is_empty());
    }

    #[test]
    fn detects_bad_crc_at_end() {
        let data = b"tensor bytes".to_vec();
        let mut info = stored_info(&data);
        info.crc ^= 1;
        let mut reader = open(Cursor::new(data), &info);
        let err = reader.read_all().unwrap_err();
        assert!(matches!(err, ZipError::BadCrc { ref name, .. } if name == "weights.bin"));
    }

    #[test]
    fn truncated_source_is_format_error() {
        let data = payload();
        let info = stored_info(&data);
        let mut reader = open(Cursor::new(data[..5000].to_vec()), &info);
        let err = reader.read_all().unwrap_err();
        assert!(err.to_string().contains("truncated entry data"));
    }

    #[test]
    fn lzma_header_cut_short_ends_early() {
        let info = ZipInfo {
            filename: "weights.bin".into(),
            orig_filename: "weights.bin".into(),
            compress_type: 14,
            compress_size: 3,
            file_size: 100,
            ..Default::default()
        };
        let mut reader = open(Cursor::new(vec![9, 20, 5]), &info);
        let err = reader.read_all().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
        assert!(err.to_string().contains("ended early, 100 bytes missing"));
    }

    #[test]
    fn declared_size_caps_output() {
        let data = b"0123456789".to_vec();
        let mut info = stored_info(&data[..4]);
        info.compress_size = 10;
        let mut reader = open(Cursor::new(data), &info);
        assert_eq!(reader.read_all().unwrap(), b"0123");
    }

    #[test]
    fn peek_does_not_advance() {
        let data = payload();
        let mut reader = open(Cursor::new(data.clone()), &stored_info(&data));
        reader.read_up_to(3).unwrap();
        assert_eq!(reader.peek(5).unwrap()[..5], data[3..8]);
        assert!(reader.peek(10_000).unwrap().len() <= 512);
        assert_eq!(reader.tell().unwrap(), 3);
        assert_eq!(reader.read_up_to(5).unwrap(), &data[3..8]);
    }

    #[test]
    fn seeks_match_sequential_reads() {
        let data = payload();
        let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&data).unwrap();
        let compressed = enc.finish().unwrap();
        let info = ZipInfo {
            compress_type: 8,
            compress_size: compressed.len() as u64,
            ..stored_info(&data)
        };
        let mut reader = open(Cursor::new(compressed), &info);

        for (target, len) in [(15_000u64, 100usize), (2, 50), (19_990, 50), (0, 1), (7777, 4096)] {
            assert_eq!(reader.seek_to(SeekFrom::Start(target)).unwrap(), target);
            let got = reader.read_up_to(len).unwrap();
            let end = (target as usize + len).min(data.len());
            assert_eq!(got, &data[target as usize..end], "seek to {target}");
        }
        assert_eq!(reader.seek_to(SeekFrom::End(10)).unwrap(), data.len() as u64);
        assert_eq!(reader.seek_to(SeekFrom::Current(-30_000)).unwrap(), 0);
    }

    #[test]
    fn stored_fast_seek_disables_crc() {
        let data = payload();
        let mut info = stored_info(&data);
        info.crc ^= 0xFFFF;
        let mut reader = open(Cursor::new(data.clone()), &info);
        reader.seek_to(SeekFrom::Start(12_000)).unwrap();
        assert_eq!(reader.read_all().unwrap(), &data[12_000..]);

        // Rewinding restores verification.
        reader.seek_to(SeekFrom::Start(0)).unwrap();
        assert!(matches!(reader.read_all(), Err(ZipError::BadCrc { .. })));
    }

    #[test]
    fn sequential_source_refuses_seek() {
        let data = payload();
        let mut reader = open(crate::io::Sequential(Cursor::new(data.clone())), &stored_info(&data));
        assert!(!reader.is_seekable().unwrap());
        assert!(matches!(reader.tell(), Err(ZipError::NotSeekable)));
        assert!(matches!(reader.seek_to(SeekFrom::Start(1)), Err(ZipError::NotSeekable)));
        assert_eq!(reader.read_all().unwrap(), data);
    }

    #[test]
    fn closed_reader_fails() {
        let data = payload();
        let mut reader = open(Cursor::new(data.clone()), &stored_info(&data));
        reader.close();
        reader.close();
        assert!(matches!(reader.read_up_to(1), Err(ZipError::EntryClosed)));
        assert!(matches!(reader.is_seekable(), Err(ZipError::EntryClosed)));
        assert_eq!(format!("{reader:?}"), "<ZipEntryReader [closed]>");
    }

    #[test]
    fn std_io_traits() {
        let data = b"line one\nline two\n".to_vec();
        let mut reader = open(Cursor::new(data.clone()), &stored_info(&data));
        let mut first = String::new();
        reader.read_line(&mut first).unwrap();
        assert_eq!(first, "line one\n");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"line two\n");
        assert_eq!(Seek::seek(&mut reader, SeekFrom::Start(5)).unwrap(), 5);
    }
}
