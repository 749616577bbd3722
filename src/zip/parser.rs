//! Central directory resolver.
//!
//! ZIP archives are read from the end:
//! 1. Find the End of Central Directory (EOCD) record at the file's end
//! 2. If a ZIP64 locator precedes it, take sizes and offsets from the ZIP64 EOCD
//! 3. Work out how many bytes were prepended to the archive (self-extracting
//!    stubs, concatenated payloads) and shift every offset by that amount
//! 4. Walk the central directory and build one [`ZipInfo`] per record
//!
//! Nothing here trusts the declared values: every record is length checked
//! before it is decoded.

use encoding_rs::Encoding;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

use super::cp437;
use super::info::{DateTime, ZipInfo};
use super::structures::*;
use super::util::crc32;
use crate::error::{Result, ZipError};

/// Location and contents of the end of central directory record.
#[derive(Debug, Clone)]
pub struct EndRecord {
    /// File offset of the EOCD signature.
    pub offset: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
    /// Archive comment, possibly shorter than declared if the file ends early.
    pub comment: Vec<u8>,
    /// True when the ZIP64 EOCD supplied the values above.
    pub zip64: bool,
}

/// Result of parsing the central directory.
#[derive(Debug, Clone)]
pub struct Directory {
    /// Members in central directory order.
    pub entries: Vec<ZipInfo>,
    pub comment: Vec<u8>,
    /// Absolute offset of the central directory.
    pub start_dir: u64,
    /// Bytes of unrelated data in front of the archive.
    pub concat: u64,
}

/// Decode a stored member name.
///
/// Names flagged as UTF-8 must be valid UTF-8. Everything else uses the
/// configured legacy encoding, or CP437 when none is configured.
pub fn decode_name(raw: &[u8], flags: u16, encoding: Option<&'static Encoding>) -> Result<String> {
    if flags & FLAG_UTF8_FILENAME != 0 {
        return String::from_utf8(raw.to_vec())
            .map_err(|_| ZipError::format(format!("Invalid UTF-8 file name {raw:?}")));
    }
    Ok(match encoding {
        Some(encoding) => encoding.decode_without_bom_handling(raw).0.into_owned(),
        None => cp437::decode(raw),
    })
}

/// Central directory reader over a seekable source.
pub struct ZipParser<'a, R> {
    reader: &'a mut R,
    size: u64,
    encoding: Option<&'static Encoding>,
}

impl<'a, R: Read + Seek> ZipParser<'a, R> {
    /// Create a parser; the source size is taken by seeking to its end.
    pub fn new(reader: &'a mut R) -> Result<Self> {
        let size = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            size,
            encoding: None,
        })
    }

    /// Legacy encoding for names without the UTF-8 flag.
    pub fn with_encoding(mut self, encoding: Option<&'static Encoding>) -> Self {
        self.encoding = encoding;
        self
    }

    /// Size of the source in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read up to `len` bytes at `offset`. Shorter only at end of file.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(len);
        (&mut *self.reader).take(len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Locate the EOCD record, then fold in the ZIP64 EOCD if present.
    pub fn find_eocd(&mut self) -> Result<EndRecord> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(ZipError::NotAZip);
        }

        // Fast path: no archive comment, the record is the last 22 bytes.
        let offset = self.size - eocd_size;
        let buf = self.read_at(offset, EndOfCentralDirectory::SIZE)?;
        if buf.len() == EndOfCentralDirectory::SIZE
            && &buf[0..4] == EndOfCentralDirectory::SIGNATURE
            && buf[20..22] == [0, 0]
        {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            debug!(offset, "found end of central directory at end of file");
            return self.with_zip64(eocd, offset, Vec::new());
        }

        // The archive carries a comment of up to 64 KiB after the record.
        let search_start = self.size.saturating_sub(MAX_COMMENT_SIZE + 1 + eocd_size);
        let data = self.read_at(search_start, (self.size - search_start) as usize)?;
        let Some(start) = data
            .windows(4)
            .rposition(|w| w == EndOfCentralDirectory::SIGNATURE)
        else {
            return Err(ZipError::NotAZip);
        };
        let Some(record) = data.get(start..start + EndOfCentralDirectory::SIZE) else {
            // The record itself is cut off by the end of the file.
            return Err(ZipError::NotAZip);
        };
        let eocd = EndOfCentralDirectory::from_bytes(record)?;
        let comment_start = start + EndOfCentralDirectory::SIZE;
        let comment_end = (comment_start + eocd.comment_len as usize).min(data.len());
        let comment = data[comment_start..comment_end].to_vec();

        let offset = search_start + start as u64;
        debug!(offset, comment_len = comment.len(), "found end of central directory by scanning");
        self.with_zip64(eocd, offset, comment)
    }

    /// Read the ZIP64 locator and record that sit immediately before the EOCD.
    fn with_zip64(
        &mut self,
        eocd: EndOfCentralDirectory,
        offset: u64,
        comment: Vec<u8>,
    ) -> Result<EndRecord> {
        let mut record = EndRecord {
            offset,
            total_entries: eocd.total_entries as u64,
            cd_size: eocd.cd_size as u64,
            cd_offset: eocd.cd_offset as u64,
            comment,
            zip64: false,
        };

        let Some(locator_offset) = offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
            return Ok(record);
        };
        let buf = self.read_at(locator_offset, Zip64EOCDLocator::SIZE)?;
        let Some(locator) = Zip64EOCDLocator::from_bytes(&buf)? else {
            return Ok(record);
        };
        if locator.disk_with_eocd64 != 0 || locator.total_disks > 1 {
            return Err(ZipError::format(
                "zipfiles that span multiple disks are not supported",
            ));
        }

        // The locator's own offset field is ignored; the record is assumed
        // to sit right in front of it without extensible data.
        let Some(eocd64_offset) = locator_offset.checked_sub(Zip64EOCD::MIN_SIZE as u64) else {
            return Ok(record);
        };
        let buf = self.read_at(eocd64_offset, Zip64EOCD::MIN_SIZE)?;
        let Some(eocd64) = Zip64EOCD::from_bytes(&buf)? else {
            return Ok(record);
        };

        debug!(
            entries = eocd64.total_entries,
            cd_size = eocd64.cd_size,
            cd_offset = eocd64.cd_offset,
            "using zip64 end of central directory"
        );
        record.total_entries = eocd64.total_entries;
        record.cd_size = eocd64.cd_size;
        record.cd_offset = eocd64.cd_offset;
        record.zip64 = true;
        Ok(record)
    }

    /// Parse the whole central directory.
    pub fn read_directory(&mut self) -> Result<Directory> {
        let end = self.find_eocd()?;

        // Non-zero when the archive was appended to other data.
        let mut concat = end.offset as i128 - end.cd_size as i128 - end.cd_offset as i128;
        if end.zip64 {
            concat -= (Zip64EOCD::MIN_SIZE + Zip64EOCDLocator::SIZE) as i128;
        }
        let start_dir = end.cd_offset as i128 + concat;
        if start_dir < 0 || concat < 0 {
            return Err(ZipError::format("Bad offset for central directory"));
        }
        let start_dir = start_dir as u64;
        let concat = concat as u64;
        debug!(start_dir, concat, "central directory located");

        let cd_len = usize::try_from(end.cd_size)
            .map_err(|_| ZipError::format("Bad size for central directory"))?;
        let data = self.read_at(start_dir, cd_len.min((self.size - start_dir.min(self.size)) as usize))?;
        let mut entries = self.walk_central_directory(&data, end.cd_size, concat, start_dir)?;
        assign_end_offsets(&mut entries, start_dir);

        debug!(entries = entries.len(), declared = end.total_entries, "parsed central directory");
        Ok(Directory {
            entries,
            comment: end.comment,
            start_dir,
            concat,
        })
    }

    fn walk_central_directory(
        &self,
        data: &[u8],
        cd_size: u64,
        concat: u64,
        start_dir: u64,
    ) -> Result<Vec<ZipInfo>> {
        let mut entries = Vec::new();
        let mut pos = 0usize;
        while (pos as u64) < cd_size {
            let rest = data.get(pos..).unwrap_or_default();
            let header = CentralDirectoryHeader::from_bytes(rest)?;

            let mut tail = &rest[CentralDirectoryHeader::SIZE..];
            let raw_name = take(&mut tail, header.file_name_length as usize)?;
            let extra = take(&mut tail, header.extra_field_length as usize)?;
            let comment = take(&mut tail, header.file_comment_length as usize)?;

            let orig_filename = decode_name(raw_name, header.flags, self.encoding)?;
            let mut info = ZipInfo {
                filename: super::util::sanitize_filename(&orig_filename),
                orig_filename,
                date_time: DateTime::from_dos(header.last_mod_date, header.last_mod_time),
                raw_time: header.last_mod_time,
                compress_type: header.compression_method,
                compress_size: header.compressed_size as u64,
                file_size: header.uncompressed_size as u64,
                crc: header.crc32,
                flag_bits: header.flags,
                header_offset: header.lfh_offset as u64,
                extra: extra.to_vec(),
                comment: comment.to_vec(),
                create_version: header.create_version,
                create_system: header.create_system,
                extract_version: header.extract_version,
                reserved: header.reserved,
                volume: header.disk_number_start,
                internal_attr: header.internal_attrs,
                external_attr: header.external_attrs,
                end_offset: None,
            };
            if info.extract_version > MAX_EXTRACT_VERSION {
                return Err(ZipError::unsupported(format!(
                    "zip file version {:.1}",
                    info.extract_version as f32 / 10.0
                )));
            }
            info.decode_extra(crc32(raw_name))?;
            // Every local header sits in front of the central directory.
            info.header_offset = info
                .header_offset
                .checked_add(concat)
                .filter(|offset| *offset < start_dir)
                .ok_or_else(|| ZipError::format("Bad offset for file header"))?;

            entries.push(info);
            pos += header.record_len() as usize;
        }
        Ok(entries)
    }
}

/// Split off exactly `len` bytes from the front of `data`.
fn take<'d>(data: &mut &'d [u8], len: usize) -> Result<&'d [u8]> {
    if len > data.len() {
        return Err(ZipError::format("Truncated central directory"));
    }
    let (head, rest) = data.split_at(len);
    *data = rest;
    Ok(head)
}

/// Give every entry the offset its data must end before.
///
/// Entries are visited by header offset, highest first; each one ends where
/// the next-higher entry starts, and the highest ends at the central
/// directory.
fn assign_end_offsets(entries: &mut [ZipInfo], start_dir: u64) {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| entries[b].header_offset.cmp(&entries[a].header_offset));

    let mut end_offset = start_dir;
    for index in order {
        entries[index].end_offset = Some(end_offset);
        end_offset = entries[index].header_offset;
    }
}
