//! Per-member metadata decoded from the central directory.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;
use tracing::warn;

use super::structures::{CompressionMethod, EXTRA_UNICODE_PATH, EXTRA_ZIP64, ZIP64_SENTINEL};
use super::util::{dos_datetime, sanitize_filename};
use crate::error::{Result, ZipError};

/// Modification timestamp of a member, DOS resolution (2 seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    /// Decode the packed DOS date and time words.
    pub fn from_dos(date: u16, time: u16) -> Self {
        let (year, month, day, hour, minute, second) = dos_datetime(date, time);
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }
}

impl Default for DateTime {
    fn default() -> Self {
        Self {
            year: 1980,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Metadata for one archive member.
///
/// Built once while the central directory is parsed and never changed
/// afterwards. Sizes and the header offset are already widened from the
/// ZIP64 extra field and shifted by any data prepended to the archive.
#[derive(Debug, Clone, Default)]
pub struct ZipInfo {
    /// Name exactly as decoded from the central directory.
    pub orig_filename: String,
    /// Normalized name: cut at NUL, forward slashes, Unicode path applied.
    pub filename: String,
    pub date_time: DateTime,
    /// Raw DOS time word, needed for the encryption check byte.
    pub raw_time: u16,
    pub compress_type: u16,
    pub compress_size: u64,
    pub file_size: u64,
    pub crc: u32,
    pub flag_bits: u16,
    pub header_offset: u64,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
    pub create_version: u8,
    pub create_system: u8,
    pub extract_version: u8,
    pub reserved: u8,
    pub volume: u16,
    pub internal_attr: u16,
    pub external_attr: u32,
    /// Offset of the next local header, or of the central directory for
    /// the last member. Data of this member must end before it.
    pub end_offset: Option<u64>,
}

impl ZipInfo {
    /// Compression method of this member.
    pub fn method(&self) -> CompressionMethod {
        CompressionMethod::from_u16(self.compress_type)
    }

    /// True when the member is a directory.
    pub fn is_dir(&self) -> bool {
        self.filename.ends_with('/')
    }

    /// True when the member is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.flag_bits & super::structures::FLAG_ENCRYPTED != 0
    }

    /// Unix permission bits, if the creator stored any.
    pub fn unix_mode(&self) -> Option<u32> {
        match self.external_attr >> 16 {
            0 => None,
            mode => Some(mode),
        }
    }

    /// Apply the ZIP64 and Unicode path extra fields.
    ///
    /// `filename_crc` is the CRC-32 of the raw stored filename bytes; a
    /// Unicode path field only applies when it was computed over the same
    /// name.
    pub(crate) fn decode_extra(&mut self, filename_crc: u32) -> Result<()> {
        let extra = std::mem::take(&mut self.extra);
        let result = self.apply_extra(&extra, filename_crc);
        self.extra = extra;
        result
    }

    fn apply_extra(&mut self, mut extra: &[u8], filename_crc: u32) -> Result<()> {
        while extra.len() >= 4 {
            let tag = u16::from_le_bytes([extra[0], extra[1]]);
            let len = u16::from_le_bytes([extra[2], extra[3]]) as usize;
            if len + 4 > extra.len() {
                return Err(ZipError::format(format!(
                    "Corrupt extra field {tag:04x} (size={len})"
                )));
            }
            let payload = &extra[4..4 + len];

            match tag {
                EXTRA_ZIP64 => self.apply_zip64(payload)?,
                EXTRA_UNICODE_PATH => self.apply_unicode_path(payload, filename_crc)?,
                _ => {}
            }
            extra = &extra[4 + len..];
        }
        Ok(())
    }

    fn apply_zip64(&mut self, payload: &[u8]) -> Result<()> {
        let mut cursor = Cursor::new(payload);
        let missing =
            |field: &str| ZipError::format(format!("Corrupt zip64 extra field. {field} not found."));

        if self.file_size == ZIP64_SENTINEL || self.file_size == u64::MAX {
            self.file_size = cursor
                .read_u64::<LittleEndian>()
                .map_err(|_| missing("File size"))?;
        }
        if self.compress_size == ZIP64_SENTINEL {
            self.compress_size = cursor
                .read_u64::<LittleEndian>()
                .map_err(|_| missing("Compress size"))?;
        }
        if self.header_offset == ZIP64_SENTINEL {
            self.header_offset = cursor
                .read_u64::<LittleEndian>()
                .map_err(|_| missing("Header offset"))?;
        }
        Ok(())
    }

    fn apply_unicode_path(&mut self, payload: &[u8], filename_crc: u32) -> Result<()> {
        if payload.len() < 5 {
            return Err(ZipError::format("Corrupt unicode path extra field (0x7075)"));
        }
        let version = payload[0];
        let name_crc = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
        if version != 1 || name_crc != filename_crc {
            return Ok(());
        }

        let name = std::str::from_utf8(&payload[5..]).map_err(|_| {
            ZipError::format("Corrupt unicode path extra field (0x7075): invalid utf-8 bytes")
        })?;
        if name.is_empty() {
            warn!(filename = %self.filename, "Empty unicode path extra field (0x7075)");
        } else {
            self.filename = sanitize_filename(name);
        }
        Ok(())
    }
}

/// Render `ls -l` style permission bits.
fn filemode(mode: u32) -> String {
    let kind = match mode & 0o170000 {
        0o040000 => 'd',
        0o120000 => 'l',
        0o010000 => 'p',
        0o020000 => 'c',
        0o060000 => 'b',
        0o140000 => 's',
        _ => '-',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

impl fmt::Display for ZipInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ZipInfo filename={:?}", self.filename)?;
        let method = self.method();
        if method != CompressionMethod::Stored {
            match method {
                CompressionMethod::Unknown(code) => write!(f, " compress_type={code}")?,
                known => write!(f, " compress_type={}", known.name())?,
            }
        }
        if let Some(mode) = self.unix_mode() {
            write!(f, " filemode={:?}", filemode(mode))?;
        }
        let lo = self.external_attr & 0xFFFF;
        if lo != 0 {
            write!(f, " external_attr={lo:#x}")?;
        }
        let is_dir = self.is_dir();
        if !is_dir || self.file_size != 0 {
            write!(f, " file_size={}", self.file_size)?;
        }
        if (!is_dir || self.compress_size != 0)
            && (method != CompressionMethod::Stored || self.file_size != self.compress_size)
        {
            write!(f, " compress_size={}", self.compress_size)?;
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::util::crc32;

    fn field(tag: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = tag.to_le_bytes().to_vec();
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn zip64_fields_are_read_in_order() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&5_000_000_000u64.to_le_bytes());
        payload.extend_from_slice(&6_000_000_000u64.to_le_bytes());

        let mut info = ZipInfo {
            filename: "big.bin".into(),
            file_size: ZIP64_SENTINEL,
            compress_size: 10,
            header_offset: ZIP64_SENTINEL,
            extra: field(EXTRA_ZIP64, &payload),
            ..Default::default()
        };
        info.decode_extra(0).unwrap();
        // Compressed size was not a sentinel, so the second value is the offset.
        assert_eq!(info.file_size, 5_000_000_000);
        assert_eq!(info.compress_size, 10);
        assert_eq!(info.header_offset, 6_000_000_000);
    }

    #[test]
    fn zip64_missing_value_names_the_field() {
        let mut info = ZipInfo {
            compress_size: ZIP64_SENTINEL,
            extra: field(EXTRA_ZIP64, &[1, 2, 3]),
            ..Default::default()
        };
        let err = info.decode_extra(0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Corrupt zip64 extra field. Compress size not found."
        );
    }

    #[test]
    fn overlong_extra_field_is_corrupt() {
        let mut extra = field(0xCAFE, &[0; 4]);
        extra[2] = 40;
        let mut info = ZipInfo {
            extra,
            ..Default::default()
        };
        let err = info.decode_extra(0).unwrap_err();
        assert_eq!(err.to_string(), "Corrupt extra field cafe (size=40)");
    }

    #[test]
    fn unicode_path_requires_matching_crc() {
        let raw = b"caf\x82.txt";
        let mut payload = vec![1];
        payload.extend_from_slice(&crc32(raw).to_le_bytes());
        payload.extend_from_slice("café.txt".as_bytes());

        let mut info = ZipInfo {
            filename: "cafΘ.txt".into(),
            extra: field(EXTRA_UNICODE_PATH, &payload),
            ..Default::default()
        };
        info.decode_extra(crc32(b"something else")).unwrap();
        assert_eq!(info.filename, "cafΘ.txt");

        info.decode_extra(crc32(raw)).unwrap();
        assert_eq!(info.filename, "café.txt");
    }

    #[test]
    fn unicode_path_rejects_bad_utf8() {
        let mut payload = vec![1];
        payload.extend_from_slice(&7u32.to_le_bytes());
        payload.extend_from_slice(&[0xFF, 0xFE]);
        let mut info = ZipInfo {
            extra: field(EXTRA_UNICODE_PATH, &payload),
            ..Default::default()
        };
        let err = info.decode_extra(7).unwrap_err();
        assert!(err.to_string().contains("invalid utf-8"));
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let mut extra = field(0x5455, &[1, 2, 3, 4, 5]);
        extra.extend(field(0x000A, &[0; 32]));
        let mut info = ZipInfo {
            filename: "a".into(),
            extra: extra.clone(),
            ..Default::default()
        };
        info.decode_extra(0).unwrap();
        assert_eq!(info.filename, "a");
        assert_eq!(info.extra, extra);
    }

    #[test]
    fn display_mentions_sizes_and_mode() {
        let info = ZipInfo {
            filename: "model/data.pkl".into(),
            compress_type: 8,
            file_size: 100,
            compress_size: 40,
            external_attr: 0o100644 << 16,
            ..Default::default()
        };
        assert_eq!(
            info.to_string(),
            "<ZipInfo filename=\"model/data.pkl\" compress_type=deflate filemode=\"-rw-r--r--\" file_size=100 compress_size=40>"
        );

        let dir = ZipInfo {
            filename: "model/".into(),
            ..Default::default()
        };
        assert!(dir.is_dir());
        assert_eq!(dir.to_string(), "<ZipInfo filename=\"model/\">");
    }

    #[test]
    fn timestamp_display() {
        let date = ((2023 - 1980) << 9) | (12 << 5) | 31;
        let time = (23 << 11) | (59 << 5) | 29;
        assert_eq!(DateTime::from_dos(date, time).to_string(), "2023-12-31 23:59:58");
    }
}
