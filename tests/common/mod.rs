//! Archive fixtures for the integration tests.
//!
//! Members are compressed with the reference encoders (flate2, bzip2, xz2)
//! and optionally encrypted with traditional PKWARE encryption, so the
//! reader is checked against independent implementations.

#![allow(dead_code)]

use std::io::Write;

use modelzip::zip::ZipDecrypter;

pub const STORED: u16 = 0;
pub const DEFLATED: u16 = 8;
pub const BZIP2: u16 = 12;
pub const LZMA: u16 = 14;

/// DOS time 12:34:56 and date 2023-06-15.
pub const DOS_TIME: u16 = (12 << 11) | (34 << 5) | (56 / 2);
pub const DOS_DATE: u16 = ((2023 - 1980) << 9) | (6 << 5) | 15;

#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub data: Vec<u8>,
    pub method: u16,
    pub password: Option<Vec<u8>>,
    /// Sets flag bit 3 and writes a data descriptor after the data.
    pub data_descriptor: bool,
    /// Name written to the local header, when it should differ.
    pub local_name: Option<String>,
    /// Compressed size written to the central directory, when it should lie.
    pub central_compress_size: Option<u32>,
    /// CRC written to both headers, when it should lie.
    pub crc_override: Option<u32>,
    pub extra: Vec<u8>,
    pub flags: u16,
}

impl Member {
    pub fn new(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            method: STORED,
            password: None,
            data_descriptor: false,
            local_name: None,
            central_compress_size: None,
            crc_override: None,
            extra: Vec::new(),
            flags: 0,
        }
    }

    pub fn method(mut self, method: u16) -> Self {
        self.method = method;
        self
    }

    pub fn password(mut self, password: &[u8]) -> Self {
        self.password = Some(password.to_vec());
        self
    }

    pub fn data_descriptor(mut self) -> Self {
        self.data_descriptor = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct ZipBuilder {
    members: Vec<Member>,
    comment: Vec<u8>,
    prefix: Vec<u8>,
    zip64: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.member(Member::new(name, data))
    }

    pub fn member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Data placed in front of the archive without adjusting its offsets.
    pub fn prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    /// Write ZIP64 end records and ZIP64 extra fields for every member.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for member in &self.members {
            let offset = out.len() as u64;
            let crc = member.crc_override.unwrap_or_else(|| crc32fast::hash(&member.data));
            let mut payload = compress(member.method, &member.data);
            let mut flags = member.flags;
            if member.data_descriptor {
                flags |= 1 << 3;
            }
            if let Some(password) = &member.password {
                flags |= 1;
                let check = if member.data_descriptor {
                    (DOS_TIME >> 8) as u8
                } else {
                    (crc >> 24) as u8
                };
                payload = encrypt(password, check, &payload);
            }

            let local_name = member.local_name.as_deref().unwrap_or(&member.name);
            out.extend_from_slice(b"PK\x03\x04");
            out.extend_from_slice(&fixed_fields(
                flags,
                member.method,
                crc,
                payload.len() as u32,
                member.data.len() as u32,
            ));
            put_u16(&mut out, local_name.len() as u16);
            put_u16(&mut out, member.extra.len() as u16);
            out.extend_from_slice(local_name.as_bytes());
            out.extend_from_slice(&member.extra);
            out.extend_from_slice(&payload);
            if member.data_descriptor {
                out.extend_from_slice(b"PK\x07\x08");
                put_u32(&mut out, crc);
                put_u32(&mut out, payload.len() as u32);
                put_u32(&mut out, member.data.len() as u32);
            }

            let mut extra = member.extra.clone();
            let (csize, usize_, header_offset) = if self.zip64 {
                put_u16(&mut extra, 0x0001);
                put_u16(&mut extra, 24);
                put_u64(&mut extra, member.data.len() as u64);
                put_u64(&mut extra, payload.len() as u64);
                put_u64(&mut extra, offset);
                (u32::MAX, u32::MAX, u32::MAX)
            } else {
                (
                    member.central_compress_size.unwrap_or(payload.len() as u32),
                    member.data.len() as u32,
                    offset as u32,
                )
            };

            central.extend_from_slice(b"PK\x01\x02");
            // made by: version 2.0, unix
            central.extend_from_slice(&[20, 3]);
            central.extend_from_slice(&fixed_fields(flags, member.method, crc, csize, usize_));
            put_u16(&mut central, member.name.len() as u16);
            put_u16(&mut central, extra.len() as u16);
            put_u16(&mut central, 0); // comment
            put_u16(&mut central, 0); // disk
            put_u16(&mut central, 0); // internal attributes
            let mode: u32 = if member.name.ends_with('/') { 0o40755 } else { 0o100644 };
            put_u32(&mut central, mode << 16);
            put_u32(&mut central, header_offset);
            central.extend_from_slice(member.name.as_bytes());
            central.extend_from_slice(&extra);
        }

        let cd_offset = out.len() as u64;
        let cd_size = central.len() as u64;
        out.extend_from_slice(&central);

        let count = self.members.len() as u64;
        if self.zip64 {
            let eocd64_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            put_u64(&mut out, 44);
            put_u16(&mut out, 45);
            put_u16(&mut out, 45);
            put_u32(&mut out, 0);
            put_u32(&mut out, 0);
            put_u64(&mut out, count);
            put_u64(&mut out, count);
            put_u64(&mut out, cd_size);
            put_u64(&mut out, cd_offset);

            out.extend_from_slice(b"PK\x06\x07");
            put_u32(&mut out, 0);
            put_u64(&mut out, eocd64_offset);
            put_u32(&mut out, 1);
        }

        out.extend_from_slice(b"PK\x05\x06");
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        if self.zip64 {
            put_u16(&mut out, u16::MAX);
            put_u16(&mut out, u16::MAX);
            put_u32(&mut out, u32::MAX);
            put_u32(&mut out, u32::MAX);
        } else {
            put_u16(&mut out, count as u16);
            put_u16(&mut out, count as u16);
            put_u32(&mut out, cd_size as u32);
            put_u32(&mut out, cd_offset as u32);
        }
        put_u16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);

        let mut archive = self.prefix.clone();
        archive.extend_from_slice(&out);
        archive
    }
}

/// Version needed, flags, method, time, date, CRC and both sizes.
fn fixed_fields(flags: u16, method: u16, crc: u32, csize: u32, usize_: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(24);
    put_u16(&mut buf, if method == LZMA { 63 } else { 20 });
    put_u16(&mut buf, flags);
    put_u16(&mut buf, method);
    put_u16(&mut buf, DOS_TIME);
    put_u16(&mut buf, DOS_DATE);
    put_u32(&mut buf, crc);
    put_u32(&mut buf, csize);
    put_u32(&mut buf, usize_);
    buf
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn compress(method: u16, data: &[u8]) -> Vec<u8> {
    match method {
        STORED => data.to_vec(),
        DEFLATED => {
            let mut enc =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        }
        BZIP2 => {
            let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        }
        LZMA => zip_lzma(data),
        // Unknown methods get the bytes as-is; the reader must refuse them.
        _ => data.to_vec(),
    }
}

/// LZMA1 stream behind the ZIP LZMA header (version 9.20, 5 property bytes).
///
/// The `.lzma` encoder writes properties, dictionary size and an 8-byte
/// length; ZIP keeps the first two and drops the length.
fn zip_lzma(data: &[u8]) -> Vec<u8> {
    use xz2::stream::{Action, LzmaOptions, Status, Stream};

    let mut options = LzmaOptions::new_preset(6).unwrap();
    options.dict_size(1 << 16);
    let mut stream = Stream::new_lzma_encoder(&options).unwrap();

    let mut alone = Vec::with_capacity(data.len() + 1024);
    loop {
        let consumed = stream.total_in() as usize;
        let status = stream
            .process_vec(&data[consumed..], &mut alone, Action::Finish)
            .unwrap();
        if status == Status::StreamEnd {
            break;
        }
        alone.reserve(4096);
    }

    let mut framed = vec![9, 20, 5, 0];
    framed.extend_from_slice(&alone[..5]);
    framed.extend_from_slice(&alone[13..]);
    framed
}

/// Traditional PKWARE encryption with a 12-byte header ending in `check`.
pub fn encrypt(password: &[u8], check: u8, data: &[u8]) -> Vec<u8> {
    let mut keys = Keys::new(password);
    let mut header = [0x5Au8; 12];
    header[11] = check;
    header
        .iter()
        .chain(data)
        .map(|&byte| keys.encrypt(byte))
        .collect()
}

struct Keys([u32; 3]);

impl Keys {
    fn new(password: &[u8]) -> Self {
        let mut keys = Keys([0x12345678, 0x23456789, 0x34567890]);
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    fn update(&mut self, byte: u8) {
        self.0[0] = crc_step(self.0[0], byte);
        self.0[1] = self.0[1]
            .wrapping_add(self.0[0] & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.0[2] = crc_step(self.0[2], (self.0[1] >> 24) as u8);
    }

    fn encrypt(&mut self, byte: u8) -> u8 {
        let t = self.0[2] | 2;
        let cipher = byte ^ (t.wrapping_mul(t ^ 1) >> 8) as u8;
        self.update(byte);
        cipher
    }
}

fn crc_step(crc: u32, byte: u8) -> u32 {
    let mut c = (crc ^ byte as u32) & 0xFF;
    for _ in 0..8 {
        c = if c & 1 != 0 { (c >> 1) ^ 0xEDB88320 } else { c >> 1 };
    }
    (crc >> 8) ^ c
}

/// A password whose check byte differs from `right` for the first member `name`.
pub fn wrong_password(bytes: &[u8], name: &str, right: &[u8]) -> Vec<u8> {
    let start = 30 + name.len();
    let header: [u8; 12] = bytes[start..start + 12].try_into().unwrap();
    let expected = ZipDecrypter::new(right).decrypt_header(&header);
    (0..)
        .map(|i| format!("wrong{i}").into_bytes())
        .find(|candidate| ZipDecrypter::new(candidate).decrypt_header(&header) != expected)
        .unwrap()
}

/// Deterministic, mildly compressible test payload.
pub fn payload(len: usize) -> Vec<u8> {
    let mut state = 0x2545_F491u32;
    (0..len)
        .map(|i| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            if i % 7 == 0 { (state & 0xFF) as u8 } else { b'a' + (i % 23) as u8 }
        })
        .collect()
}
