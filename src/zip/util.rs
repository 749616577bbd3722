//! Small helpers shared by the parser and the entry reader.

/// CRC-32 (IEEE) of `data`, continuing from `crc`.
pub fn crc32_update(crc: u32, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(crc);
    hasher.update(data);
    hasher.finalize()
}

/// CRC-32 (IEEE) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Normalize a stored member name.
///
/// The name is cut at the first NUL byte (a trick used to hide the real
/// extension from tools that stop there) and backslashes become forward
/// slashes when the host uses them as a separator.
pub fn sanitize_filename(name: &str) -> String {
    let name = match name.find('\0') {
        Some(nul) => &name[..nul],
        None => name,
    };

    if std::path::MAIN_SEPARATOR != '/' {
        name.replace(std::path::MAIN_SEPARATOR, "/")
    } else {
        name.to_string()
    }
}

/// Decode a DOS date/time pair into `(year, month, day, hour, minute, second)`.
pub fn dos_datetime(date: u16, time: u16) -> (u16, u8, u8, u8, u8, u8) {
    (
        (date >> 9) + 1980,
        ((date >> 5) & 0x0F) as u8,
        (date & 0x1F) as u8,
        (time >> 11) as u8,
        ((time >> 5) & 0x3F) as u8,
        ((time & 0x1F) * 2) as u8,
    )
}
