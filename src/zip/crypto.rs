//! Traditional PKWARE ("ZipCrypto") decryption.
//!
//! The cipher is weak and only supported so that password-protected
//! archives can still be inspected. Three 32-bit keys are seeded from the
//! password and advanced with every plaintext byte.

/// CRC-32 lookup table (polynomial 0xEDB88320, reflected).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

const INITIAL_KEY0: u32 = 0x12345678;
const INITIAL_KEY1: u32 = 0x23456789;
const INITIAL_KEY2: u32 = 0x34567890;

/// Size of the encryption header that precedes the ciphertext.
pub const ENCRYPTION_HEADER_SIZE: usize = 12;

#[inline]
fn crc32_step(ch: u8, crc: u32) -> u32 {
    (crc >> 8) ^ CRC32_TABLE[((crc ^ ch as u32) & 0xFF) as usize]
}

/// Decrypting key state for one entry.
#[derive(Debug, Clone)]
pub struct ZipDecrypter {
    key0: u32,
    key1: u32,
    key2: u32,
}

impl ZipDecrypter {
    /// Seed the keys from `password`.
    pub fn new(password: &[u8]) -> Self {
        let mut decrypter = Self {
            key0: INITIAL_KEY0,
            key1: INITIAL_KEY1,
            key2: INITIAL_KEY2,
        };
        for &byte in password {
            decrypter.update_keys(byte);
        }
        decrypter
    }

    #[inline]
    fn update_keys(&mut self, byte: u8) {
        self.key0 = crc32_step(byte, self.key0);
        self.key1 = self
            .key1
            .wrapping_add(self.key0 & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.key2 = crc32_step((self.key1 >> 24) as u8, self.key2);
    }

    #[inline]
    fn keystream_byte(&self) -> u8 {
        let t = self.key2 | 2;
        (t.wrapping_mul(t ^ 1) >> 8) as u8
    }

    /// Decrypt one byte and advance the keys with the recovered plaintext.
    #[inline]
    pub fn decrypt_byte(&mut self, byte: u8) -> u8 {
        let plain = byte ^ self.keystream_byte();
        self.update_keys(plain);
        plain
    }

    /// Decrypt `data` in place.
    pub fn decrypt_in_place(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte = self.decrypt_byte(*byte);
        }
    }

    /// Decrypt the 12-byte encryption header and return its check byte.
    pub fn decrypt_header(&mut self, header: &[u8; ENCRYPTION_HEADER_SIZE]) -> u8 {
        let mut plain = *header;
        self.decrypt_in_place(&mut plain);
        plain[ENCRYPTION_HEADER_SIZE - 1]
    }

    #[cfg(test)]
    fn encrypt_byte(&mut self, byte: u8) -> u8 {
        let cipher = byte ^ self.keystream_byte();
        self.update_keys(byte);
        cipher
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_polynomial() {
        assert_eq!(CRC32_TABLE[0], 0);
        assert_eq!(CRC32_TABLE[1], 0x77073096);
        assert_eq!(CRC32_TABLE[255], 0x2D02EF8D);
    }

    #[test]
    fn crc_step_agrees_with_crc32fast() {
        let mut crc = 0xFFFF_FFFFu32;
        for &b in b"123456789" {
            crc = crc32_step(b, crc);
        }
        assert_eq!(!crc, crc32fast::hash(b"123456789"));
    }

    #[test]
    fn empty_password_keeps_initial_keys() {
        let d = ZipDecrypter::new(b"");
        assert_eq!((d.key0, d.key1, d.key2), (INITIAL_KEY0, INITIAL_KEY1, INITIAL_KEY2));
    }

    #[test]
    fn password_changes_keys() {
        let a = ZipDecrypter::new(b"secret");
        let b = ZipDecrypter::new(b"secret");
        let c = ZipDecrypter::new(b"Secret");
        assert_eq!((a.key0, a.key1, a.key2), (b.key0, b.key1, b.key2));
        assert_ne!((a.key0, a.key1, a.key2), (c.key0, c.key1, c.key2));
    }

    #[test]
    fn header_check_byte_round_trips() {
        let crc: u32 = 0xA1B2_C3D4;
        let mut header = [0x5Au8; ENCRYPTION_HEADER_SIZE];
        header[11] = (crc >> 24) as u8;

        let mut enc = ZipDecrypter::new(b"pw");
        let mut cipher = header;
        for b in cipher.iter_mut() {
            *b = enc.encrypt_byte(*b);
        }

        let mut dec = ZipDecrypter::new(b"pw");
        assert_eq!(dec.decrypt_header(&cipher), 0xA1);

        let mut wrong = ZipDecrypter::new(b"wrong");
        let mut plain = cipher;
        wrong.decrypt_in_place(&mut plain);
        assert_ne!(&plain[..], &header[..]);
    }

    #[test]
    fn body_decrypts_after_header() {
        let body = b"hello, encrypted world";
        let mut enc = ZipDecrypter::new(b"pw");
        let mut stream: Vec<u8> = [0u8; 12]
            .iter()
            .chain(body.iter())
            .map(|&b| enc.encrypt_byte(b))
            .collect();

        let mut dec = ZipDecrypter::new(b"pw");
        let (head, rest) = stream.split_at_mut(ENCRYPTION_HEADER_SIZE);
        let head: [u8; ENCRYPTION_HEADER_SIZE] = head.try_into().unwrap();
        dec.decrypt_header(&head);
        dec.decrypt_in_place(rest);
        assert_eq!(rest, body);
    }
}
