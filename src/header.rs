use std::fmt::Display;
use std::fmt::Formatter;

use crate::error::{Error, Result};

/// Fixed-layout story header, read once at load.
///
/// Addresses are cached as `u32` so callers never widen at the use site.
#[derive(Debug)]
pub struct Header {
    pub version: u8,
    pub flags1: u8,
    pub release: u16,
    pub serial: [u8; 6],
    /// Base of high memory (end of static memory)
    pub high_base: u32,
    /// Base of static memory (end of writable memory)
    pub static_base: u32,
    pub initial_pc: u32,
    pub dictionary: u32,
    pub object_table: u32,
    pub globals: u32,
    pub abbrev_table: u32,
    pub flags2: u16,
    /// File length in bytes, already scaled by the version's length unit
    pub file_len: usize,
    pub checksum: u16,
}

impl Header {
    /// Parse the 64-byte header, rejecting versions this interpreter
    /// cannot run before anything else looks at the image.
    pub fn parse(bytes: &[u8]) -> Result<Header> {
        if bytes.len() < 64 {
            return Err(Error::CorruptStory(format!(
                "story file is {} bytes, shorter than the 64-byte header",
                bytes.len()
            )));
        }

        let version = bytes[0];
        if !(1..=5).contains(&version) {
            return Err(Error::UnsupportedVersion(version));
        }

        let word = |offset: usize| ((bytes[offset] as u16) << 8) | bytes[offset + 1] as u16;

        // Stored length is in 2-byte units for v1-3 and 4-byte units for
        // v4-5. Very old files store 0 here; treat that as "whole file".
        let unit = if version <= 3 { 2 } else { 4 };
        let mut file_len = word(0x1A) as usize * unit;
        if file_len == 0 || file_len > bytes.len() {
            file_len = bytes.len();
        }

        let mut serial = [0u8; 6];
        serial.copy_from_slice(&bytes[0x12..0x18]);

        Ok(Header {
            version,
            flags1: bytes[0x01],
            release: word(0x02),
            serial,
            high_base: word(0x04) as u32,
            initial_pc: word(0x06) as u32,
            dictionary: word(0x08) as u32,
            object_table: word(0x0A) as u32,
            globals: word(0x0C) as u32,
            static_base: word(0x0E) as u32,
            abbrev_table: word(0x18) as u32,
            flags2: word(0x10),
            file_len,
            checksum: word(0x1C),
        })
    }

    /// Flags 1 bit 1 marks a v3 "time game" whose status line shows
    /// hours:minutes instead of score and turns.
    pub fn is_time_game(&self) -> bool {
        self.version == 3 && self.flags1 & 0x02 != 0
    }

    pub fn serial_string(&self) -> String {
        self.serial
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
            .collect()
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "
Z-code version:           {}
Release number:           {}
Serial number:            {}
Initial PC:               {:#06x}
Dictionary address:       {:#06x}
Object table address:     {:#06x}
Global variables address: {:#06x}
Base of static memory:    {:#06x}
Base of high memory:      {:#06x}
Abbreviations address:    {:#06x}
File length:              {:#06x}
Checksum:                 {:#06x}
",
            self.version,
            self.release,
            self.serial_string(),
            self.initial_pc,
            self.dictionary,
            self.object_table,
            self.globals,
            self.static_base,
            self.high_base,
            self.abbrev_table,
            self.file_len,
            self.checksum,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header(version: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; 128];
        bytes[0] = version;
        bytes[0x0F] = 0x40; // static memory right after the header
        bytes[0x12..0x18].copy_from_slice(b"250807");
        bytes
    }

    #[test]
    fn test_parse_v3() {
        let bytes = minimal_header(3);
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.version, 3);
        assert_eq!(header.static_base, 0x40);
        assert_eq!(header.serial_string(), "250807");
    }

    #[test]
    fn test_rejects_v6() {
        let bytes = minimal_header(6);
        assert_eq!(
            Header::parse(&bytes).unwrap_err(),
            Error::UnsupportedVersion(6)
        );
    }

    #[test]
    fn test_rejects_truncated_file() {
        let bytes = vec![3u8; 32];
        assert!(matches!(Header::parse(&bytes), Err(Error::CorruptStory(_))));
    }

    #[test]
    fn test_zero_length_field_means_whole_file() {
        let bytes = minimal_header(3);
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(header.file_len, bytes.len());
    }
}
