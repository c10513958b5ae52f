use log::warn;

use crate::error::{Error, Result};
use crate::header::Header;

/// A loaded story with owned memory.
///
/// The pristine load image is kept alongside the working memory: the save
/// codec diffs against it, `restart` reloads from it, and `verify` checksums
/// it (the working copy may legitimately have changed).
pub struct Game {
    pub memory: Vec<u8>,
    pub original: Vec<u8>,
    pub header: Header,
    checksum_warning: Option<Error>,
}

impl Game {
    /// Create a game from raw story bytes.
    ///
    /// Fails on a truncated file or an unsupported version. A checksum
    /// mismatch is deliberately not a failure: plenty of real story files
    /// circulate with stale header checksums. The warning is recorded for
    /// the caller to report through the output sink.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Game> {
        let header = Header::parse(&bytes)?;
        if header.static_base as usize > bytes.len() {
            return Err(Error::CorruptStory(format!(
                "static memory base {:#06x} beyond file end {:#06x}",
                header.static_base,
                bytes.len()
            )));
        }

        let computed = checksum(&bytes, header.file_len);
        let checksum_warning = if header.checksum != 0 && computed != header.checksum {
            warn!(
                "checksum mismatch: header says {:#06x}, file sums to {:#06x}",
                header.checksum, computed
            );
            Some(Error::ChecksumMismatch {
                stored: header.checksum,
                computed,
            })
        } else {
            None
        };

        Ok(Game {
            original: bytes.clone(),
            memory: bytes,
            header,
            checksum_warning,
        })
    }

    /// Load-time checksum warning, if any.
    pub fn checksum_warning(&self) -> Option<&Error> {
        self.checksum_warning.as_ref()
    }

    /// Recompute the file checksum from the pristine image, as the `verify`
    /// opcode requires (dynamic memory may have been written since load).
    pub fn verify(&self) -> bool {
        checksum(&self.original, self.header.file_len) == self.header.checksum
    }

    /// Read a byte from memory
    pub fn read_byte(&self, addr: u32) -> Result<u8> {
        self.memory
            .get(addr as usize)
            .copied()
            .ok_or(Error::OutOfBounds { addr })
    }

    /// Read a big-endian word from memory
    pub fn read_word(&self, addr: u32) -> Result<u16> {
        let high = self.read_byte(addr)? as u16;
        let low = self.read_byte(addr + 1)? as u16;
        Ok((high << 8) | low)
    }

    /// Write a byte to memory; only the dynamic region is writable
    pub fn write_byte(&mut self, addr: u32, value: u8) -> Result<()> {
        if addr >= self.header.static_base {
            return Err(Error::ProtectedMemory { addr });
        }
        match self.memory.get_mut(addr as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::OutOfBounds { addr }),
        }
    }

    /// Write a big-endian word to memory; only the dynamic region is writable
    pub fn write_word(&mut self, addr: u32, value: u16) -> Result<()> {
        self.write_byte(addr, (value >> 8) as u8)?;
        self.write_byte(addr + 1, (value & 0xFF) as u8)
    }

    /// Length of the dynamic (writable) region
    pub fn dynamic_len(&self) -> usize {
        self.header.static_base as usize
    }

    /// Unpack a packed routine address
    pub fn unpack_routine(&self, packed: u16) -> u32 {
        match self.header.version {
            1..=3 => packed as u32 * 2,
            _ => packed as u32 * 4,
        }
    }

    /// Unpack a packed string address
    pub fn unpack_string(&self, packed: u16) -> u32 {
        // Same scaling as routines for v1-5; they only diverge in v6-7
        self.unpack_routine(packed)
    }

    /// Reload dynamic memory from the pristine image for `restart`,
    /// preserving the transcription and fixed-pitch bits of Flags 2.
    pub fn reset_dynamic(&mut self) {
        let flags2 = ((self.memory[0x10] as u16) << 8 | self.memory[0x11] as u16) & 0x0003;
        let len = self.dynamic_len();
        self.memory[..len].copy_from_slice(&self.original[..len]);
        let preserved = ((self.memory[0x10] as u16) << 8 | self.memory[0x11] as u16) & !0x0003;
        let merged = preserved | flags2;
        self.memory[0x10] = (merged >> 8) as u8;
        self.memory[0x11] = (merged & 0xFF) as u8;
    }
}

/// Sum of all bytes from 0x40 to the end of file, mod 65536.
pub fn checksum(bytes: &[u8], file_len: usize) -> u16 {
    let end = file_len.min(bytes.len());
    if end <= 0x40 {
        return 0;
    }
    bytes[0x40..end]
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(b as u16))
}
