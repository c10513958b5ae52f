//! Persistent store for save slots: named blobs, nothing more.
//!
//! The core derives slot names from the story's identity so one family of
//! saves exists per story; where the blobs live is the collaborator's
//! business.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::header::Header;

pub trait SaveStore {
    fn write(&mut self, name: &str, bytes: &[u8]) -> Result<()>;
    fn read(&self, name: &str) -> Result<Vec<u8>>;
    fn exists(&self, name: &str) -> bool;
}

/// Save-slot name derived from the story's serial and checksum, so saves
/// from different stories can never collide in one store.
pub fn slot_name(header: &Header) -> String {
    let serial: String = header
        .serial
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() {
                b as char
            } else {
                '-'
            }
        })
        .collect();
    format!("{serial}-{:04x}", header.checksum)
}

/// Directory-backed store: one `<name>.sav` file per slot.
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn new(dir: impl Into<PathBuf>) -> DirStore {
        DirStore { dir: dir.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.sav"))
    }
}

impl SaveStore for DirStore {
    fn write(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(name), bytes).map_err(Error::from)
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        fs::read(self.path(name)).map_err(Error::from)
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }
}

impl SaveStore for MemStore {
    fn write(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Io(format!("no save slot named {name}")))
    }

    fn exists(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_store_round_trip() {
        let mut store = MemStore::new();
        assert!(!store.exists("slot"));
        store.write("slot", &[1, 2, 3]).unwrap();
        assert!(store.exists("slot"));
        assert_eq!(store.read("slot").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_slot_name_is_stable_per_story() {
        let mut bytes = vec![0u8; 64];
        bytes[0] = 3;
        bytes[0x0F] = 0x40;
        bytes[0x12..0x18].copy_from_slice(b"880429");
        bytes[0x1C] = 0xA1;
        bytes[0x1D] = 0x29;
        let header = Header::parse(&bytes).unwrap();
        assert_eq!(slot_name(&header), "880429-a129");
    }
}
