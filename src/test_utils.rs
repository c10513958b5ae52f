//! Synthetic story images for tests.
//!
//! Real story files are copyrighted, so tests assemble tiny images by hand:
//! a valid header, an empty abbreviation table, a small object table, a
//! globals block, a dictionary, and caller-supplied code at a fixed initial
//! program counter.

use crate::game::{checksum, Game};
use crate::text;

/// Fixed memory map of a built story. Dynamic memory runs to
/// [`StoryBuilder::STATIC_BASE`]; everything the builder places below that
/// is writable by the running story.
pub struct StoryBuilder {
    version: u8,
    dict_words: Vec<String>,
    objects: Vec<ObjectDef>,
    code: Vec<u8>,
    extra: Vec<(usize, Vec<u8>)>,
    time_game: bool,
}

struct ObjectDef {
    parent: u8,
    sibling: u8,
    child: u8,
    name: Option<String>,
    properties: Vec<(u8, Vec<u8>)>,
}

impl StoryBuilder {
    pub const ABBREV: usize = 0x40;
    pub const OBJECTS: usize = 0x100;
    pub const GLOBALS: usize = 0x280;
    /// Free dynamic region for text/parse buffers and table tests
    pub const SCRATCH: usize = 0x460;
    pub const DICTIONARY: usize = 0x500;
    pub const STATIC_BASE: usize = 0x600;
    pub const INITIAL_PC: usize = 0x700;
    pub const FILE_LEN: usize = 0x800;

    pub fn new(version: u8) -> StoryBuilder {
        StoryBuilder {
            version,
            dict_words: Vec::new(),
            objects: Vec::new(),
            code: Vec::new(),
            extra: Vec::new(),
            time_game: false,
        }
    }

    /// Words for the dictionary; sorted into encoded order automatically.
    pub fn dictionary(mut self, words: &[&str]) -> StoryBuilder {
        self.dict_words = words.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Instruction bytes placed at [`Self::INITIAL_PC`].
    pub fn code(mut self, bytes: &[u8]) -> StoryBuilder {
        self.code = bytes.to_vec();
        self
    }

    /// Raw bytes at an arbitrary address (routines, tables, strings).
    pub fn place(mut self, addr: usize, bytes: &[u8]) -> StoryBuilder {
        self.extra.push((addr, bytes.to_vec()));
        self
    }

    /// Add an object (1-based index order of calls). Links are v3 byte
    /// indices.
    pub fn object(
        mut self,
        parent: u8,
        sibling: u8,
        child: u8,
        name: Option<&str>,
    ) -> StoryBuilder {
        self.objects.push(ObjectDef {
            parent,
            sibling,
            child,
            name: name.map(|n| n.to_string()),
            properties: Vec::new(),
        });
        self
    }

    /// Attach a property to the most recently added object.
    pub fn property(mut self, prop: u8, data: &[u8]) -> StoryBuilder {
        let def = self
            .objects
            .last_mut()
            .expect("property() before any object()");
        def.properties.push((prop, data.to_vec()));
        self
    }

    /// Mark the story as a time game (status line shows hours:minutes).
    pub fn time_game(mut self) -> StoryBuilder {
        self.time_game = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut bytes = vec![0u8; Self::FILE_LEN];
        bytes[0] = self.version;
        if self.time_game {
            bytes[1] |= 0x02;
        }
        bytes[0x02] = 0;
        bytes[0x03] = 1; // release 1
        let word = |bytes: &mut [u8], at: usize, value: u16| {
            bytes[at] = (value >> 8) as u8;
            bytes[at + 1] = (value & 0xFF) as u8;
        };
        word(&mut bytes, 0x04, Self::STATIC_BASE as u16); // high memory base
        word(&mut bytes, 0x06, Self::INITIAL_PC as u16);
        word(&mut bytes, 0x08, Self::DICTIONARY as u16);
        word(&mut bytes, 0x0A, Self::OBJECTS as u16);
        word(&mut bytes, 0x0C, Self::GLOBALS as u16);
        word(&mut bytes, 0x0E, Self::STATIC_BASE as u16);
        bytes[0x12..0x18].copy_from_slice(b"250807");
        word(&mut bytes, 0x18, Self::ABBREV as u16);
        let len_unit = if self.version <= 3 { 2 } else { 4 };
        word(&mut bytes, 0x1A, (Self::FILE_LEN / len_unit) as u16);

        // Object table: property defaults, then 9-byte entries, then one
        // property table per object
        let tree = Self::OBJECTS + 31 * 2;
        let mut prop_table = tree + self.objects.len() * 9;
        for (i, def) in self.objects.iter().enumerate() {
            let entry = tree + i * 9;
            bytes[entry + 4] = def.parent;
            bytes[entry + 5] = def.sibling;
            bytes[entry + 6] = def.child;
            word(&mut bytes, entry + 7, prop_table as u16);

            match &def.name {
                Some(name) => {
                    let encoded = text::encode_word(name, self.version);
                    bytes[prop_table] = (encoded.len() / 2) as u8;
                    bytes[prop_table + 1..prop_table + 1 + encoded.len()]
                        .copy_from_slice(&encoded);
                    prop_table += 1 + encoded.len();
                }
                None => {
                    bytes[prop_table] = 0;
                    prop_table += 1;
                }
            }
            // v3 property blocks, descending property number
            let mut props = def.properties.clone();
            props.sort_by(|a, b| b.0.cmp(&a.0));
            for (num, data) in &props {
                assert!((1..=8).contains(&data.len()), "v3 property size 1-8");
                bytes[prop_table] = ((data.len() as u8 - 1) << 5) | (num & 0x1F);
                bytes[prop_table + 1..prop_table + 1 + data.len()].copy_from_slice(data);
                prop_table += 1 + data.len();
            }
            bytes[prop_table] = 0; // terminator
            prop_table += 1;
        }

        // Dictionary: no separators beyond comma, sorted encoded entries
        let mut keys: Vec<Vec<u8>> = self
            .dict_words
            .iter()
            .map(|w| text::encode_word(w, self.version))
            .collect();
        keys.sort();
        let key_len = text::key_bytes(self.version);
        let entry_len = key_len + 3;
        let mut at = Self::DICTIONARY;
        bytes[at] = 1;
        bytes[at + 1] = b',';
        bytes[at + 2] = entry_len as u8;
        word(&mut bytes, at + 3, keys.len() as u16);
        at += 5;
        for key in &keys {
            bytes[at..at + key_len].copy_from_slice(key);
            at += entry_len;
        }

        bytes[Self::INITIAL_PC..Self::INITIAL_PC + self.code.len()].copy_from_slice(&self.code);
        for (addr, data) in &self.extra {
            bytes[*addr..*addr + data.len()].copy_from_slice(data);
        }

        let sum = checksum(&bytes, Self::FILE_LEN);
        word(&mut bytes, 0x1C, sum);
        bytes
    }

    pub fn build_game(self) -> Game {
        Game::from_bytes(self.build()).expect("built story must load")
    }
}
