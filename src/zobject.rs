use log::debug;

use crate::error::{Error, Result};
use crate::game::Game;
use crate::header::Header;
use crate::text;

/// Version-dependent object table geometry.
///
/// v1-3: 255 objects, 9-byte entries, 32 attributes, 31 property defaults.
/// v4+: 65535 objects, 14-byte entries, 48 attributes, 63 defaults.
#[derive(Debug, Clone, Copy)]
struct Layout {
    entry_size: u32,
    attr_bytes: u32,
    max_objects: u16,
    max_properties: u8,
    parent_off: u32,
    sibling_off: u32,
    child_off: u32,
    prop_off: u32,
    wide: bool,
}

impl Layout {
    fn for_version(version: u8) -> Layout {
        if version <= 3 {
            Layout {
                entry_size: 9,
                attr_bytes: 4,
                max_objects: 255,
                max_properties: 31,
                parent_off: 4,
                sibling_off: 5,
                child_off: 6,
                prop_off: 7,
                wide: false,
            }
        } else {
            Layout {
                entry_size: 14,
                attr_bytes: 6,
                max_objects: u16::MAX,
                max_properties: 63,
                parent_off: 6,
                sibling_off: 8,
                child_off: 10,
                prop_off: 12,
                wide: true,
            }
        }
    }
}

/// The object store: interprets the object table, attribute flags, and
/// property tables embedded in the memory image.
///
/// Objects are addressed by their 1-based index exactly as the story file
/// encodes them; parent/sibling/child are plain indices with 0 meaning
/// "none", so the tree has no ownership cycles by construction.
pub struct ObjectTable {
    base: u32,
    tree_base: u32,
    version: u8,
    abbrev_table: u32,
    layout: Layout,
}

impl ObjectTable {
    pub fn new(header: &Header) -> ObjectTable {
        let layout = Layout::for_version(header.version);
        ObjectTable {
            base: header.object_table,
            tree_base: header.object_table + layout.max_properties as u32 * 2,
            version: header.version,
            abbrev_table: header.abbrev_table,
            layout,
        }
    }

    fn object_addr(&self, obj: u16) -> Result<u32> {
        if obj == 0 || obj > self.layout.max_objects {
            return Err(Error::InvalidObject(obj));
        }
        Ok(self.tree_base + (obj as u32 - 1) * self.layout.entry_size)
    }

    fn read_link(&self, game: &Game, addr: u32) -> Result<u16> {
        if self.layout.wide {
            game.read_word(addr)
        } else {
            Ok(game.read_byte(addr)? as u16)
        }
    }

    fn write_link(&self, game: &mut Game, addr: u32, value: u16) -> Result<()> {
        if self.layout.wide {
            game.write_word(addr, value)
        } else {
            if value > 255 {
                return Err(Error::InvalidObject(value));
            }
            game.write_byte(addr, value as u8)
        }
    }

    pub fn parent(&self, game: &Game, obj: u16) -> Result<u16> {
        if obj == 0 {
            return Ok(0);
        }
        let addr = self.object_addr(obj)?;
        self.read_link(game, addr + self.layout.parent_off)
    }

    pub fn sibling(&self, game: &Game, obj: u16) -> Result<u16> {
        if obj == 0 {
            return Ok(0);
        }
        let addr = self.object_addr(obj)?;
        self.read_link(game, addr + self.layout.sibling_off)
    }

    pub fn child(&self, game: &Game, obj: u16) -> Result<u16> {
        if obj == 0 {
            return Ok(0);
        }
        let addr = self.object_addr(obj)?;
        self.read_link(game, addr + self.layout.child_off)
    }

    fn set_parent(&self, game: &mut Game, obj: u16, parent: u16) -> Result<()> {
        let addr = self.object_addr(obj)?;
        self.write_link(game, addr + self.layout.parent_off, parent)
    }

    fn set_sibling(&self, game: &mut Game, obj: u16, sibling: u16) -> Result<()> {
        let addr = self.object_addr(obj)?;
        self.write_link(game, addr + self.layout.sibling_off, sibling)
    }

    fn set_child(&self, game: &mut Game, obj: u16, child: u16) -> Result<()> {
        let addr = self.object_addr(obj)?;
        self.write_link(game, addr + self.layout.child_off, child)
    }

    /// Test an attribute bit; numbering starts at the most significant bit
    /// of the attribute field.
    pub fn test_attribute(&self, game: &Game, obj: u16, attr: u16) -> Result<bool> {
        if obj == 0 {
            return Ok(false);
        }
        if attr >= self.layout.attr_bytes as u16 * 8 {
            debug!("test_attr {attr} out of range for v{}", self.version);
            return Ok(false);
        }
        let addr = self.object_addr(obj)? + attr as u32 / 8;
        let bit = 7 - (attr % 8);
        Ok(game.read_byte(addr)? & (1 << bit) != 0)
    }

    pub fn set_attribute(&self, game: &mut Game, obj: u16, attr: u16) -> Result<()> {
        self.change_attribute(game, obj, attr, true)
    }

    pub fn clear_attribute(&self, game: &mut Game, obj: u16, attr: u16) -> Result<()> {
        self.change_attribute(game, obj, attr, false)
    }

    fn change_attribute(&self, game: &mut Game, obj: u16, attr: u16, set: bool) -> Result<()> {
        if attr >= self.layout.attr_bytes as u16 * 8 {
            debug!("attribute {attr} out of range for v{}, ignored", self.version);
            return Ok(());
        }
        let addr = self.object_addr(obj)? + attr as u32 / 8;
        let bit = 7 - (attr % 8);
        let byte = game.read_byte(addr)?;
        let byte = if set { byte | 1 << bit } else { byte & !(1 << bit) };
        game.write_byte(addr, byte)
    }

    /// Address of an object's property table.
    pub fn property_table(&self, game: &Game, obj: u16) -> Result<u32> {
        let addr = self.object_addr(obj)?;
        Ok(game.read_word(addr + self.layout.prop_off)? as u32)
    }

    /// Short name from the property table header; empty when absent.
    pub fn short_name(&self, game: &Game, obj: u16) -> Result<String> {
        if obj == 0 {
            return Ok(String::new());
        }
        let table = self.property_table(game, obj)?;
        let name_words = game.read_byte(table)?;
        if name_words == 0 {
            return Ok(String::new());
        }
        let (name, _) = text::decode_string(
            &game.memory,
            table as usize + 1,
            self.abbrev_table as usize,
            self.version,
        )?;
        Ok(name)
    }

    fn first_property_addr(&self, game: &Game, obj: u16) -> Result<u32> {
        let table = self.property_table(game, obj)?;
        let name_words = game.read_byte(table)? as u32;
        Ok(table + 1 + name_words * 2)
    }

    /// Parse a property header at `addr`: (number, data length, header
    /// length), or None at the zero terminator.
    fn property_header(&self, game: &Game, addr: u32) -> Result<Option<(u8, u32, u32)>> {
        let size_byte = game.read_byte(addr)?;
        if size_byte == 0 {
            return Ok(None);
        }
        if !self.layout.wide {
            // v1-3: number in the bottom five bits, size above
            let num = size_byte & 0x1F;
            let size = ((size_byte >> 5) & 0x07) as u32 + 1;
            Ok(Some((num, size, 1)))
        } else {
            let num = size_byte & 0x3F;
            if size_byte & 0x80 != 0 {
                let second = game.read_byte(addr + 1)? & 0x3F;
                let size = if second == 0 { 64 } else { second as u32 };
                Ok(Some((num, size, 2)))
            } else if size_byte & 0x40 != 0 {
                Ok(Some((num, 2, 1)))
            } else {
                Ok(Some((num, 1, 1)))
            }
        }
    }

    /// Find a property's data address and length; properties are stored in
    /// descending number order, so the scan stops early on a smaller number.
    fn find_property(&self, game: &Game, obj: u16, prop: u8) -> Result<Option<(u32, u32)>> {
        let mut addr = self.first_property_addr(game, obj)?;
        while let Some((num, size, header)) = self.property_header(game, addr)? {
            if num == prop {
                return Ok(Some((addr + header, size)));
            }
            if num < prop {
                break;
            }
            addr += header + size;
        }
        Ok(None)
    }

    /// Property value with defaults-table fallback. Only one- and two-byte
    /// properties may be read this way.
    pub fn get_property(&self, game: &Game, obj: u16, prop: u8) -> Result<u16> {
        if prop == 0 || prop > self.layout.max_properties {
            return Err(Error::CorruptStory(format!(
                "property number {prop} out of range"
            )));
        }
        if obj == 0 {
            return Ok(0);
        }
        match self.find_property(game, obj, prop)? {
            Some((addr, 1)) => Ok(game.read_byte(addr)? as u16),
            Some((addr, 2)) => game.read_word(addr),
            Some((_, size)) => Err(Error::CorruptStory(format!(
                "get_prop on {size}-byte property {prop}"
            ))),
            None => {
                let default_addr = self.base + (prop as u32 - 1) * 2;
                game.read_word(default_addr)
            }
        }
    }

    /// Data address of a property, 0 when absent.
    pub fn get_property_addr(&self, game: &Game, obj: u16, prop: u8) -> Result<u16> {
        if obj == 0 || prop == 0 {
            return Ok(0);
        }
        match self.find_property(game, obj, prop)? {
            Some((addr, _)) => Ok(addr as u16),
            None => Ok(0),
        }
    }

    /// Data length of the property whose data starts at `addr`; the length
    /// byte sits immediately before the data. `get_prop_len 0` is 0.
    pub fn get_property_len(&self, game: &Game, addr: u16) -> Result<u16> {
        if addr == 0 {
            return Ok(0);
        }
        let size_byte = game.read_byte(addr as u32 - 1)?;
        if !self.layout.wide {
            Ok(((size_byte >> 5) & 0x07) as u16 + 1)
        } else if size_byte & 0x80 != 0 {
            let size = size_byte & 0x3F;
            Ok(if size == 0 { 64 } else { size as u16 })
        } else if size_byte & 0x40 != 0 {
            Ok(2)
        } else {
            Ok(1)
        }
    }

    /// Write a one- or two-byte property that must already exist.
    pub fn put_property(&self, game: &mut Game, obj: u16, prop: u8, value: u16) -> Result<()> {
        match self.find_property(game, obj, prop)? {
            Some((addr, 1)) => game.write_byte(addr, (value & 0xFF) as u8),
            Some((addr, 2)) => game.write_word(addr, value),
            Some((_, size)) => Err(Error::CorruptStory(format!(
                "put_prop on {size}-byte property {prop}"
            ))),
            None => Err(Error::CorruptStory(format!(
                "put_prop on missing property {prop} of object {obj}"
            ))),
        }
    }

    /// Property enumeration: the number following `prop` in table order,
    /// or the first number when `prop` is 0, or 0 after the last.
    pub fn get_next_property(&self, game: &Game, obj: u16, prop: u8) -> Result<u16> {
        if obj == 0 {
            return Ok(0);
        }
        let mut addr = self.first_property_addr(game, obj)?;
        if prop == 0 {
            return match self.property_header(game, addr)? {
                Some((num, _, _)) => Ok(num as u16),
                None => Ok(0),
            };
        }
        while let Some((num, size, header)) = self.property_header(game, addr)? {
            addr += header + size;
            if num == prop {
                return match self.property_header(game, addr)? {
                    Some((next, _, _)) => Ok(next as u16),
                    None => Ok(0),
                };
            }
        }
        Err(Error::CorruptStory(format!(
            "get_next_prop on missing property {prop} of object {obj}"
        )))
    }

    /// Detach an object from its parent, splicing the sibling chain. The
    /// chain walk is step-bounded so a corrupt story cannot loop us.
    pub fn remove_object(&self, game: &mut Game, obj: u16) -> Result<()> {
        if obj == 0 {
            debug!("remove_obj 0 ignored");
            return Ok(());
        }
        let parent = self.parent(game, obj)?;
        if parent != 0 {
            let first_child = self.child(game, parent)?;
            let next = self.sibling(game, obj)?;
            if first_child == obj {
                self.set_child(game, parent, next)?;
            } else {
                let mut current = first_child;
                let mut steps = 0u32;
                while current != 0 {
                    steps += 1;
                    if steps > self.layout.max_objects as u32 {
                        return Err(Error::CorruptStory(format!(
                            "sibling chain of object {parent} loops"
                        )));
                    }
                    let after = self.sibling(game, current)?;
                    if after == obj {
                        self.set_sibling(game, current, next)?;
                        break;
                    }
                    current = after;
                }
            }
        }
        self.set_parent(game, obj, 0)?;
        self.set_sibling(game, obj, 0)
    }

    /// Move an object to be the first child of `dest`.
    pub fn insert_object(&self, game: &mut Game, obj: u16, dest: u16) -> Result<()> {
        if obj == 0 {
            return Err(Error::InvalidObject(0));
        }
        if dest == 0 {
            return Err(Error::InvalidObject(0));
        }
        if obj == dest {
            return Err(Error::CorruptStory(format!(
                "insert_obj {obj} into itself"
            )));
        }
        self.remove_object(game, obj)?;
        let old_child = self.child(game, dest)?;
        self.set_child(game, dest, obj)?;
        self.set_parent(game, obj, dest)?;
        self.set_sibling(game, obj, old_child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::checksum;

    /// Build a v3 image with four named objects and a couple of properties.
    fn test_game() -> Game {
        let mut bytes = vec![0u8; 0x400];
        bytes[0] = 3;
        bytes[0x0E] = 0x03;
        bytes[0x0F] = 0x00; // static base above the object and property tables
        bytes[0x0A] = 0x00;
        bytes[0x0B] = 0x80; // object table at 0x80

        // Property defaults: default for property 5 is 0x1234
        let defaults = 0x80;
        bytes[defaults + 4 * 2] = 0x12;
        bytes[defaults + 4 * 2 + 1] = 0x34;

        // Objects at 0x80 + 62; entries are 9 bytes
        let tree = 0x80 + 62;
        let set_obj = |bytes: &mut [u8], n: usize, parent: u8, sibling: u8, child: u8, props: u16| {
            let at = tree + (n - 1) * 9;
            bytes[at + 4] = parent;
            bytes[at + 5] = sibling;
            bytes[at + 6] = child;
            bytes[at + 7] = (props >> 8) as u8;
            bytes[at + 8] = (props & 0xFF) as u8;
        };
        // 1 is the room; 2, 3, 4 are its children in order
        set_obj(&mut bytes, 1, 0, 0, 2, 0x200);
        set_obj(&mut bytes, 2, 1, 3, 0, 0x210);
        set_obj(&mut bytes, 3, 1, 4, 0, 0x220);
        set_obj(&mut bytes, 4, 1, 0, 0, 0x230);

        // Property table for object 2: no name, prop 7 (2 bytes), prop 5 (1 byte)
        bytes[0x210] = 0; // name length
        bytes[0x211] = (1 << 5) | 7; // size 2, property 7
        bytes[0x212] = 0xAB;
        bytes[0x213] = 0xCD;
        bytes[0x214] = 5; // size 1, property 5
        bytes[0x215] = 0x42;
        bytes[0x216] = 0; // terminator

        // Empty property tables for the others
        for table in [0x200usize, 0x220, 0x230] {
            bytes[table] = 0;
            bytes[table + 1] = 0;
        }

        let sum = checksum(&bytes, bytes.len());
        bytes[0x1C] = (sum >> 8) as u8;
        bytes[0x1D] = (sum & 0xFF) as u8;
        Game::from_bytes(bytes).unwrap()
    }

    #[test]
    fn test_tree_navigation() {
        let game = test_game();
        let objects = ObjectTable::new(&game.header);
        assert_eq!(objects.parent(&game, 2).unwrap(), 1);
        assert_eq!(objects.child(&game, 1).unwrap(), 2);
        assert_eq!(objects.sibling(&game, 2).unwrap(), 3);
        assert_eq!(objects.sibling(&game, 4).unwrap(), 0);
        assert_eq!(objects.parent(&game, 0).unwrap(), 0);
    }

    #[test]
    fn test_attributes_msb_first() {
        let mut game = test_game();
        let objects = ObjectTable::new(&game.header);
        assert!(!objects.test_attribute(&game, 1, 0).unwrap());
        objects.set_attribute(&mut game, 1, 0).unwrap();
        assert!(objects.test_attribute(&game, 1, 0).unwrap());
        // Attribute 0 is the top bit of the first attribute byte
        let tree = 0x80 + 62;
        assert_eq!(game.read_byte(tree).unwrap(), 0x80);
        objects.clear_attribute(&mut game, 1, 0).unwrap();
        assert!(!objects.test_attribute(&game, 1, 0).unwrap());
    }

    #[test]
    fn test_property_read_write_and_default() {
        let mut game = test_game();
        let objects = ObjectTable::new(&game.header);
        assert_eq!(objects.get_property(&game, 2, 7).unwrap(), 0xABCD);
        assert_eq!(objects.get_property(&game, 2, 5).unwrap(), 0x42);
        // Object 3 lacks property 5, so the defaults table answers
        assert_eq!(objects.get_property(&game, 3, 5).unwrap(), 0x1234);
        objects.put_property(&mut game, 2, 5, 0x99).unwrap();
        assert_eq!(objects.get_property(&game, 2, 5).unwrap(), 0x99);
        assert!(objects.put_property(&mut game, 3, 5, 1).is_err());
    }

    #[test]
    fn test_get_property_is_idempotent() {
        let game = test_game();
        let objects = ObjectTable::new(&game.header);
        let first = objects.get_property(&game, 2, 7).unwrap();
        let second = objects.get_property(&game, 2, 7).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_property_addr_len_and_enumeration() {
        let game = test_game();
        let objects = ObjectTable::new(&game.header);
        let addr = objects.get_property_addr(&game, 2, 7).unwrap();
        assert_eq!(addr, 0x212);
        assert_eq!(objects.get_property_len(&game, addr).unwrap(), 2);
        assert_eq!(objects.get_property_addr(&game, 2, 9).unwrap(), 0);
        assert_eq!(objects.get_property_len(&game, 0).unwrap(), 0);
        assert_eq!(objects.get_next_property(&game, 2, 0).unwrap(), 7);
        assert_eq!(objects.get_next_property(&game, 2, 7).unwrap(), 5);
        assert_eq!(objects.get_next_property(&game, 2, 5).unwrap(), 0);
    }

    #[test]
    fn test_remove_middle_sibling_splices_chain() {
        let mut game = test_game();
        let objects = ObjectTable::new(&game.header);
        objects.remove_object(&mut game, 3).unwrap();
        assert_eq!(objects.parent(&game, 3).unwrap(), 0);
        assert_eq!(objects.sibling(&game, 2).unwrap(), 4);
    }

    #[test]
    fn test_remove_only_child_nulls_parent_child() {
        let mut game = test_game();
        let objects = ObjectTable::new(&game.header);
        objects.remove_object(&mut game, 2).unwrap();
        objects.remove_object(&mut game, 3).unwrap();
        objects.remove_object(&mut game, 4).unwrap();
        assert_eq!(objects.child(&game, 1).unwrap(), 0);
    }

    #[test]
    fn test_insert_makes_first_child() {
        let mut game = test_game();
        let objects = ObjectTable::new(&game.header);
        objects.insert_object(&mut game, 4, 2).unwrap();
        assert_eq!(objects.parent(&game, 4).unwrap(), 2);
        assert_eq!(objects.child(&game, 2).unwrap(), 4);
        assert_eq!(objects.sibling(&game, 3).unwrap(), 0);
        assert_eq!(objects.child(&game, 1).unwrap(), 2);
    }

    #[test]
    fn test_tree_invariants_after_shuffling() {
        let mut game = test_game();
        let objects = ObjectTable::new(&game.header);
        objects.insert_object(&mut game, 2, 4).unwrap();
        objects.insert_object(&mut game, 3, 4).unwrap();
        objects.insert_object(&mut game, 2, 3).unwrap();
        objects.remove_object(&mut game, 3).unwrap();
        objects.insert_object(&mut game, 3, 1).unwrap();

        // No object is its own ancestor, and each parent's child chain
        // contains each child exactly once.
        for obj in 1u16..=4 {
            let mut seen = 0;
            let mut current = objects.parent(&game, obj).unwrap();
            while current != 0 {
                assert_ne!(current, obj, "object {obj} is its own ancestor");
                current = objects.parent(&game, current).unwrap();
                seen += 1;
                assert!(seen <= 4);
            }
            let parent = objects.parent(&game, obj).unwrap();
            if parent != 0 {
                let mut count = 0;
                let mut child = objects.child(&game, parent).unwrap();
                while child != 0 {
                    if child == obj {
                        count += 1;
                    }
                    child = objects.sibling(&game, child).unwrap();
                }
                assert_eq!(count, 1);
            }
        }
    }

    #[test]
    fn test_out_of_range_object_is_an_error() {
        let game = test_game();
        let objects = ObjectTable::new(&game.header);
        assert!(matches!(
            objects.object_addr(0),
            Err(Error::InvalidObject(0))
        ));
    }
}
