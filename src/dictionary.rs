use std::cmp::Ordering;

use log::debug;

use crate::error::{Error, Result};
use crate::game::Game;
use crate::text;

/// A token with its byte offset in the source line, which the engine needs
/// to fill parse-buffer position fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
}

/// Parsed dictionary header. Entries stay in the memory image and are read
/// on demand; the header (separator set, entry geometry) is parsed once per
/// session.
pub struct Dictionary {
    pub separators: Vec<u8>,
    pub entry_length: u8,
    pub entry_count: u16,
    entries_addr: u32,
    /// The main dictionary is sorted for binary search; user dictionaries
    /// (v5 `tokenise`) flag themselves unsorted with a negative count.
    sorted: bool,
    version: u8,
}

impl Dictionary {
    /// Parse the story's main dictionary.
    pub fn parse(game: &Game) -> Result<Dictionary> {
        Self::parse_at(game, game.header.dictionary)
    }

    /// Parse a dictionary header at an arbitrary address.
    pub fn parse_at(game: &Game, addr: u32) -> Result<Dictionary> {
        let sep_count = game.read_byte(addr)? as u32;
        let mut separators = Vec::with_capacity(sep_count as usize);
        for i in 0..sep_count {
            separators.push(game.read_byte(addr + 1 + i)?);
        }
        let entry_length = game.read_byte(addr + 1 + sep_count)?;
        let raw_count = game.read_word(addr + 2 + sep_count)? as i16;
        let entries_addr = addr + 4 + sep_count;

        let version = game.header.version;
        if (entry_length as usize) < text::key_bytes(version) {
            return Err(Error::CorruptStory(format!(
                "dictionary entry length {entry_length} too small for v{version} keys"
            )));
        }

        Ok(Dictionary {
            separators,
            entry_length,
            entry_count: raw_count.unsigned_abs(),
            entries_addr,
            sorted: raw_count >= 0,
            version,
        })
    }

    pub fn is_separator(&self, ch: u8) -> bool {
        self.separators.contains(&ch)
    }

    /// Split a line into tokens on whitespace and the story's separator
    /// characters; separators are tokens of their own.
    pub fn tokenize(&self, line: &str) -> Vec<Token> {
        let bytes = line.as_bytes();
        let mut tokens = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == b' ' || b == b'\t' {
                i += 1;
            } else if self.is_separator(b) {
                tokens.push(Token {
                    text: (b as char).to_string(),
                    start: i,
                });
                i += 1;
            } else {
                let start = i;
                while i < bytes.len()
                    && bytes[i] != b' '
                    && bytes[i] != b'\t'
                    && !self.is_separator(bytes[i])
                {
                    i += 1;
                }
                tokens.push(Token {
                    text: line[start..i].to_string(),
                    start,
                });
            }
        }
        tokens
    }

    /// Byte address of the dictionary entry for `word`, or 0 on a miss.
    /// A miss is a normal outcome; the story decides what an unknown word
    /// means.
    pub fn lookup(&self, game: &Game, word: &str) -> Result<u16> {
        let key = text::encode_word(word, self.version);
        if self.sorted {
            self.binary_search(game, &key)
        } else {
            self.linear_search(game, &key)
        }
    }

    fn entry_addr(&self, index: u32) -> u32 {
        self.entries_addr + index * self.entry_length as u32
    }

    fn compare_key(&self, game: &Game, addr: u32, key: &[u8]) -> Result<Ordering> {
        for (i, &k) in key.iter().enumerate() {
            let stored = game.read_byte(addr + i as u32)?;
            match k.cmp(&stored) {
                Ordering::Equal => continue,
                other => return Ok(other),
            }
        }
        Ok(Ordering::Equal)
    }

    fn binary_search(&self, game: &Game, key: &[u8]) -> Result<u16> {
        let mut low = 0i32;
        let mut high = self.entry_count as i32 - 1;
        while low <= high {
            let mid = (low + high) / 2;
            let addr = self.entry_addr(mid as u32);
            match self.compare_key(game, addr, key)? {
                Ordering::Less => high = mid - 1,
                Ordering::Greater => low = mid + 1,
                Ordering::Equal => return Ok(addr as u16),
            }
        }
        debug!("dictionary miss for encoded key {key:02x?}");
        Ok(0)
    }

    fn linear_search(&self, game: &Game, key: &[u8]) -> Result<u16> {
        for i in 0..self.entry_count as u32 {
            let addr = self.entry_addr(i);
            if self.compare_key(game, addr, key)? == Ordering::Equal {
                return Ok(addr as u16);
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::checksum;

    /// Image with a sorted three-word dictionary and ',' as a separator.
    fn test_game() -> (Game, u32) {
        let dict_addr = 0x100u32;
        let mut bytes = vec![0u8; 0x200];
        bytes[0] = 3;
        bytes[0x0E] = 0x01; // static base 0x100: the dictionary is static, as usual
        bytes[0x08] = 0x01;
        bytes[0x09] = 0x00;

        let mut keys: Vec<Vec<u8>> = ["lamp", "look", "take"]
            .iter()
            .map(|w| text::encode_word(w, 3))
            .collect();
        keys.sort();

        let mut at = dict_addr as usize;
        bytes[at] = 1; // one separator
        bytes[at + 1] = b',';
        bytes[at + 2] = 7; // entry length: 4-byte key + 3 data bytes
        bytes[at + 3] = 0;
        bytes[at + 4] = keys.len() as u8;
        at += 5;
        for key in &keys {
            bytes[at..at + 4].copy_from_slice(key);
            at += 7;
        }

        let sum = checksum(&bytes, bytes.len());
        bytes[0x1C] = (sum >> 8) as u8;
        bytes[0x1D] = (sum & 0xFF) as u8;
        (Game::from_bytes(bytes).unwrap(), dict_addr)
    }

    #[test]
    fn test_header_parse() {
        let (game, _) = test_game();
        let dict = Dictionary::parse(&game).unwrap();
        assert_eq!(dict.separators, vec![b',']);
        assert_eq!(dict.entry_length, 7);
        assert_eq!(dict.entry_count, 3);
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        let (game, _) = test_game();
        let dict = Dictionary::parse(&game).unwrap();
        let addr = dict.lookup(&game, "look").unwrap();
        assert_ne!(addr, 0);
        // The entry really holds the encoded key
        let key = text::encode_word("look", 3);
        for (i, &b) in key.iter().enumerate() {
            assert_eq!(game.read_byte(addr as u32 + i as u32).unwrap(), b);
        }
        assert_eq!(dict.lookup(&game, "xyzzy").unwrap(), 0);
    }

    #[test]
    fn test_lookup_truncates_to_six_zchars() {
        let (game, _) = test_game();
        let dict = Dictionary::parse(&game).unwrap();
        // "lookin" shares its first six z-chars with no dictionary word,
        // but "looked" with "look" padded differs; both miss. "LOOK" hits.
        assert_ne!(dict.lookup(&game, "LOOK").unwrap(), 0);
        assert_eq!(dict.lookup(&game, "looked").unwrap(), 0);
    }

    #[test]
    fn test_tokenize_splits_and_reports_positions() {
        let (game, _) = test_game();
        let dict = Dictionary::parse(&game).unwrap();
        let tokens = dict.tokenize("look, take  lamp");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["look", ",", "take", "lamp"]);
        assert_eq!(tokens[0].start, 0);
        assert_eq!(tokens[1].start, 4);
        assert_eq!(tokens[2].start, 6);
        assert_eq!(tokens[3].start, 12);
    }

    #[test]
    fn test_tokenize_empty_line() {
        let (game, _) = test_game();
        let dict = Dictionary::parse(&game).unwrap();
        assert!(dict.tokenize("   ").is_empty());
    }
}
