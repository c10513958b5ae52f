use log::debug;

use crate::error::{Error, Result};

/// Alphabet rows for Z-characters 6..=31. Position 0 of A2 is the ZSCII
/// escape and is intercepted before table lookup; position 1 is newline
/// from v2 on. v1 has its own A2 row with '<' and no newline.
pub const ALPHABET_A0: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHABET_A1: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHABET_A2: &[u8; 26] = b" \n0123456789.,!?_#'\"/\\-:()";
const ALPHABET_A2_V1: &[u8; 26] = b" 0123456789.,!?_#'\"/\\<-:()";

/// Z-characters in an encoded dictionary key: 6 for v1-3, 9 for v4+.
pub fn key_zchars(version: u8) -> usize {
    if version <= 3 {
        6
    } else {
        9
    }
}

/// Bytes in an encoded dictionary key: 4 for v1-3, 6 for v4+.
pub fn key_bytes(version: u8) -> usize {
    key_zchars(version) / 3 * 2
}

/// Decode the Z-string at `addr`, returning the text and the number of
/// bytes consumed.
///
/// Decoding is a pure function of the memory image, so decoding the same
/// address twice always yields identical output.
pub fn decode_string(
    memory: &[u8],
    addr: usize,
    abbrev_table: usize,
    version: u8,
) -> Result<(String, usize)> {
    decode_inner(memory, addr, abbrev_table, version, false)
}

fn decode_inner(
    memory: &[u8],
    addr: usize,
    abbrev_table: usize,
    version: u8,
    in_abbrev: bool,
) -> Result<(String, usize)> {
    // Collect the 5-bit codes first; ZSCII escapes may straddle words.
    let mut zchars: Vec<u8> = Vec::new();
    let mut offset = addr;
    loop {
        if offset + 1 >= memory.len() {
            return Err(Error::CorruptStory(format!(
                "unterminated string at {addr:#06x}"
            )));
        }
        let word = ((memory[offset] as u16) << 8) | memory[offset + 1] as u16;
        offset += 2;
        zchars.push(((word >> 10) & 0x1F) as u8);
        zchars.push(((word >> 5) & 0x1F) as u8);
        zchars.push((word & 0x1F) as u8);
        if word & 0x8000 != 0 {
            break;
        }
    }

    let mut out = String::new();
    let mut base = 0usize; // locked alphabet (v1-2 only ever changes this)
    let mut shift: Option<usize> = None; // one-shot alphabet for the next code
    let mut i = 0;
    while i < zchars.len() {
        let zc = zchars[i];
        i += 1;
        let alphabet = shift.take().unwrap_or(base);

        match zc {
            0 => out.push(' '),
            1 if version == 1 => out.push('\n'),
            1..=3 if is_abbrev_code(zc, version) => {
                if in_abbrev {
                    return Err(Error::CorruptStory(
                        "abbreviation refers to another abbreviation".into(),
                    ));
                }
                let Some(&index) = zchars.get(i) else {
                    break; // abbreviation marker cut off by padding
                };
                i += 1;
                let entry = abbrev_table + 2 * (32 * (zc as usize - 1) + index as usize);
                if entry + 1 >= memory.len() {
                    return Err(Error::CorruptStory(format!(
                        "abbreviation entry {entry:#06x} outside memory"
                    )));
                }
                let word_addr = ((memory[entry] as usize) << 8) | memory[entry + 1] as usize;
                let (expansion, _) =
                    decode_inner(memory, word_addr * 2, abbrev_table, version, true)?;
                out.push_str(&expansion);
            }
            2 | 3 if version <= 2 => shift = Some(shift_target(base, zc - 1)),
            4 | 5 if version <= 2 => base = shift_target(base, zc - 3),
            4 => shift = Some(1),
            5 => shift = Some(2),
            6..=31 => {
                if alphabet == 2 && zc == 6 {
                    // ZSCII escape: ten bits spread over the next two codes
                    if i + 1 < zchars.len() {
                        let code = ((zchars[i] as u16) << 5) | zchars[i + 1] as u16;
                        i += 2;
                        match zscii_to_char(code) {
                            Some(ch) => out.push(ch),
                            None => {
                                debug!("unprintable ZSCII code {code} in string at {addr:#06x}");
                                out.push('?');
                            }
                        }
                    } else {
                        break; // escape truncated by end-of-string padding
                    }
                } else {
                    let row = match alphabet {
                        0 => ALPHABET_A0,
                        1 => ALPHABET_A1,
                        _ if version == 1 => ALPHABET_A2_V1,
                        _ => ALPHABET_A2,
                    };
                    out.push(row[(zc - 6) as usize] as char);
                }
            }
            _ => unreachable!("5-bit code out of range"),
        }
    }

    Ok((out, offset - addr))
}

/// Decode the string at a packed address.
pub fn decode_string_at_packed(
    memory: &[u8],
    packed: u16,
    version: u8,
    abbrev_table: usize,
) -> Result<String> {
    let byte_addr = match version {
        1..=3 => packed as usize * 2,
        _ => packed as usize * 4,
    };
    let (text, _) = decode_string(memory, byte_addr, abbrev_table, version)?;
    Ok(text)
}

fn is_abbrev_code(zc: u8, version: u8) -> bool {
    match version {
        1 => false,
        2 => zc == 1,
        _ => (1..=3).contains(&zc),
    }
}

/// v1-2 shift arithmetic: one step forward or two steps forward, mod 3.
fn shift_target(base: usize, steps: u8) -> usize {
    (base + steps as usize) % 3
}

fn zscii_to_char(code: u16) -> Option<char> {
    match code {
        13 => Some('\n'),
        32..=126 => Some(code as u8 as char),
        _ => None,
    }
}

/// Encode a word into dictionary-key form: lowercase fold, map through the
/// alphabets with shift prefixes, escape anything unencodable, and pad with
/// Z-char 5 to exactly 6 (v1-3) or 9 (v4+) codes with the end bit on the
/// final word.
pub fn encode_word(word: &str, version: u8) -> Vec<u8> {
    let n = key_zchars(version);
    let shift_a2 = if version <= 2 { 3 } else { 5 };
    // First A2 position usable by the encoder: v1 has no newline row entry
    let a2_start = if version == 1 { 1 } else { 2 };
    let a2_row: &[u8; 26] = if version == 1 {
        ALPHABET_A2_V1
    } else {
        ALPHABET_A2
    };

    let mut zchars: Vec<u8> = Vec::with_capacity(n);
    for ch in word.chars() {
        if zchars.len() >= n {
            break;
        }
        let ch = ch.to_ascii_lowercase();
        if let Some(pos) = ALPHABET_A0.iter().position(|&c| c as char == ch) {
            zchars.push(pos as u8 + 6);
        } else if let Some(pos) = a2_row[a2_start..].iter().position(|&c| c as char == ch) {
            zchars.push(shift_a2);
            zchars.push((a2_start + pos) as u8 + 6);
        } else {
            // ZSCII escape; unencodable characters become '?'
            let code = if ch.is_ascii() { ch as u8 } else { b'?' };
            zchars.push(shift_a2);
            zchars.push(6);
            zchars.push((code >> 5) & 0x1F);
            zchars.push(code & 0x1F);
        }
    }
    zchars.truncate(n);
    while zchars.len() < n {
        zchars.push(5);
    }

    let mut bytes = Vec::with_capacity(key_bytes(version));
    for (i, chunk) in zchars.chunks(3).enumerate() {
        let mut packed =
            ((chunk[0] as u16) << 10) | ((chunk[1] as u16) << 5) | chunk[2] as u16;
        if i == n / 3 - 1 {
            packed |= 0x8000;
        }
        bytes.push((packed >> 8) as u8);
        bytes.push((packed & 0xFF) as u8);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_string() {
        // "hello": codes 13, 10, 17, 17, 20, pad 5
        let mut memory = vec![0u8; 64];
        // 13,10,17 = 0 01101 01010 10001 = 0x3551
        memory[10] = 0x35;
        memory[11] = 0x51;
        // 17,20,5 with end bit = 1 10001 10100 00101 = 0xC685
        memory[12] = 0xC6;
        memory[13] = 0x85;
        let (text, len) = decode_string(&memory, 10, 0, 3).unwrap();
        assert_eq!(text, "hello");
        assert_eq!(len, 4);
    }

    #[test]
    fn test_string_with_space() {
        // "a b": a=6, space=0, b=7, end bit set: 1 00110 00000 00111 = 0x9807
        let mut memory = vec![0u8; 64];
        memory[20] = 0x98;
        memory[21] = 0x07;
        let (text, len) = decode_string(&memory, 20, 0, 3).unwrap();
        assert_eq!(text, "a b");
        assert_eq!(len, 2);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        for word in ["hello", "sword", "x", "go", "zzzzzz"] {
            let mut memory = vec![0u8; 64];
            let encoded = encode_word(word, 3);
            assert_eq!(encoded.len(), 4);
            memory[8..8 + 4].copy_from_slice(&encoded);
            let (text, _) = decode_string(&memory, 8, 0, 3).unwrap();
            assert_eq!(text, *word);
        }
    }

    #[test]
    fn test_encode_folds_case_and_truncates() {
        assert_eq!(encode_word("Lantern", 3), encode_word("lanter", 3));
        assert_eq!(encode_word("LOOK", 3), encode_word("look", 3));
    }

    #[test]
    fn test_encode_digits_use_a2_shift() {
        let mut memory = vec![0u8; 64];
        let encoded = encode_word("x123", 3);
        memory[0..4].copy_from_slice(&encoded);
        let (text, _) = decode_string(&memory, 0, 0, 3).unwrap();
        // x + three shift/digit pairs overflow six z-chars; the tail is cut
        assert_eq!(text, "x12");
    }

    #[test]
    fn test_v4_keys_are_six_bytes() {
        assert_eq!(encode_word("elongated", 5).len(), 6);
    }

    #[test]
    fn test_abbreviation_expansion() {
        let mut memory = vec![0u8; 128];
        // Abbreviation 0 expands to "hello" stored at byte address 0x40
        memory[0x40] = 0x35;
        memory[0x41] = 0x51;
        memory[0x42] = 0xC6;
        memory[0x43] = 0x85;
        // Abbreviation table at 0x20: entry 0 holds word address 0x20
        memory[0x20] = 0x00;
        memory[0x21] = 0x20;
        // String: [abbrev-1][index 0][pad], end bit: 1 00001 00000 00101
        memory[0x60] = 0x84;
        memory[0x61] = 0x05;
        let (text, _) = decode_string(&memory, 0x60, 0x20, 3).unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn test_nested_abbreviation_is_an_error() {
        let mut memory = vec![0u8; 128];
        // Abbreviation 0 points at a string that itself starts with an
        // abbreviation marker: a story-file defect, not a recursion.
        memory[0x20] = 0x00;
        memory[0x21] = 0x20; // entry 0 -> word address 0x20 -> bytes 0x40
        memory[0x40] = 0x84; // 1 00001 00000 00101: abbrev marker inside
        memory[0x41] = 0x05;
        memory[0x60] = 0x84;
        memory[0x61] = 0x05;
        assert!(matches!(
            decode_string(&memory, 0x60, 0x20, 3),
            Err(Error::CorruptStory(_))
        ));
    }

    #[test]
    fn test_zscii_escape() {
        // A2 shift, escape, then code 64 = '@': 5, 6, 2, 0
        // 00101 00110 00010 | end word 1 00000 00101 00101
        let mut memory = vec![0u8; 32];
        memory[0] = 0x14;
        memory[1] = 0xC2;
        memory[2] = 0x80;
        memory[3] = 0xA5;
        let (text, _) = decode_string(&memory, 0, 0, 3).unwrap();
        assert!(text.starts_with('@'));
    }

    #[test]
    fn test_decoding_is_restartable() {
        let mut memory = vec![0u8; 64];
        memory[10] = 0x35;
        memory[11] = 0x51;
        memory[12] = 0xC6;
        memory[13] = 0x85;
        let first = decode_string(&memory, 10, 0, 3).unwrap();
        let second = decode_string(&memory, 10, 0, 3).unwrap();
        assert_eq!(first, second);
    }
}
