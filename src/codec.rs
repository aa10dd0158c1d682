//! Conversions between raw bytes and their two textual forms: plain text
//! under a selectable character encoding, and space-separated hex pairs.
//!
//! Text conversions never fail. Characters the target encoding cannot
//! represent become `?` on the way out, undecodable bytes become U+FFFD on
//! the way in. Hex parsing is strict and all-or-nothing.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use encoding_rs::{EncoderResult, Encoding, GBK, UTF_16LE};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const REPLACEMENT_BYTE: u8 = b'?';

/// Character encodings offered for the send and receive views.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    #[serde(rename = "ascii")]
    Ascii,
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "utf-16")]
    Utf16,
    #[serde(rename = "utf-32")]
    Utf32,
    #[default]
    #[serde(rename = "gbk")]
    Gbk,
}

impl TextEncoding {
    pub const ALL: [TextEncoding; 5] = [
        TextEncoding::Ascii,
        TextEncoding::Utf8,
        TextEncoding::Utf16,
        TextEncoding::Utf32,
        TextEncoding::Gbk,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Ascii => "ascii",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf16 => "utf-16",
            TextEncoding::Utf32 => "utf-32",
            TextEncoding::Gbk => "gbk",
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TextEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ascii" => Ok(TextEncoding::Ascii),
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "utf-16" | "utf16" => Ok(TextEncoding::Utf16),
            "utf-32" | "utf32" => Ok(TextEncoding::Utf32),
            "gbk" | "gb2312" => Ok(TextEncoding::Gbk),
            other => Err(format!("unknown encoding '{}'", other)),
        }
    }
}

/// What to do with a character the target encoding cannot represent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unencodable {
    /// Emit a `?` byte in its place.
    Replace,
    /// Drop it.
    Ignore,
}

/// Encodes `s`, substituting `?` for unencodable characters.
pub fn encode_text(s: &str, encoding: TextEncoding) -> Vec<u8> {
    encode_text_with(s, encoding, Unencodable::Replace)
}

/// Encodes `s` with an explicit policy for unencodable characters.
///
/// UTF-16 and UTF-32 output starts with a little-endian byte order mark.
pub fn encode_text_with(s: &str, encoding: TextEncoding, policy: Unencodable) -> Vec<u8> {
    if s.is_empty() {
        return Vec::new();
    }
    match encoding {
        TextEncoding::Ascii => {
            let mut out = Vec::with_capacity(s.len());
            for c in s.chars() {
                if c.is_ascii() {
                    out.push(c as u8);
                } else if policy == Unencodable::Replace {
                    out.push(REPLACEMENT_BYTE);
                }
            }
            out
        }
        TextEncoding::Utf8 => s.as_bytes().to_vec(),
        TextEncoding::Utf16 => {
            let mut out = vec![0xFF, 0xFE];
            for unit in s.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            out
        }
        TextEncoding::Utf32 => {
            let mut out = vec![0xFF, 0xFE, 0x00, 0x00];
            for c in s.chars() {
                out.extend_from_slice(&(c as u32).to_le_bytes());
            }
            out
        }
        TextEncoding::Gbk => encode_legacy(s, GBK, policy),
    }
}

fn encode_legacy(s: &str, encoding: &'static Encoding, policy: Unencodable) -> Vec<u8> {
    let mut encoder = encoding.new_encoder();
    let mut out = Vec::with_capacity(s.len());
    let mut rest = s;
    loop {
        let needed = encoder
            .max_buffer_length_from_utf8_without_replacement(rest.len())
            .unwrap_or(rest.len() * 4);
        out.reserve(needed);
        let (result, read) = encoder.encode_from_utf8_to_vec_without_replacement(rest, &mut out, true);
        rest = &rest[read..];
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::OutputFull => continue,
            EncoderResult::Unmappable(_) => {
                if policy == Unencodable::Replace {
                    out.push(REPLACEMENT_BYTE);
                }
            }
        }
    }
    out
}

/// Decodes `bytes`, substituting U+FFFD for undecodable sequences.
///
/// UTF-16 and UTF-32 honour a leading byte order mark and otherwise assume
/// little-endian.
pub fn decode_text(bytes: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Ascii => bytes
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
            .collect(),
        TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Utf16 => {
            let (text, _, _) = UTF_16LE.decode(bytes);
            text.into_owned()
        }
        TextEncoding::Utf32 => decode_utf32(bytes),
        TextEncoding::Gbk => {
            let (text, _) = GBK.decode_without_bom_handling(bytes);
            text.into_owned()
        }
    }
}

fn decode_utf32(bytes: &[u8]) -> String {
    let (big_endian, body) = match bytes {
        [0xFF, 0xFE, 0x00, 0x00, rest @ ..] => (false, rest),
        [0x00, 0x00, 0xFE, 0xFF, rest @ ..] => (true, rest),
        _ => (false, bytes),
    };
    let mut out = String::with_capacity(body.len() / 4);
    let mut units = body.chunks_exact(4);
    for unit in &mut units {
        let raw = [unit[0], unit[1], unit[2], unit[3]];
        let value = if big_endian { u32::from_be_bytes(raw) } else { u32::from_le_bytes(raw) };
        out.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    if !units.remainder().is_empty() {
        out.push(char::REPLACEMENT_CHARACTER);
    }
    out
}

/// Renders bytes as lowercase hex pairs separated by single spaces.
pub fn to_hex_display(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// True when `s`, ignoring spaces, is an even number of hex digits.
pub fn is_hex_display(s: &str) -> bool {
    let mut count = 0usize;
    for c in s.chars().filter(|&c| c != ' ') {
        if !c.is_ascii_hexdigit() {
            return false;
        }
        count += 1;
    }
    count % 2 == 0
}

/// Parses space-tolerant, case-insensitive hex pairs.
pub fn from_hex_display(s: &str) -> Result<Vec<u8>, ValidationError> {
    if !is_hex_display(s) {
        return Err(ValidationError::InvalidHexFormat);
    }
    let compact: String = s.chars().filter(|&c| c != ' ').collect();
    hex::decode(compact).map_err(|_| ValidationError::InvalidHexFormat)
}

/// Rewrites valid hex text into canonical `"aa bb cc"` spacing.
pub fn normalize_hex(s: &str) -> Result<String, ValidationError> {
    from_hex_display(s).map(|bytes| to_hex_display(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_display_is_lowercase_and_spaced() {
        assert_eq!(to_hex_display(&[0x0A, 0x1B, 0xFF]), "0a 1b ff");
        assert_eq!(to_hex_display(&[]), "");
    }

    #[test]
    fn hex_parsing_is_case_insensitive_and_space_tolerant() {
        assert_eq!(from_hex_display("0A 1b FF").unwrap(), vec![0x0A, 0x1B, 0xFF]);
        assert_eq!(from_hex_display("0a1bff").unwrap(), vec![0x0A, 0x1B, 0xFF]);
        assert_eq!(from_hex_display("  0a  1b ").unwrap(), vec![0x0A, 0x1B]);
    }

    #[test]
    fn empty_hex_is_empty_bytes() {
        assert_eq!(from_hex_display("").unwrap(), Vec::<u8>::new());
        assert_eq!(from_hex_display("   ").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn reject_odd_length_and_non_hex_digits() {
        assert_eq!(from_hex_display("0a 1"), Err(ValidationError::InvalidHexFormat));
        assert_eq!(from_hex_display("0g"), Err(ValidationError::InvalidHexFormat));
        assert_eq!(from_hex_display("0a\t1b"), Err(ValidationError::InvalidHexFormat));
        assert!(!is_hex_display("xyz1"));
    }

    #[test]
    fn hex_round_trip_over_all_byte_values() {
        let all: Vec<u8> = (0..=255u8).collect();
        assert_eq!(from_hex_display(&to_hex_display(&all)).unwrap(), all);
    }

    #[test]
    fn normalize_hex_rewrites_spacing() {
        assert_eq!(normalize_hex("0A1b ff").unwrap(), "0a 1b ff");
        assert!(normalize_hex("0A1").is_err());
    }

    #[test]
    fn text_round_trip_in_every_encoding() {
        for enc in TextEncoding::ALL {
            let text = "hello, serial\r\n";
            assert_eq!(decode_text(&encode_text(text, enc), enc), text, "{}", enc);
        }
        for enc in [TextEncoding::Utf8, TextEncoding::Utf16, TextEncoding::Utf32, TextEncoding::Gbk] {
            let text = "中文串口";
            assert_eq!(decode_text(&encode_text(text, enc), enc), text, "{}", enc);
        }
    }

    #[test]
    fn gbk_encodes_chinese_as_double_byte() {
        assert_eq!(encode_text("中", TextEncoding::Gbk), vec![0xD6, 0xD0]);
    }

    #[test]
    fn unencodable_characters_are_replaced_or_ignored() {
        assert_eq!(encode_text("a中b", TextEncoding::Ascii), b"a?b".to_vec());
        assert_eq!(
            encode_text_with("a中b", TextEncoding::Ascii, Unencodable::Ignore),
            b"ab".to_vec()
        );
        assert_eq!(encode_text("a😀b", TextEncoding::Gbk), b"a?b".to_vec());
        assert_eq!(
            encode_text_with("a😀b", TextEncoding::Gbk, Unencodable::Ignore),
            b"ab".to_vec()
        );
    }

    #[test]
    fn undecodable_bytes_become_replacement_characters() {
        assert_eq!(decode_text(&[b'a', 0xFF, b'b'], TextEncoding::Ascii), "a\u{FFFD}b");
        assert_eq!(decode_text(&[b'a', 0xFF, b'b'], TextEncoding::Utf8), "a\u{FFFD}b");
        assert_eq!(decode_text(&[0x41, 0, 0, 0, 0x42], TextEncoding::Utf32), "A\u{FFFD}");
    }

    #[test]
    fn wide_encodings_carry_a_little_endian_bom() {
        assert_eq!(encode_text("A", TextEncoding::Utf16), vec![0xFF, 0xFE, 0x41, 0x00]);
        assert_eq!(
            encode_text("A", TextEncoding::Utf32),
            vec![0xFF, 0xFE, 0x00, 0x00, 0x41, 0x00, 0x00, 0x00]
        );
        assert_eq!(decode_text(&[0x00, 0x00, 0xFE, 0xFF, 0, 0, 0, 0x41], TextEncoding::Utf32), "A");
        assert_eq!(decode_text(&[0x41, 0x00], TextEncoding::Utf16), "A");
    }

    #[test]
    fn encoding_labels_parse_back() {
        for enc in TextEncoding::ALL {
            assert_eq!(enc.label().parse::<TextEncoding>().unwrap(), enc);
        }
        assert!("latin-9".parse::<TextEncoding>().is_err());
        assert_eq!(TextEncoding::default(), TextEncoding::Gbk);
    }
}
