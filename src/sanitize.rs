//! File-name sanitization
//!
//! Album, artist and track titles become path components. Only plain ASCII
//! letters, digits and spaces survive; Latin-1 letters are transliterated
//! and everything else is dropped.

use std::path::PathBuf;

/// Directory used when the cue sheet names no album
const NO_ALBUM: &str = "no album";

/// Reduce `s` to characters that are safe in a file name on any system
pub fn sanitize(s: &str) -> String {
    // Sigur Rós exception
    if s == "( )" {
        return "Untitled".to_string();
    }

    let mut res = String::with_capacity(s.len());
    // Positions of the second letter of two-letter capitals, whose case
    // is only a guess
    let mut guessed = Vec::new();

    for c in s.chars() {
        let replacement = match c as u32 {
            0x30..=0x39 | 0x40..=0x5a | 0x60..=0x7a | 0x20 => {
                res.push(c);
                continue;
            }
            0x09 => " ",
            0xc0..=0xc5 => "A",
            0xc6 => "Ae",
            0xc7 => "C",
            0xc8..=0xcb => "E",
            0xcc..=0xcf => "I",
            0xd0 => "Dh",
            0xd1 => "N",
            0xd2..=0xd6 => "O",
            0xd9..=0xdc => "U",
            0xdd => "Y",
            0xde => "Th",
            0xdf => "ss",
            0xe0..=0xe5 => "a",
            0xe6 => "ae",
            0xe7 => "c",
            0xe8..=0xeb => "e",
            0xec..=0xef => "i",
            0xf0 => "dh",
            0xf1 => "n",
            0xf2..=0xf6 => "o",
            0xf9..=0xfc => "u",
            0xfd | 0xff => "y",
            0xfe => "th",
            0x152 => "Oe",
            0xf8 | 0x153 => "oe",
            _ => continue,
        };

        res.push_str(replacement);
        if matches!(c as u32, 0xc6 | 0xd0 | 0xde | 0x152) {
            guessed.push(res.len() - 1);
        }
    }

    // Everything left is ASCII
    let mut bytes = res.into_bytes();
    for i in guessed {
        match bytes.get(i + 1).copied() {
            Some(next) if next.is_ascii_alphabetic() => {
                if next.is_ascii_uppercase() {
                    bytes[i] = bytes[i].to_ascii_uppercase();
                }
            }
            _ => bytes[i] = bytes[i].to_ascii_uppercase(),
        }
    }

    String::from_utf8(bytes).unwrap_or_default()
}

/// File stem of a track: two-digit number and sanitized title
pub fn track_file_name(number: u32, title: &str) -> String {
    format!("{:02} {}", number, sanitize(title))
        .trim_end()
        .to_string()
}

/// Relative album directory: `<artist>/<album>`
pub fn album_dir(artist: &str, album: &str) -> PathBuf {
    let album = if album.is_empty() { NO_ALBUM } else { album };
    [sanitize(artist), sanitize(album)].iter().collect()
}
