//! Cue sheet parsing
//!
//! Reads the subset of the cue sheet format that CD rippers write for a
//! single-image rip: album and track titles and performers, the `REM`
//! genre/date/offset extensions, `FILE` references and track indexes.
//!
//! Times are in CD frames, 75 per second.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// CD frames per second
pub const FRAMES_PER_SECOND: u32 = 75;

/// Album-level information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlbumInfo {
    pub title: String,
    pub performer: String,
    pub genre: String,
    pub date: String,
}

/// Track type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    Audio,
    Data,
}

/// One `TRACK` entry
#[derive(Debug, Clone, PartialEq)]
pub struct CueTrack {
    /// Number as written in the cue sheet
    pub number: u32,
    pub mode: TrackMode,
    /// File named by the last `FILE` command before this track
    pub file: String,
    pub title: String,
    /// Track performer, when it differs from the album's
    pub performer: Option<String>,
    /// INDEX 00: start of the pregap
    pub pregap: Option<u32>,
    /// INDEX 01: start of the track proper
    pub start: Option<u32>,
}

/// A parsed cue sheet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueSheet {
    pub album: AlbumInfo,
    /// `REM OFFSET`: added to track numbers, for multi-disc sets
    pub offset: u32,
    pub tracks: Vec<CueTrack>,
}

impl CueSheet {
    /// Read and parse a cue sheet file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read: {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("Failed to parse: {}", path.display()))
    }

    /// Parse raw cue sheet bytes: UTF-8 when valid, ISO-8859-1 otherwise
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::parse(text),
            Err(_) => Self::parse(&latin1_to_string(bytes)),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut sheet = CueSheet::default();
        let mut file: Option<String> = None;

        for (i, line) in text.lines().enumerate() {
            let lineno = i + 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (command, rest) = split_word(line);
            match command.to_ascii_uppercase().as_str() {
                "REM" => {
                    let (key, value) = split_word(rest);
                    match key.to_ascii_uppercase().as_str() {
                        "GENRE" => sheet.album.genre = unquote(value),
                        "DATE" => sheet.album.date = unquote(value),
                        "OFFSET" => {
                            sheet.offset = parse_c_ulong(&unquote(value)).with_context(|| {
                                format!("line {}: bad offset value: {}", lineno, value)
                            })?;
                        }
                        _ => {}
                    }
                }
                "TITLE" => match sheet.tracks.last_mut() {
                    Some(track) => track.title = unquote(rest),
                    None => sheet.album.title = unquote(rest),
                },
                "PERFORMER" => {
                    let performer = unquote(rest);
                    match sheet.tracks.last_mut() {
                        Some(track) => {
                            if performer != sheet.album.performer {
                                track.performer = Some(performer);
                            }
                        }
                        None => sheet.album.performer = performer,
                    }
                }
                "FILE" => {
                    let (name, kind) = split_value(rest);
                    if name.is_empty() || kind.trim().is_empty() {
                        anyhow::bail!("line {}: FILE needs a name and a type", lineno);
                    }
                    file = Some(name);
                }
                "TRACK" => {
                    let (number, mode) = split_word(rest);
                    let number: u32 = number
                        .parse()
                        .map_err(|_| anyhow::anyhow!("line {}: bad track number: {}", lineno, number))?;
                    let file = file
                        .clone()
                        .ok_or_else(|| anyhow::anyhow!("line {}: TRACK before any FILE", lineno))?;
                    let mode = if mode.trim().eq_ignore_ascii_case("AUDIO") {
                        TrackMode::Audio
                    } else {
                        TrackMode::Data
                    };
                    sheet.tracks.push(CueTrack {
                        number,
                        mode,
                        file,
                        title: String::new(),
                        performer: None,
                        pregap: None,
                        start: None,
                    });
                }
                "INDEX" => {
                    let (index, time) = split_word(rest);
                    let index: u32 = index
                        .parse()
                        .map_err(|_| anyhow::anyhow!("line {}: bad index number: {}", lineno, index))?;
                    let frames = parse_frames(time.trim())
                        .with_context(|| format!("line {}: bad index time", lineno))?;
                    let track = sheet
                        .tracks
                        .last_mut()
                        .ok_or_else(|| anyhow::anyhow!("line {}: INDEX outside of a TRACK", lineno))?;
                    match index {
                        0 => track.pregap = Some(frames),
                        1 => track.start = Some(frames),
                        _ => {}
                    }
                }
                // Pregap and postgap silence is not part of the image
                "PREGAP" | "POSTGAP" => {
                    parse_frames(rest.trim())
                        .with_context(|| format!("line {}: bad gap length", lineno))?;
                }
                "CATALOG" | "ISRC" | "FLAGS" | "SONGWRITER" | "CDTEXTFILE" => {}
                _ => anyhow::bail!("line {}: unknown command: {}", lineno, command),
            }
        }

        Ok(sheet)
    }

    /// The audio tracks of the sheet.
    ///
    /// A data track at the end (enhanced CDs) is dropped; data tracks
    /// between audio tracks are rejected.
    pub fn audio_tracks(&self) -> Result<&[CueTrack]> {
        let mut tracks = &self.tracks[..];
        if let Some((last, init)) = tracks.split_last() {
            if last.mode == TrackMode::Data {
                tracks = init;
            }
        }

        if let Some(track) = tracks.iter().find(|t| t.mode != TrackMode::Audio) {
            anyhow::bail!("track {} is a data track between audio tracks", track.number);
        }
        if let Some(track) = tracks.iter().find(|t| t.start.is_none()) {
            anyhow::bail!("track {} has no INDEX 01", track.number);
        }
        if tracks.is_empty() {
            anyhow::bail!("no audio tracks");
        }

        Ok(tracks)
    }

    /// Performer of a track, falling back to the album performer
    pub fn track_performer<'a>(&'a self, track: &'a CueTrack) -> &'a str {
        track.performer.as_deref().unwrap_or(&self.album.performer)
    }
}

/// Split off the first whitespace-delimited word
fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Split a possibly quoted value from the words after it
fn split_value(s: &str) -> (String, &str) {
    let s = s.trim();
    if s.starts_with('"') || s.starts_with('\'') {
        let end = quoted_len(s);
        (unquote(&s[..end]), s[end..].trim_start())
    } else {
        match s.rsplit_once(char::is_whitespace) {
            Some((name, kind)) => (name.trim_end().to_string(), kind),
            None => (s.to_string(), ""),
        }
    }
}

/// Byte length of the quoted string at the start of `s`, closing quote included
fn quoted_len(s: &str) -> usize {
    let mut chars = s.char_indices();
    let quote = match chars.next() {
        Some((_, c)) => c,
        None => return 0,
    };
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == quote {
            return i + c.len_utf8();
        }
    }
    s.len()
}

/// Decode a cue string value.
///
/// If it starts with `"` or `'`, the value ends at the first unescaped
/// matching quote. A backslash copies the next character literally; a
/// trailing backslash is kept.
pub fn unquote(s: &str) -> String {
    let s = s.trim();
    let mut chars = s.chars().peekable();
    let quote = match chars.peek() {
        Some(&c) if c == '"' || c == '\'' => {
            chars.next();
            Some(c)
        }
        _ => None,
    };

    let mut out = String::with_capacity(s.len());
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next().unwrap_or('\\'));
        } else if Some(c) == quote {
            break;
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse `mm:ss:ff` into frames
pub fn parse_frames(s: &str) -> Result<u32> {
    let mut parts = s.split(':');
    let mut field = |name: &str| -> Result<u32> {
        let part = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing {} in time: {}", name, s))?;
        part.parse()
            .map_err(|_| anyhow::anyhow!("invalid {} in time: {}", name, s))
    };
    let minutes = field("minutes")?;
    let seconds = field("seconds")?;
    let frames = field("frames")?;
    if parts.next().is_some() || seconds >= 60 || frames >= FRAMES_PER_SECOND {
        anyhow::bail!("invalid time: {}", s);
    }
    minutes
        .checked_mul(60)
        .and_then(|m| m.checked_add(seconds))
        .and_then(|t| t.checked_mul(FRAMES_PER_SECOND))
        .and_then(|t| t.checked_add(frames))
        .ok_or_else(|| anyhow::anyhow!("time out of range: {}", s))
}

/// Render frames as `MM:SS:FF`
pub fn format_frames(frames: u32) -> String {
    let seconds = frames / FRAMES_PER_SECOND;
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 60,
        seconds % 60,
        frames % FRAMES_PER_SECOND
    )
}

/// Unsigned integer with C prefix rules: `0x` hex, leading `0` octal
fn parse_c_ulong(s: &str) -> Result<u32> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        u32::from_str_radix(&s[1..], 8)
    } else {
        s.parse()
    };
    parsed.map_err(|_| anyhow::anyhow!("not a number: {}", s))
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
