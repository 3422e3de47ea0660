//! Splitting a cue sheet image into tracks
//!
//! Each audio file referenced by the cue sheet is decoded once, front to
//! back. Every track span is fed to a shared [`Analyzer`], which is popped
//! at each track boundary, and optionally written to its own WAV file.

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::BufWriter;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::cue::{format_frames, CueSheet, FRAMES_PER_SECOND};
use crate::decode::{find_source, PcmBlock, PcmSource, PcmSpec};
use crate::gain::{Sample, SampleAccum};
use crate::replaygain::Analyzer;
use crate::sanitize::{album_dir, track_file_name};
use crate::tags::ReplayGainTags;

/// Name of the per-album file holding the ReplayGain tags of split tracks
pub const SIDECAR_NAME: &str = "replaygain.json";

/// What to do with a cue sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOptions {
    /// Parent of the `<artist>/<album>` output directories
    pub out_dir: PathBuf,
    /// Write track files; when false, only analyze
    pub write_tracks: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            write_tracks: true,
        }
    }
}

/// Where one output track lives in the source files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackPlan {
    /// Output track number (cue offset included)
    pub number: u32,
    pub title: String,
    pub artist: String,
    /// File name as written in the cue sheet
    pub file: String,
    /// First CD frame of the track
    pub begin: u32,
    /// CD frame after the track; `None` runs to the end of the file
    pub end: Option<u32>,
}

impl TrackPlan {
    /// First sample and sample count of the track at `rate`
    pub fn sample_span(&self, rate: u32) -> (u64, Option<u64>) {
        let rate = rate as u64;
        let fps = FRAMES_PER_SECOND as u64;
        let begin = self.begin as u64 * rate / fps;
        let len = self
            .end
            .map(|end| ((end - self.begin) as u64 * rate + fps / 2) / fps);
        (begin, len)
    }
}

/// Work out the track spans of a cue sheet.
///
/// A track starts at its INDEX 01 and runs to the next track's INDEX 01, so
/// pregaps belong to the preceding track. The first track also takes the
/// lead-in from its INDEX 00. The last track in each file runs to the end
/// of the file.
pub fn plan_tracks(cue: &CueSheet) -> Result<Vec<TrackPlan>> {
    let tracks = cue.audio_tracks()?;
    let mut plans = Vec::with_capacity(tracks.len());

    for (i, track) in tracks.iter().enumerate() {
        let start = track
            .start
            .ok_or_else(|| anyhow::anyhow!("track {} has no INDEX 01", track.number))?;
        let begin = match (i, track.pregap) {
            (0, Some(pregap)) => pregap.min(start),
            _ => start,
        };
        let end = tracks
            .get(i + 1)
            .filter(|next| next.file == track.file)
            .and_then(|next| next.start);

        if let Some(end) = end {
            if end < begin {
                anyhow::bail!(
                    "track {} ends at {} before it begins at {}",
                    track.number,
                    format_frames(end),
                    format_frames(begin)
                );
            }
        }

        let number = cue
            .offset
            .checked_add(i as u32 + 1)
            .ok_or_else(|| anyhow::anyhow!("bad offset value: {}", cue.offset))?;

        plans.push(TrackPlan {
            number,
            title: track.title.clone(),
            artist: cue.track_performer(track).to_string(),
            file: track.file.clone(),
            begin,
            end,
        });
    }

    Ok(plans)
}

/// Result for one track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackReport {
    pub number: u32,
    pub title: String,
    pub artist: String,
    /// Start in the source file, `MM:SS:FF`
    pub begin: String,
    /// Length in samples per channel
    pub samples: u64,
    /// Written track file, if any
    pub path: Option<PathBuf>,
    /// `None` when the track is too short to measure
    pub gain: Option<f64>,
    pub peak: f64,
}

/// Result for a whole cue sheet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlbumReport {
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub date: String,
    /// Decoded audio files, in order
    pub sources: Vec<PathBuf>,
    pub tracks: Vec<TrackReport>,
    pub album_gain: Option<f64>,
    pub album_peak: f64,
}

impl AlbumReport {
    pub fn tags(&self, track: &TrackReport) -> ReplayGainTags {
        ReplayGainTags {
            track_gain: track.gain,
            track_peak: track.peak,
            album_gain: self.album_gain,
            album_peak: self.album_peak,
        }
    }
}

#[derive(Serialize)]
struct SidecarEntry<'a> {
    file: String,
    title: &'a str,
    tags: BTreeMap<&'static str, String>,
}

/// Decoder with a one-block window onto the stream
struct BlockStream<'a> {
    source: PcmSource,
    progress: &'a ProgressBar,
    block: Option<PcmBlock>,
    /// Sample index of the first sample of `block`
    block_start: u64,
    /// Sample index after the last one handed out
    position: u64,
    eof: bool,
}

impl<'a> BlockStream<'a> {
    fn new(source: PcmSource, progress: &'a ProgressBar) -> Self {
        Self {
            source,
            progress,
            block: None,
            block_start: 0,
            position: 0,
            eof: false,
        }
    }

    fn advance(&mut self) -> Result<()> {
        if let Some(block) = self.block.take() {
            self.block_start += block.frames() as u64;
        }
        if !self.eof {
            self.block = self.source.next_block()?;
            match &self.block {
                Some(block) => self.progress.inc(block.frames() as u64),
                None => self.eof = true,
            }
        }
        Ok(())
    }

    /// Hand every block slice of `begin..end` to `f`; returns the number of
    /// samples delivered. Samples already handed out are skipped, and a
    /// span cut short by the end of the stream is delivered up to there.
    fn read_span<F>(&mut self, begin: u64, end: Option<u64>, mut f: F) -> Result<u64>
    where
        F: FnMut(&PcmBlock, Range<usize>) -> Result<()>,
    {
        if self.block.is_none() {
            self.advance()?;
        }

        let mut delivered = 0;
        while let Some(block) = self.block.as_ref() {
            let block_end = self.block_start + block.frames() as u64;
            let start = begin.max(self.block_start).max(self.position);
            let stop = end.map_or(block_end, |e| e.min(block_end));
            if start < stop {
                let offset = self.block_start;
                f(block, (start - offset) as usize..(stop - offset) as usize)?;
                delivered += stop - start;
                self.position = stop;
            }
            if end.is_some_and(|e| e <= block_end) {
                return Ok(delivered);
            }
            self.advance()?;
        }

        if begin >= self.block_start {
            anyhow::bail!("starts beyond the end of the file");
        }
        Ok(delivered)
    }
}

type TrackWriter = hound::WavWriter<BufWriter<fs::File>>;

fn create_writer(path: &Path, spec: &PcmSpec) -> Result<TrackWriter> {
    let wav_spec = hound::WavSpec {
        channels: spec.channels as u16,
        sample_rate: spec.rate,
        bits_per_sample: spec.bits_per_sample as u16,
        sample_format: hound::SampleFormat::Int,
    };
    hound::WavWriter::create(path, wav_spec)
        .with_context(|| format!("Failed to create: {}", path.display()))
}

/// Progress notifications from [`process_cue_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitEvent<'a> {
    /// A source file was opened for decoding
    SourceOpened(&'a Path),
    /// A track is about to be decoded; `path` is its output file when writing
    TrackStarted { number: u32, path: Option<&'a Path> },
}

/// Split and analyze all tracks of one cue sheet.
///
/// `progress` advances by decoded samples; its length is set per source
/// file when the container reports one.
pub fn process_cue(
    cue_path: &Path,
    options: &SplitOptions,
    progress: &ProgressBar,
) -> Result<AlbumReport> {
    process_cue_with(cue_path, options, progress, |_| {})
}

/// [`process_cue`], reporting each opened source and started track to
/// `on_event`
pub fn process_cue_with<F>(
    cue_path: &Path,
    options: &SplitOptions,
    progress: &ProgressBar,
    mut on_event: F,
) -> Result<AlbumReport>
where
    F: FnMut(SplitEvent<'_>),
{
    let cue = CueSheet::load(cue_path)?;
    let plans = plan_tracks(&cue).with_context(|| format!("{}", cue_path.display()))?;
    let base_dir = cue_path.parent().unwrap_or_else(|| Path::new(""));

    let out_dir = options
        .out_dir
        .join(album_dir(&cue.album.performer, &cue.album.title));
    if options.write_tracks {
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create directory: {}", out_dir.display()))?;
    }

    let mut current: Option<Analyzer> = None;
    let mut album = SampleAccum::new();
    let mut sources = Vec::new();
    let mut tracks = Vec::with_capacity(plans.len());

    let mut first = 0;
    while first < plans.len() {
        let file = &plans[first].file;
        let count = plans[first..].iter().take_while(|p| &p.file == file).count();
        let group = &plans[first..first + count];
        first += count;

        let source_path = find_source(&base_dir.join(file))?;
        let source = PcmSource::open(&source_path)?;
        let spec = *source.spec();
        on_event(SplitEvent::SourceOpened(&source_path));

        // Filter memory carries over between files of the same rate
        let analyzer = match current.take() {
            Some(a) if a.sample_rate().hz() == spec.rate => current.insert(a),
            _ => current.insert(Analyzer::new(spec.rate).with_context(|| {
                format!("Cannot analyze {}", source_path.display())
            })?),
        };

        progress.reset();
        if let Some(total) = spec.total_frames {
            progress.set_length(total);
        }
        progress.set_message(
            source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );

        let mut stream = BlockStream::new(source, progress);
        for plan in group {
            let (begin, len) = plan.sample_span(spec.rate);

            let path = options.write_tracks.then(|| {
                out_dir.join(format!("{}.wav", track_file_name(plan.number, &plan.title)))
            });
            on_event(SplitEvent::TrackStarted {
                number: plan.number,
                path: path.as_deref(),
            });
            let mut writer = match &path {
                Some(path) => Some(create_writer(path, &spec)?),
                None => None,
            };

            let result = stream
                .read_span(begin, len.map(|n| begin + n), |block, range| {
                    let channels = block.analysis_channels(range.clone());
                    let right = channels.get(1).map_or(&[][..], |c| &c[..]);
                    analyzer.analyze(&channels[0], right, channels.len())?;

                    if let Some(writer) = writer.as_mut() {
                        for i in range {
                            for plane in block.planes() {
                                writer.write_sample(plane[i])?;
                            }
                        }
                    }
                    Ok(())
                })
                .with_context(|| {
                    format!("Track {} in {}", plan.number, source_path.display())
                })
                .and_then(|samples| {
                    if let (Some(writer), Some(path)) = (writer.take(), &path) {
                        writer
                            .finalize()
                            .with_context(|| format!("Failed to write: {}", path.display()))?;
                    }
                    Ok(samples)
                });

            let samples = match result {
                Ok(samples) => samples,
                Err(e) => {
                    // No half-written tracks
                    drop(writer);
                    if let Some(path) = &path {
                        let _ = fs::remove_file(path);
                    }
                    return Err(e);
                }
            };

            let sample: Sample = analyzer.pop();
            album += &sample;
            tracks.push(TrackReport {
                number: plan.number,
                title: plan.title.clone(),
                artist: plan.artist.clone(),
                begin: format_frames(plan.begin),
                samples,
                path,
                gain: sample.adjustment().ok(),
                peak: sample.peak(),
            });
        }

        sources.push(source_path);
    }

    let report = AlbumReport {
        artist: cue.album.performer.clone(),
        album: cue.album.title.clone(),
        genre: cue.album.genre.clone(),
        date: cue.album.date.clone(),
        sources,
        tracks,
        album_gain: album.adjustment().ok(),
        album_peak: album.peak(),
    };

    if options.write_tracks {
        write_sidecar(&out_dir.join(SIDECAR_NAME), &report)?;
    }

    Ok(report)
}

/// Store the ReplayGain tags of every written track as JSON
fn write_sidecar(path: &Path, report: &AlbumReport) -> Result<()> {
    let entries: Vec<SidecarEntry> = report
        .tracks
        .iter()
        .filter_map(|track| {
            let file = track.path.as_ref()?.file_name()?.to_string_lossy().into_owned();
            Some(SidecarEntry {
                file,
                title: &track.title,
                tags: report.tags(track).comments().into_iter().collect(),
            })
        })
        .collect();

    let json = serde_json::to_string_pretty(&entries)?;
    fs::write(path, json).with_context(|| format!("Failed to write: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r#"REM OFFSET 10
PERFORMER "Band"
TITLE "Record"
FILE "side a.wav" WAVE
  TRACK 01 AUDIO
    TITLE "One"
    INDEX 00 00:00:00
    INDEX 01 00:00:32
  TRACK 02 AUDIO
    TITLE "Two"
    PERFORMER "Guest"
    INDEX 00 03:00:00
    INDEX 01 03:02:00
FILE "side b.wav" WAVE
  TRACK 03 AUDIO
    TITLE "Three"
    INDEX 01 00:00:00
  TRACK 04 MODE1/2352
    INDEX 01 20:00:00
"#;

    #[test]
    fn test_plan_tracks() {
        let cue = CueSheet::parse(SHEET).unwrap();
        let plans = plan_tracks(&cue).unwrap();
        assert_eq!(plans.len(), 3);

        assert_eq!(plans[0].number, 11);
        assert_eq!(plans[0].begin, 0);
        assert_eq!(plans[0].end, Some((3 * 60 + 2) * 75));
        assert_eq!(plans[0].artist, "Band");

        assert_eq!(plans[1].number, 12);
        assert_eq!(plans[1].artist, "Guest");
        assert_eq!(plans[1].begin, (3 * 60 + 2) * 75);
        assert_eq!(plans[1].end, None);

        assert_eq!(plans[2].file, "side b.wav");
        assert_eq!(plans[2].begin, 0);
        assert_eq!(plans[2].end, None);
    }

    #[test]
    fn test_plan_rejects_backwards_index() {
        let cue = CueSheet::parse(
            "FILE a.wav WAVE\nTRACK 01 AUDIO\nINDEX 01 01:00:00\nTRACK 02 AUDIO\nINDEX 01 00:30:00\n",
        )
        .unwrap();
        assert!(plan_tracks(&cue).is_err());
    }

    #[test]
    fn test_plan_rejects_offset_overflow() {
        let sheet = "REM OFFSET 0xFFFFFFFF\nFILE a.wav WAVE\nTRACK 01 AUDIO\nINDEX 01 00:00:00\n";
        let cue = CueSheet::parse(sheet).unwrap();
        assert_eq!(cue.offset, u32::MAX);
        let err = plan_tracks(&cue).unwrap_err();
        assert!(err.to_string().contains("bad offset value"));

        let sheet = "REM OFFSET 0xFFFFFFFE\nFILE a.wav WAVE\nTRACK 01 AUDIO\nINDEX 01 00:00:00\n";
        let plans = plan_tracks(&CueSheet::parse(sheet).unwrap()).unwrap();
        assert_eq!(plans[0].number, u32::MAX);
    }

    #[test]
    fn test_sample_span() {
        let plan = TrackPlan {
            number: 1,
            title: String::new(),
            artist: String::new(),
            file: String::new(),
            begin: 75,
            end: Some(75 + 2),
        };
        assert_eq!(plan.sample_span(44100), (44100, Some(1176)));
        // 2 frames at 32 kHz are 853.33 samples
        assert_eq!(plan.sample_span(32000), (32000, Some(853)));
        // 1 frame at 22050 Hz is exactly 294 samples
        assert_eq!(plan.sample_span(22050), (22050, Some(588)));

        let plan = TrackPlan {
            begin: 1,
            end: Some(2),
            ..plan
        };
        // 1 frame at 48 kHz from a fractional start: 640 samples
        assert_eq!(plan.sample_span(48000), (640, Some(640)));
        // 1 frame at 11025 Hz is 147 samples
        assert_eq!(plan.sample_span(11025), (147, Some(147)));

        let plan = TrackPlan { end: None, ..plan };
        assert_eq!(plan.sample_span(44100), (588, None));
    }

    #[test]
    fn test_sample_span_rounds_to_nearest() {
        let plan = TrackPlan {
            number: 1,
            title: String::new(),
            artist: String::new(),
            file: String::new(),
            begin: 0,
            end: Some(1),
        };
        // 8000 / 75 = 106.67
        assert_eq!(plan.sample_span(8000), (0, Some(107)));
        // 16000 / 75 = 213.33
        assert_eq!(plan.sample_span(16000), (0, Some(213)));
    }

    #[test]
    fn test_report_tags() {
        let track = TrackReport {
            number: 1,
            title: "x".into(),
            artist: "y".into(),
            begin: "00:00:00".into(),
            samples: 10,
            path: None,
            gain: None,
            peak: 0.25,
        };
        let album = AlbumReport {
            artist: String::new(),
            album: String::new(),
            genre: String::new(),
            date: String::new(),
            sources: Vec::new(),
            tracks: vec![track.clone()],
            album_gain: Some(-3.0),
            album_peak: 0.5,
        };
        let tags = album.tags(&track);
        assert_eq!(tags.track_gain, None);
        assert_eq!(tags.album_gain, Some(-3.0));
        assert_eq!(tags.track_peak, 0.25);
        assert_eq!(tags.album_peak, 0.5);
    }
}
