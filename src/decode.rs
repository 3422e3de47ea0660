//! PCM decoding
//!
//! Wraps a symphonia format reader and decoder and hands out planar integer
//! samples at the source bit depth. Mono and stereo sources only.

use anyhow::{Context, Result};
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Bit depth assumed when the codec does not report one
const DEFAULT_BITS: u32 = 16;

/// Extensions tried when the file named in a cue sheet is missing
const FALLBACK_EXTENSIONS: [&str; 2] = ["wav", "flac"];

/// Stream parameters of an opened source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub rate: u32,
    pub channels: usize,
    pub bits_per_sample: u32,
    /// Length in frames, when the container knows it
    pub total_frames: Option<u64>,
}

/// One decoded packet: one `Vec` of samples per channel
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBlock {
    bits_per_sample: u32,
    planes: Vec<Vec<i32>>,
}

impl PcmBlock {
    pub fn new(bits_per_sample: u32, planes: Vec<Vec<i32>>) -> Self {
        Self {
            bits_per_sample,
            planes,
        }
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.planes.first().map_or(0, Vec::len)
    }

    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    pub fn planes(&self) -> &[Vec<i32>] {
        &self.planes
    }

    /// Samples of `range`, rescaled to the 16-bit range used by the analyzer
    pub fn analysis_channels(&self, range: Range<usize>) -> Vec<Vec<f64>> {
        let scale = 2f64.powi(16 - self.bits_per_sample as i32);
        self.planes
            .iter()
            .map(|plane| plane[range.clone()].iter().map(|&s| s as f64 * scale).collect())
            .collect()
    }
}

/// A decoded audio file
pub struct PcmSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: PcmSpec,
    sample_buf: Option<SampleBuffer<i32>>,
    sample_buf_frames: u64,
}

impl PcmSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .with_context(|| format!("Failed to probe format: {}", path.display()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow::anyhow!("No audio track found: {}", path.display()))?;

        let params = &track.codec_params;
        let rate = params
            .sample_rate
            .ok_or_else(|| anyhow::anyhow!("Unknown sample rate: {}", path.display()))?;
        let channels = params.channels.map(|c| c.count()).unwrap_or(2);
        if channels == 0 || channels > 2 {
            anyhow::bail!(
                "{}: {} channels, only mono and stereo are supported",
                path.display(),
                channels
            );
        }
        let bits_per_sample = params.bits_per_sample.unwrap_or(DEFAULT_BITS);
        if bits_per_sample == 0 || bits_per_sample > 32 {
            anyhow::bail!("{}: unsupported bit depth {}", path.display(), bits_per_sample);
        }

        let spec = PcmSpec {
            rate,
            channels,
            bits_per_sample,
            total_frames: params.n_frames,
        };

        let track_id = track.id;
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .with_context(|| format!("Failed to create decoder: {}", path.display()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            spec,
            sample_buf: None,
            sample_buf_frames: 0,
        })
    }

    pub fn spec(&self) -> &PcmSpec {
        &self.spec
    }

    /// Decode the next packet; `None` at end of stream
    pub fn next_block(&mut self) -> Result<Option<PcmBlock>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            let channels = decoded.spec().channels.count();

            let capacity = decoded.capacity() as u64;
            if self.sample_buf_frames < capacity {
                self.sample_buf = None;
                self.sample_buf_frames = capacity;
            }
            let signal_spec = *decoded.spec();
            let buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::new(capacity, signal_spec));
            buf.copy_planar_ref(decoded);

            // Full-scale i32 back to the source bit depth
            let shift = 32 - self.spec.bits_per_sample;
            let planes = buf
                .samples()
                .chunks_exact(frames)
                .take(channels)
                .map(|plane| plane.iter().map(|&s| s >> shift).collect())
                .collect();

            return Ok(Some(PcmBlock::new(self.spec.bits_per_sample, planes)));
        }
    }
}

/// Locate the audio file named by a cue sheet.
///
/// Rippers often re-encode the image after writing the cue sheet, so when
/// `path` does not exist the same name with a `.wav` or `.flac` extension
/// is tried.
pub fn find_source(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    let current = path.extension().and_then(|e| e.to_str());
    for ext in FALLBACK_EXTENSIONS {
        if current.is_some_and(|c| c.eq_ignore_ascii_case(ext)) {
            continue;
        }
        let candidate = path.with_extension(ext);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    anyhow::bail!("Audio file not found: {}", path.display())
}
