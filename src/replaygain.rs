//! ReplayGain analysis context
//!
//! This module implements the ReplayGain 1.0 algorithm for measuring the
//! perceived loudness of a stream of PCM samples:
//!
//! 1. Equal-loudness filter (Yule-Walker + Butterworth, see [`crate::filter`])
//! 2. Mean square energy in 50ms windows
//! 3. A histogram of window loudness, evaluated at the 95th percentile
//!
//! Samples are expected on the 16-bit scale (-32768.0 ..= 32767.0) whatever
//! the source bit depth.
//!
//! An [`Analyzer`] is fed blocks of audio with [`Analyzer::analyze`] and
//! emits one [`Sample`] per track with [`Analyzer::pop`]. Popping clears the
//! statistics but keeps the filter memory, so consecutive tracks of one
//! image are filtered as the continuous signal they are.
//!
//! Reference: https://wiki.hydrogenaud.io/index.php?title=ReplayGain_specification

use crate::error::{GainError, Result};
use crate::filter::{FilterBank, SampleRate, ORDER};
use crate::gain::{LoudnessHistogram, Sample, STEPS_PER_DB};

/// Keeps log10 finite on digital silence
const LOG_FLOOR: f64 = 1e-37;

/// Filter state and window energy of one channel
#[derive(Debug, Clone)]
struct ChannelState {
    /// Last ORDER raw input samples
    history: [f64; ORDER],
    /// `history` followed by the samples of the current call
    input: Vec<f64>,
    /// ORDER samples of Yule-Walker output history, then the current window
    step: Vec<f64>,
    /// ORDER samples of Butterworth output history, then the current window
    out: Vec<f64>,
    /// Sum of squared filtered samples in the current window
    sum: f64,
}

impl ChannelState {
    fn new(window: usize) -> Self {
        Self {
            history: [0.0; ORDER],
            input: Vec::new(),
            step: vec![0.0; ORDER + window],
            out: vec![0.0; ORDER + window],
            sum: 0.0,
        }
    }

    /// Stage this call's samples behind the input history
    fn load(&mut self, samples: &[f64]) {
        self.input.clear();
        self.input.extend_from_slice(&self.history);
        self.input.extend_from_slice(samples);
    }

    /// Filter `len` samples starting at call position `pos` into window
    /// slot `filled`, and add their energy to the window sum
    fn filter(&mut self, bank: &FilterBank, pos: usize, filled: usize, len: usize) {
        let at = ORDER + filled;
        bank.apply(&self.input, ORDER + pos, &mut self.step, &mut self.out, at, len);
        self.sum += sum_of_squares(&self.out[at..at + len]);
    }

    /// Move the newest ORDER filter outputs to the front of the window
    /// buffers, ready for the next window
    fn rewind(&mut self, filled: usize) {
        self.step.copy_within(filled..filled + ORDER, 0);
        self.out.copy_within(filled..filled + ORDER, 0);
    }

    /// Remember the tail of this call's input for the next call
    fn keep_history(&mut self) {
        let tail = self.input.len() - ORDER;
        self.history.copy_from_slice(&self.input[tail..]);
    }
}

/// Sum of squares: the remainder modulo 16 first, then blocks of 16
/// summed on their own before being added
fn sum_of_squares(values: &[f64]) -> f64 {
    let (head, body) = values.split_at(values.len() % 16);
    let mut sum = 0.0;
    for &v in head {
        sum += v * v;
    }
    for block in body.chunks_exact(16) {
        sum += block.iter().map(|&v| v * v).sum::<f64>();
    }
    sum
}

/// Streaming ReplayGain analysis context for one sample rate
#[derive(Debug, Clone)]
pub struct Analyzer {
    rate: SampleRate,
    filters: FilterBank,
    /// Samples per window
    window: usize,
    /// Samples accumulated in the current window
    filled: usize,
    left: ChannelState,
    right: ChannelState,
    histogram: LoudnessHistogram,
    peak: f64,
}

impl Analyzer {
    /// Create a context for `sample_rate` Hz
    pub fn new(sample_rate: u32) -> Result<Self> {
        let rate = SampleRate::from_hz(sample_rate)?;
        Ok(Self::with_rate(rate))
    }

    pub fn with_rate(rate: SampleRate) -> Self {
        let window = rate.window_len();
        Self {
            rate,
            filters: FilterBank::new(rate),
            window,
            filled: 0,
            left: ChannelState::new(window),
            right: ChannelState::new(window),
            histogram: LoudnessHistogram::new(),
            peak: 0.0,
        }
    }

    /// Switch to another sample rate. Clears all filter history and
    /// statistics; on error the context is left untouched.
    pub fn reset_frequency(&mut self, sample_rate: u32) -> Result<()> {
        let rate = SampleRate::from_hz(sample_rate)?;
        *self = Self::with_rate(rate);
        Ok(())
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.rate
    }

    /// Samples per 50 ms window
    pub fn window_len(&self) -> usize {
        self.window
    }

    /// Whether nothing has been accumulated since creation or the last pop
    pub fn is_empty(&self) -> bool {
        self.filled == 0 && self.peak == 0.0 && self.histogram.is_empty()
    }

    /// Accumulate a block of samples.
    ///
    /// `left.len()` is the number of samples per channel. With one channel,
    /// `right` is ignored and the left samples are analyzed as both
    /// channels; with two, `right` must be at least as long as `left`.
    /// An empty `left` succeeds without checking anything else.
    pub fn analyze(&mut self, left: &[f64], right: &[f64], channels: usize) -> Result<()> {
        let n = left.len();
        if n == 0 {
            return Ok(());
        }

        let right = match channels {
            1 => left,
            2 => {
                if right.len() < n {
                    return Err(GainError::ChannelLengthMismatch {
                        left: n,
                        right: right.len(),
                    });
                }
                &right[..n]
            }
            _ => return Err(GainError::BadChannelCount(channels)),
        };

        let peak = peak_value(left).max(peak_value(right));
        if self.peak < peak {
            self.peak = peak;
        }

        self.left.load(left);
        self.right.load(right);

        let mut pos = 0;
        while pos < n {
            let mut len = (n - pos).min(self.window - self.filled);
            // The first samples of a call reach back into the history seam
            if pos < ORDER {
                len = len.min(ORDER - pos);
            }

            self.left.filter(&self.filters, pos, self.filled, len);
            self.right.filter(&self.filters, pos, self.filled, len);

            pos += len;
            self.filled += len;

            if self.filled == self.window {
                self.finish_window();
            }
            assert!(
                self.filled <= self.window,
                "window overflow: {} samples in a {} sample window",
                self.filled,
                self.window
            );
        }

        self.left.keep_history();
        self.right.keep_history();

        Ok(())
    }

    /// Fold the completed window into the histogram
    fn finish_window(&mut self) {
        let mean_square = (self.left.sum + self.right.sum) / (self.filled * 2) as f64;
        let val = STEPS_PER_DB as f64 * 10.0 * (mean_square + LOG_FLOOR).log10();
        let bin = if val < 0.0 { 0 } else { val as usize };
        self.histogram.record(bin);

        self.left.sum = 0.0;
        self.right.sum = 0.0;
        self.left.rewind(self.filled);
        self.right.rewind(self.filled);
        self.filled = 0;
    }

    /// Return the statistics gathered since the last pop and start a new
    /// track.
    ///
    /// A partially filled window is discarded. Filter and input history are
    /// kept, so the next track continues the same signal.
    pub fn pop(&mut self) -> Sample {
        let histogram = std::mem::take(&mut self.histogram);
        let sample = Sample::new(histogram, self.peak);

        self.peak = 0.0;
        self.left.sum = 0.0;
        self.right.sum = 0.0;
        self.left.rewind(self.filled);
        self.right.rewind(self.filled);
        self.filled = 0;

        sample
    }
}

/// Largest absolute sample value
fn peak_value(samples: &[f64]) -> f64 {
    samples.iter().fold(0.0, |peak, &s| peak.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gain::{SampleAccum, PINK_REF};

    fn sine(rate: u32, freq: f64, amplitude: f64, len: usize, phase: usize) -> Vec<f64> {
        (phase..phase + len)
            .map(|i| {
                let t = i as f64 / rate as f64;
                amplitude * (2.0 * std::f64::consts::PI * freq * t).sin()
            })
            .collect()
    }

    /// Deterministic white-ish noise from a linear congruential generator
    fn noise(seed: u64, amplitude: f64, len: usize) -> Vec<f64> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
                amplitude * (unit * 2.0 - 1.0)
            })
            .collect()
    }

    #[test]
    fn test_unsupported_rate() {
        assert_eq!(
            Analyzer::new(44101).unwrap_err(),
            GainError::UnsupportedSampleRate(44101)
        );
        assert!(Analyzer::new(96000).is_err());
    }

    #[test]
    fn test_reset_frequency() {
        let mut analyzer = Analyzer::new(44100).unwrap();
        analyzer.analyze(&[100.0; 3000], &[], 1).unwrap();
        assert!(!analyzer.is_empty());

        analyzer.reset_frequency(8000).unwrap();
        assert!(analyzer.is_empty());
        assert_eq!(analyzer.window_len(), 400);
        assert_eq!(analyzer.sample_rate(), SampleRate::Hz8000);

        assert_eq!(
            analyzer.reset_frequency(1234),
            Err(GainError::UnsupportedSampleRate(1234))
        );
        assert_eq!(analyzer.window_len(), 400);
    }

    #[test]
    fn test_bad_channel_count() {
        let mut analyzer = Analyzer::new(48000).unwrap();
        let samples = [1.0; 16];
        assert_eq!(
            analyzer.analyze(&samples, &samples, 0),
            Err(GainError::BadChannelCount(0))
        );
        assert_eq!(
            analyzer.analyze(&samples, &samples, 3),
            Err(GainError::BadChannelCount(3))
        );
        assert_eq!(
            analyzer.analyze(&samples, &samples[..8], 2),
            Err(GainError::ChannelLengthMismatch { left: 16, right: 8 })
        );
        assert!(analyzer.is_empty());
    }

    #[test]
    fn test_empty_block_is_noop() {
        let mut analyzer = Analyzer::new(44100).unwrap();
        analyzer.analyze(&[], &[], 2).unwrap();
        assert!(analyzer.is_empty());

        // Nothing to analyze, so the channel count is not looked at
        assert_eq!(analyzer.analyze(&[], &[], 3), Ok(()));
        assert_eq!(analyzer.analyze(&[], &[1.0], 0), Ok(()));
        assert!(analyzer.is_empty());
    }

    #[test]
    fn test_silence() {
        for rate in SampleRate::ALL {
            let mut analyzer = Analyzer::with_rate(rate);
            let zeros = vec![0.0; rate.window_len() * 10];
            analyzer.analyze(&zeros, &zeros, 2).unwrap();

            let sample = analyzer.pop();
            assert_eq!(sample.raw_peak(), 0.0);
            assert_eq!(sample.histogram().total(), 10);
            assert_eq!(sample.histogram().bins()[0], 10, "rate {:?}", rate);
            assert_eq!(sample.adjustment(), Ok(PINK_REF));
        }
    }

    #[test]
    fn test_window_count() {
        let mut analyzer = Analyzer::new(44100).unwrap();
        let signal = sine(44100, 1000.0, 10000.0, 44100, 0);
        analyzer.analyze(&signal, &signal, 2).unwrap();
        // 44100 / 2205 = 20 full windows
        let sample = analyzer.pop();
        assert_eq!(sample.histogram().total(), 20);
    }

    #[test]
    fn test_partial_window_discarded_on_pop() {
        let mut analyzer = Analyzer::new(8000).unwrap();
        analyzer.analyze(&vec![500.0; 1000], &[], 1).unwrap();
        // 2 full windows of 400, 200 samples pending
        let sample = analyzer.pop();
        assert_eq!(sample.histogram().total(), 2);
        assert_eq!(sample.raw_peak(), 500.0);
    }

    #[test]
    fn test_peak_tracks_both_channels() {
        let mut analyzer = Analyzer::new(22050).unwrap();
        analyzer.analyze(&[1.0, -2.0, 3.0], &[-7.5, 0.0, 2.0], 2).unwrap();
        analyzer.analyze(&[4.0], &[0.5], 2).unwrap();
        assert_eq!(analyzer.pop().raw_peak(), 7.5);
    }

    #[test]
    fn test_pop_twice_is_empty() {
        let mut analyzer = Analyzer::new(48000).unwrap();
        let signal = noise(7, 8000.0, 48000);
        analyzer.analyze(&signal, &[], 1).unwrap();

        let first = analyzer.pop();
        assert!(first.adjustment().is_ok());

        let second = analyzer.pop();
        assert!(second.histogram().is_empty());
        assert_eq!(second.raw_peak(), 0.0);
        assert_eq!(second.adjustment(), Err(GainError::NotEnoughSamples));
    }

    #[test]
    fn test_mono_matches_duplicated_stereo() {
        let signal = noise(42, 12000.0, 30000);

        let mut mono = Analyzer::new(44100).unwrap();
        mono.analyze(&signal, &[], 1).unwrap();
        let mut stereo = Analyzer::new(44100).unwrap();
        stereo.analyze(&signal, &signal, 2).unwrap();

        assert_eq!(mono.pop(), stereo.pop());
    }

    #[test]
    fn test_block_size_does_not_change_result() {
        let signal = sine(32000, 440.0, 9000.0, 40000, 0);

        let mut whole = Analyzer::new(32000).unwrap();
        whole.analyze(&signal, &[], 1).unwrap();
        let expected = whole.pop();
        assert_eq!(expected.histogram().total(), 25);

        for size in [7, 1601] {
            let mut pieces = Analyzer::new(32000).unwrap();
            for chunk in signal.chunks(size) {
                pieces.analyze(chunk, &[], 1).unwrap();
            }
            assert_eq!(pieces.pop(), expected, "chunk size {}", size);
        }
    }

    #[test]
    fn test_known_noise_histogram() {
        // One generator stream drawn alternately for left and right
        let chunks = [3, 7, 1601, 2205, 9, 4000];
        let total: usize = chunks.iter().sum::<usize>() * 10;
        let unit = noise(7, 1.0, 2 * total);
        let left: Vec<f64> = unit.iter().step_by(2).map(|&u| u * 8000.0).collect();
        let right: Vec<f64> = unit.iter().skip(1).step_by(2).map(|&u| u * 3000.0).collect();

        let mut analyzer = Analyzer::new(44100).unwrap();
        let mut pos = 0;
        for call in 0..60 {
            let n = chunks[call % chunks.len()];
            analyzer
                .analyze(&left[pos..pos + n], &right[pos..pos + n], 2)
                .unwrap();
            pos += n;
        }
        let sample = analyzer.pop();

        const BINS: [(usize, u32); 28] = [
            (6108, 1), (6133, 1), (6139, 2), (6143, 1), (6146, 1), (6152, 1), (6153, 1),
            (6154, 1), (6156, 1), (6157, 1), (6159, 1), (6161, 2), (6163, 1), (6164, 1),
            (6166, 1), (6167, 2), (6168, 2), (6169, 1), (6171, 1), (6172, 2), (6174, 1),
            (6175, 2), (6177, 1), (6182, 2), (6183, 1), (6194, 1), (6201, 1), (6205, 1),
        ];
        let used: Vec<(usize, u32)> = sample
            .histogram()
            .bins()
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count != 0)
            .map(|(bin, &count)| (bin, count))
            .collect();
        assert_eq!(used, BINS);
        assert_eq!(sample.histogram().total(), 35);
        assert_eq!(sample.raw_peak(), 7999.915094054085);

        let gain = sample.adjustment().unwrap();
        assert!((gain - 2.81).abs() < 1e-9, "gain was {}", gain);
    }

    #[test]
    fn test_loud_signal_needs_less_gain() {
        let quiet = sine(44100, 1000.0, 1000.0, 44100, 0);
        let loud = sine(44100, 1000.0, 16000.0, 44100, 0);

        let mut analyzer = Analyzer::new(44100).unwrap();
        analyzer.analyze(&quiet, &quiet, 2).unwrap();
        let quiet_gain = analyzer.pop().adjustment().unwrap();

        let mut analyzer = Analyzer::new(44100).unwrap();
        analyzer.analyze(&loud, &loud, 2).unwrap();
        let loud_gain = analyzer.pop().adjustment().unwrap();

        // 16x amplitude is about 24 dB louder
        let diff = quiet_gain - loud_gain;
        assert!((diff - 24.08).abs() < 0.1, "difference was {}", diff);
    }

    #[test]
    fn test_pop_keeps_filter_memory() {
        // A constant signal only produces a transient when it starts. After
        // one second the high-pass stage has settled, and a pop must not
        // bring the transient back.
        let dc = vec![10000.0; 44100];
        let mut analyzer = Analyzer::new(44100).unwrap();
        analyzer.analyze(&dc, &dc, 2).unwrap();
        let first = analyzer.pop();
        assert!(first.adjustment().unwrap() < PINK_REF);

        analyzer.analyze(&dc, &dc, 2).unwrap();
        let second = analyzer.pop();
        assert_eq!(second.histogram().bins()[0], 20);
        assert_eq!(second.adjustment(), Ok(PINK_REF));

        // A fresh context sees the transient again
        let mut fresh = Analyzer::new(44100).unwrap();
        fresh.analyze(&dc, &dc, 2).unwrap();
        assert_eq!(fresh.pop(), first);
    }

    fn split_and_merge(x: &[f64], y: &[f64]) -> (Sample, SampleAccum) {
        let mut single = Analyzer::new(44100).unwrap();
        single.analyze(x, x, 2).unwrap();
        single.analyze(y, y, 2).unwrap();
        let joined = single.pop();

        let mut tracks = Analyzer::new(44100).unwrap();
        tracks.analyze(x, x, 2).unwrap();
        let a = tracks.pop();
        tracks.analyze(y, y, 2).unwrap();
        let b = tracks.pop();

        let mut album = SampleAccum::new();
        album += &a;
        album += &b;
        (joined, album)
    }

    #[test]
    fn test_window_aligned_tracks_merge_exactly() {
        // 40 and 60 whole windows
        let x = noise(1, 6000.0, 44100 * 2);
        let y = sine(44100, 300.0, 4000.0, 44100 * 3, 0);

        let (joined, album) = split_and_merge(&x, &y);
        assert_eq!(joined.histogram(), album.histogram());
        assert_eq!(joined.raw_peak(), album.raw_peak());
    }

    #[test]
    fn test_split_tracks_merge_like_one_stream() {
        // The first track ends 1000 samples into a window
        let x = noise(1, 6000.0, 44100 * 2 + 1000);
        let y = sine(44100, 300.0, 4000.0, 44100 * 3, 0);

        let (joined, album) = split_and_merge(&x, &y);

        let total = joined.histogram().total() as i64;
        assert!((total - album.histogram().total() as i64).abs() <= 1);
        let differing: u64 = joined
            .histogram()
            .bins()
            .iter()
            .zip(album.histogram().bins())
            .map(|(&j, &m)| (j as i64 - m as i64).unsigned_abs())
            .sum();
        assert!(differing <= 2, "{} counts differ", differing);
        assert_eq!(joined.adjustment(), album.adjustment());
        assert_eq!(album.raw_peak(), joined.raw_peak());
    }

    #[test]
    fn test_sum_of_squares_grouping() {
        let values: Vec<f64> = (1..=37).map(|i| i as f64).collect();
        let expected: f64 = values.iter().map(|v| v * v).sum();
        assert_eq!(sum_of_squares(&values), expected);
        assert_eq!(sum_of_squares(&[]), 0.0);
    }
}
