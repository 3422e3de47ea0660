//! Gain estimation from loudness histograms
//!
//! Every finished 50 ms window contributes one count to a histogram bin
//! (loudness in dB at 100 steps per dB). The loudness of a track is the
//! level exceeded by the loudest 5% of its windows, and the recommended
//! gain is its distance from the pink-noise calibration level.
//!
//! Album gain uses the same estimator on the sum of all track histograms,
//! which weights every track by its duration.

use crate::error::{GainError, Result};
use std::fmt;
use std::ops::AddAssign;

/// Histogram resolution
pub const STEPS_PER_DB: usize = 100;

/// Upper end of the histogram range; normal material lands around 70-80 dB
pub const MAX_DB: usize = 120;

/// Number of histogram bins
pub const HISTOGRAM_SIZE: usize = STEPS_PER_DB * MAX_DB;

/// Pink noise reference calibration constant
/// The reference pink noise signal must come out at exactly +6.0 dB.
/// Source: https://replaygain.hydrogenaud.io/calibration.html
pub const PINK_REF: f64 = 64.82;

/// One in RMS_DIVISOR windows is louder than the chosen level (95th percentile)
const RMS_DIVISOR: u64 = 20;

/// Peaks are kept on the 16-bit sample scale and reported relative to it
const PEAK_FULL_SCALE: f64 = 32768.0;

/// Histogram of window loudness values
#[derive(Clone, PartialEq, Eq)]
pub struct LoudnessHistogram {
    data: Vec<u32>,
}

impl LoudnessHistogram {
    pub fn new() -> Self {
        Self {
            data: vec![0; HISTOGRAM_SIZE],
        }
    }

    /// Count one window in `bin`, clamped into the histogram range
    pub fn record(&mut self, bin: usize) {
        self.data[bin.min(HISTOGRAM_SIZE - 1)] += 1;
    }

    pub fn bins(&self) -> &[u32] {
        &self.data
    }

    /// Total number of windows counted
    pub fn total(&self) -> u64 {
        self.data.iter().map(|&x| x as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|&x| x == 0)
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Accumulate another histogram into this one
    pub fn accumulate(&mut self, other: &LoudnessHistogram) {
        for (sum, &count) in self.data.iter_mut().zip(other.data.iter()) {
            *sum += count;
        }
    }

    /// Bin of the 95th percentile window loudness, scanning from the top
    fn percentile_bin(&self) -> Option<usize> {
        let total = self.total();
        if total == 0 {
            return None;
        }

        let mut upper = total.div_ceil(RMS_DIVISOR) as i64;
        for i in (0..HISTOGRAM_SIZE).rev() {
            upper -= self.data[i] as i64;
            if upper <= 0 {
                return Some(i);
            }
        }

        unreachable!("histogram total {} exhausted without reaching the threshold", total)
    }

    /// Recommended gain in dB
    pub fn adjustment(&self) -> Result<f64> {
        let bin = self.percentile_bin().ok_or(GainError::NotEnoughSamples)?;
        Ok(PINK_REF - bin as f64 / STEPS_PER_DB as f64)
    }
}

impl Default for LoudnessHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoudnessHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.data.iter().filter(|&&x| x != 0).count();
        f.debug_struct("LoudnessHistogram")
            .field("windows", &self.total())
            .field("bins_used", &used)
            .finish()
    }
}

/// Result of analyzing one track.
///
/// Produced by [`Analyzer::pop`](crate::replaygain::Analyzer::pop) and never
/// changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    histogram: LoudnessHistogram,
    peak: f64,
}

impl Sample {
    pub(crate) fn new(histogram: LoudnessHistogram, peak: f64) -> Self {
        Self { histogram, peak }
    }

    /// Recommended track gain in dB
    pub fn adjustment(&self) -> Result<f64> {
        self.histogram.adjustment()
    }

    /// Peak relative to 16-bit full scale
    pub fn peak(&self) -> f64 {
        self.peak / PEAK_FULL_SCALE
    }

    /// Peak on the 16-bit sample scale
    pub fn raw_peak(&self) -> f64 {
        self.peak
    }

    pub fn histogram(&self) -> &LoudnessHistogram {
        &self.histogram
    }
}

/// Sum of several samples, used for album gain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleAccum {
    histogram: LoudnessHistogram,
    peak: f64,
}

impl SampleAccum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the sum to zero
    pub fn reset(&mut self) {
        self.histogram.clear();
        self.peak = 0.0;
    }

    /// Merge a track into the sum: bins add up, the peak is the maximum
    pub fn add(&mut self, sample: &Sample) {
        self.histogram.accumulate(&sample.histogram);
        if sample.peak > self.peak {
            self.peak = sample.peak;
        }
    }

    /// Recommended album gain in dB
    pub fn adjustment(&self) -> Result<f64> {
        self.histogram.adjustment()
    }

    /// Album peak relative to 16-bit full scale
    pub fn peak(&self) -> f64 {
        self.peak / PEAK_FULL_SCALE
    }

    pub fn raw_peak(&self) -> f64 {
        self.peak
    }

    pub fn histogram(&self) -> &LoudnessHistogram {
        &self.histogram
    }
}

impl AddAssign<&Sample> for SampleAccum {
    fn add_assign(&mut self, sample: &Sample) {
        self.add(sample);
    }
}

impl<'a> FromIterator<&'a Sample> for SampleAccum {
    fn from_iter<I: IntoIterator<Item = &'a Sample>>(iter: I) -> Self {
        let mut accum = SampleAccum::new();
        for sample in iter {
            accum += sample;
        }
        accum
    }
}
