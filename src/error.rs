//! Errors raised by the loudness analysis core

use thiserror::Error;

/// Errors returned by the analysis context and the gain estimator.
///
/// A window overflowing its capacity is not represented here: it can only
/// happen through a bug in batch sizing and panics instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainError {
    /// The sample rate has no equal-loudness filter coefficients
    #[error(
        "unsupported sample rate: {0} Hz (supported: 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000)"
    )]
    UnsupportedSampleRate(u32),

    /// Only mono and stereo input is analyzed
    #[error("unsupported channel count: {0} (must be 1 or 2)")]
    BadChannelCount(usize),

    /// The right channel holds fewer samples than the left one
    #[error("channel length mismatch: left has {left} samples, right has {right}")]
    ChannelLengthMismatch { left: usize, right: usize },

    /// The histogram is empty, so there is no loudness to adjust
    #[error("not enough samples to compute a gain adjustment")]
    NotEnoughSamples,
}

pub type Result<T> = std::result::Result<T, GainError>;
