//! # cuegain
//!
//! Split CD images along their cue sheets and compute ReplayGain 1.0 values
//! for every track and for the album.
//!
//! The analysis core ([`replaygain`], [`filter`], [`gain`]) works on decoded
//! PCM only and has no I/O. The [`split`] module drives it from cue sheets,
//! decoding images with symphonia and writing tracks with hound (cargo
//! feature `split`, on by default).
//!
//! ## Example
//!
//! ```
//! use cuegain::{Analyzer, SampleAccum};
//!
//! let mut analyzer = Analyzer::new(44100).unwrap();
//! let mut album = SampleAccum::new();
//!
//! // One second of a 1 kHz tone, mono
//! let tone: Vec<f64> = (0..44100)
//!     .map(|i| 10000.0 * (2.0 * std::f64::consts::PI * 1000.0 * i as f64 / 44100.0).sin())
//!     .collect();
//! analyzer.analyze(&tone, &[], 1).unwrap();
//!
//! let track = analyzer.pop();
//! album += &track;
//! println!("track gain: {:+.2} dB", track.adjustment().unwrap());
//! println!("album peak: {:.6}", album.peak());
//! ```

pub mod cue;
pub mod error;
pub mod filter;
pub mod gain;
pub mod replaygain;
pub mod sanitize;
pub mod tags;

#[cfg(feature = "split")]
pub mod decode;
#[cfg(feature = "split")]
pub mod split;

pub use error::GainError;
pub use filter::SampleRate;
pub use gain::{Sample, SampleAccum};
pub use replaygain::Analyzer;
pub use tags::ReplayGainTags;
