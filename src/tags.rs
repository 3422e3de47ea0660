//! ReplayGain tag values
//!
//! Formats the four numbers produced by the analysis as the
//! `REPLAYGAIN_*` Vorbis comment fields used by FLAC and Ogg players.

use serde::Serialize;

/// ReplayGain reference level in dB SPL (ReplayGain 1.0)
pub const REFERENCE_LOUDNESS_DB: f64 = 89.0;

pub const ALBUM_GAIN: &str = "REPLAYGAIN_ALBUM_GAIN";
pub const ALBUM_PEAK: &str = "REPLAYGAIN_ALBUM_PEAK";
pub const REFERENCE_LOUDNESS: &str = "REPLAYGAIN_REFERENCE_LOUDNESS";
pub const TRACK_GAIN: &str = "REPLAYGAIN_TRACK_GAIN";
pub const TRACK_PEAK: &str = "REPLAYGAIN_TRACK_PEAK";

/// Gain values for one track of an album.
///
/// A gain of `None` means the track (or album) had no complete analysis
/// window; its gain field is left out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReplayGainTags {
    pub track_gain: Option<f64>,
    pub track_peak: f64,
    pub album_gain: Option<f64>,
    pub album_peak: f64,
}

impl ReplayGainTags {
    /// Field/value pairs in the order they are written
    pub fn comments(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::with_capacity(5);
        if let Some(gain) = self.album_gain {
            out.push((ALBUM_GAIN, format_gain(gain)));
        }
        out.push((ALBUM_PEAK, format_peak(self.album_peak)));
        out.push((
            REFERENCE_LOUDNESS,
            format!("{:.1} dB", REFERENCE_LOUDNESS_DB),
        ));
        if let Some(gain) = self.track_gain {
            out.push((TRACK_GAIN, format_gain(gain)));
        }
        out.push((TRACK_PEAK, format_peak(self.track_peak)));
        out
    }
}

/// Signed, two decimals, with unit: `+6.00 dB`
pub fn format_gain(gain_db: f64) -> String {
    format!("{:+.2} dB", gain_db)
}

/// Linear peak with eight decimals
pub fn format_peak(peak: f64) -> String {
    format!("{:.8}", peak)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_values() {
        assert_eq!(format_gain(6.0), "+6.00 dB");
        assert_eq!(format_gain(-3.456), "-3.46 dB");
        assert_eq!(format_peak(0.5), "0.50000000");
        assert_eq!(format_peak(1.0 / 3.0), "0.33333333");
    }

    #[test]
    fn test_comments_order() {
        let tags = ReplayGainTags {
            track_gain: Some(-7.25),
            track_peak: 0.98,
            album_gain: Some(-6.5),
            album_peak: 0.99996948,
        };
        let comments = tags.comments();
        let fields: Vec<_> = comments.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            fields,
            [ALBUM_GAIN, ALBUM_PEAK, REFERENCE_LOUDNESS, TRACK_GAIN, TRACK_PEAK]
        );
        assert_eq!(comments[2].1, "89.0 dB");
        assert_eq!(comments[3].1, "-7.25 dB");
        assert_eq!(comments[1].1, "0.99996948");
    }

    #[test]
    fn test_missing_gain_is_skipped() {
        let tags = ReplayGainTags {
            track_gain: None,
            track_peak: 0.0,
            album_gain: Some(1.0),
            album_peak: 0.5,
        };
        let comments = tags.comments();
        assert_eq!(comments.len(), 4);
        assert!(comments.iter().all(|(k, _)| *k != TRACK_GAIN));
    }
}
