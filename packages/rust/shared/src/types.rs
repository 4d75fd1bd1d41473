//! Core domain types for audiobook conversion.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Value used for book-level fields no file provides.
pub const UNKNOWN: &str = "Unknown";

// ---------------------------------------------------------------------------
// Chapter
// ---------------------------------------------------------------------------

/// A named chapter marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Display name, exactly as stored (leading whitespace is significant).
    pub name: String,
    /// Start offset in seconds.
    pub start_secs: f64,
}

impl Chapter {
    pub fn new(name: impl Into<String>, start_secs: f64) -> Self {
        Self {
            name: name.into(),
            start_secs,
        }
    }
}

// ---------------------------------------------------------------------------
// Track / book metadata
// ---------------------------------------------------------------------------

/// Descriptive tags read from a single audio file, entities already decoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackTags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
}

/// Metadata for one audio segment of the book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Path of the segment file.
    pub path: PathBuf,
    /// Track (part) number used for ordering.
    pub track: u32,
    /// Segment duration in seconds.
    pub duration_secs: f64,
    /// Descriptive tags.
    pub tags: TrackTags,
    /// Chapters with starts relative to this file.
    pub chapters: Vec<Chapter>,
}

/// Aggregated metadata for an audiobook folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookMetadata {
    /// Segments in playback order.
    pub files: Vec<TrackMetadata>,
    /// All chapters with absolute start times.
    pub chapters: Vec<Chapter>,
    /// Sum of all segment durations.
    pub duration_secs: f64,
    pub title: String,
    pub album: String,
    pub artist: String,
    pub genre: String,
    pub comment: String,
    pub publisher: String,
    pub copyright: String,
    /// Cover art, if the folder has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Speed
// ---------------------------------------------------------------------------

/// Playback speed change as a signed percentage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Speed(i32);

impl Speed {
    /// Slowest supported change (`atempo` lower bound of 0.5).
    pub const MIN_PERCENT: i32 = -50;
    /// Fastest supported change (`atempo` upper bound of 100).
    pub const MAX_PERCENT: i32 = 9900;

    /// Build a speed, clamping to the range `atempo` accepts.
    pub fn new(percent: i32) -> Self {
        let clamped = percent.clamp(Self::MIN_PERCENT, Self::MAX_PERCENT);
        if clamped != percent {
            tracing::warn!(requested = percent, used = clamped, "speed out of range, clamping");
        }
        Self(clamped)
    }

    pub fn percent(&self) -> i32 {
        self.0
    }

    /// Tempo multiplier (`1 + percent / 100`).
    pub fn factor(&self) -> f64 {
        1.0 + f64::from(self.0) / 100.0
    }

    pub fn is_unchanged(&self) -> bool {
        self.0 == 0
    }
}

// ---------------------------------------------------------------------------
// Loudness
// ---------------------------------------------------------------------------

/// Dynamic normalization target as a percentage of max volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loudness(u8);

impl Loudness {
    /// Build a target, clamping to `0..=100`.
    pub fn new(percent: i32) -> Self {
        let clamped = percent.clamp(0, 100);
        if clamped != percent {
            tracing::warn!(requested = percent, used = clamped, "normalize out of range, clamping");
        }
        Self(clamped as u8)
    }

    pub fn percent(&self) -> u8 {
        self.0
    }

    /// `dynaudnorm` peak value in `0.0..=1.0`.
    pub fn peak(&self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_factor() {
        assert_eq!(Speed::new(0).factor(), 1.0);
        assert_eq!(Speed::new(25).factor(), 1.25);
        assert_eq!(Speed::new(-20).factor(), 0.8);
        assert!(Speed::default().is_unchanged());
    }

    #[test]
    fn speed_clamps_to_atempo_range() {
        assert_eq!(Speed::new(-99).percent(), -50);
        assert_eq!(Speed::new(-1000).factor(), 0.5);
        assert_eq!(Speed::new(20_000).percent(), 9900);
    }

    #[test]
    fn loudness_clamps_and_maps_to_peak() {
        assert_eq!(Loudness::new(150).percent(), 100);
        assert_eq!(Loudness::new(-5).percent(), 0);
        assert_eq!(Loudness::new(90).peak(), 0.9);
    }

    #[test]
    fn book_metadata_serializes_without_missing_image() {
        let book = BookMetadata {
            files: vec![],
            chapters: vec![Chapter::new("Chapter 1", 0.0)],
            duration_secs: 10.0,
            title: "Book".into(),
            album: "Book - Overdrive".into(),
            artist: UNKNOWN.into(),
            genre: UNKNOWN.into(),
            comment: UNKNOWN.into(),
            publisher: UNKNOWN.into(),
            copyright: UNKNOWN.into(),
            image: None,
        };

        let json = serde_json::to_string(&book).expect("serialize");
        assert!(!json.contains("image"));
        let parsed: BookMetadata = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.chapters[0].name, "Chapter 1");
    }
}
