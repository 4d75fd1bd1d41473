//! Chapter selection and speed rescaling.
//!
//! OverDrive marker lists are noisy: besides real chapters they carry indented
//! scene breaks, "Chapter 3 (12:40)" continuation markers at segment
//! boundaries, and repeated names. Unless sub-chapters are requested, those
//! are dropped before chapters are written.

use std::fmt;
use std::sync::LazyLock;

use overdrive2opus_shared::{Chapter, Speed};
use regex::Regex;
use tracing::info;

/// Matches names ending in a parenthesised timestamp, e.g. `Chapter 3 (12:40)`.
static TIMESTAMP_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\([0-9:]+\)\s*$").expect("timestamp suffix regex"));

/// Why a chapter was treated as a sub-chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Name starts with whitespace.
    Indent,
    /// Name ends with `(mm:ss)`.
    Timestamp,
    /// Same name as the previous kept chapter.
    Repeated,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Indent => "indent",
            Self::Timestamp => "timestamp",
            Self::Repeated => "repeated chapter name",
        })
    }
}

/// Classify `name` given the last kept chapter name.
pub fn subchapter_reason(name: &str, previous: Option<&str>) -> Option<SkipReason> {
    if name.starts_with(char::is_whitespace) {
        Some(SkipReason::Indent)
    } else if TIMESTAMP_SUFFIX_RE.is_match(name) {
        Some(SkipReason::Timestamp)
    } else if previous == Some(name) {
        Some(SkipReason::Repeated)
    } else {
        None
    }
}

/// Drop sub-chapters unless `include_subchapters` is set.
pub fn select_chapters(chapters: &[Chapter], include_subchapters: bool) -> Vec<Chapter> {
    if include_subchapters {
        return chapters.to_vec();
    }

    let mut kept: Vec<Chapter> = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        let previous = kept.last().map(|c| c.name.as_str());
        if let Some(reason) = subchapter_reason(&chapter.name, previous) {
            info!(name = %chapter.name, %reason, "ignoring subchapter");
            continue;
        }
        kept.push(chapter.clone());
    }
    kept
}

/// Rescale chapter starts to the sped-up (or slowed-down) timeline.
pub fn rescale(chapters: &[Chapter], speed: Speed) -> Vec<Chapter> {
    let factor = speed.factor();
    chapters
        .iter()
        .map(|c| Chapter::new(c.name.clone(), c.start_secs / factor))
        .collect()
}
