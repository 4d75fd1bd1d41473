//! Audiobook folder metadata.
//!
//! Probes every MP3 segment of an OverDrive download, decodes the
//! `OverDrive MediaMarkers` chapter XML, orders segments by part number, and
//! folds everything into a single [`BookMetadata`] with absolute chapter times.

mod markers;
mod probe;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use overdrive2opus_shared::types::UNKNOWN;
use overdrive2opus_shared::{BookMetadata, Chapter, ConvertError, Result, TrackMetadata, TrackTags};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

pub use markers::{UNKNOWN_MARKER_NAME, parse_media_markers};
pub use probe::{Ffprobe, Probe, ProbeFormat, ProbeOutput, parse_probe_json};

/// ID3 frame holding OverDrive's chapter XML.
pub const MEDIA_MARKERS_TAG: &str = "OverDrive MediaMarkers";

/// Audio segment extension.
const AUDIO_EXT: &str = "mp3";

/// Cover art extensions.
const IMAGE_EXTS: &[&str] = &["jpg", "jpeg"];

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches `- Part 03` inside a segment title.
static PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)-\s*Part\s*(\d+)").expect("part regex"));

/// Matches a trailing `- Part 03` to strip from a title.
static TRAILING_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*-?\s*Part\s*\d+\s*$").expect("trailing part regex"));

// ---------------------------------------------------------------------------
// Per-file metadata
// ---------------------------------------------------------------------------

/// Build [`TrackMetadata`] for one segment from its probe output.
pub fn track_metadata(path: &Path, probe: &ProbeOutput) -> Result<TrackMetadata> {
    let format = &probe.format;
    let decoded = |key: &str| {
        format
            .tag(key)
            .map(|v| html_escape::decode_html_entities(v).into_owned())
    };

    let tags = TrackTags {
        title: decoded("title"),
        artist: decoded("artist"),
        album: decoded("album"),
        genre: decoded("genre"),
        publisher: decoded("publisher"),
        comment: decoded("comment"),
        copyright: decoded("copyright"),
    };

    let track = match format.tag("track").and_then(parse_track_number) {
        Some(n) => n,
        None => {
            let title = format.tag("title").ok_or_else(|| {
                ConvertError::metadata(path, "no track tag and no title to guess it from")
            })?;
            debug!(path = %path.display(), title, "no track information, guessing from title");
            track_from_title(title)
                .ok_or_else(|| ConvertError::metadata(path, "couldn't determine track information"))?
        }
    };

    let duration_secs = format
        .duration_secs()
        .ok_or_else(|| ConvertError::metadata(path, "missing or invalid duration"))?;

    let chapters = match format.tag(MEDIA_MARKERS_TAG) {
        Some(xml) => parse_media_markers(xml)?,
        None => Vec::new(),
    };

    Ok(TrackMetadata {
        path: path.to_path_buf(),
        track,
        duration_secs,
        tags,
        chapters,
    })
}

/// Parse `N` or `N/M` track tags.
fn parse_track_number(raw: &str) -> Option<u32> {
    raw.split('/').next()?.trim().parse().ok()
}

/// Extract the part number from titles like `Book Title - Part 03`.
fn track_from_title(title: &str) -> Option<u32> {
    PART_RE.captures(title)?.get(1)?.as_str().parse().ok()
}

// ---------------------------------------------------------------------------
// Folder scanning
// ---------------------------------------------------------------------------

/// List regular files in `folder` whose extension matches one of `exts`,
/// ignoring case. Results are sorted by path.
pub fn list_files(folder: &Path, exts: &[&str]) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(folder).map_err(|e| ConvertError::io(folder, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConvertError::io(folder, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| exts.iter().any(|want| want.eq_ignore_ascii_case(ext)));
        if matches {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Pick the largest image in the folder as cover art.
pub fn find_cover_image(folder: &Path) -> Result<Option<PathBuf>> {
    let mut best: Option<(u64, PathBuf)> = None;

    for path in list_files(folder, IMAGE_EXTS)? {
        let size = std::fs::metadata(&path)
            .map_err(|e| ConvertError::io(&path, e))?
            .len();
        if best.as_ref().is_none_or(|(s, _)| size > *s) {
            best = Some((size, path));
        }
    }

    Ok(best.map(|(_, p)| p))
}

/// Probe all segments in `folder` and aggregate them into book metadata.
#[instrument(skip_all, fields(folder = %folder.display()))]
pub fn read_folder(folder: &Path, probe: &dyn Probe) -> Result<BookMetadata> {
    let files = list_files(folder, &[AUDIO_EXT])?;
    if files.is_empty() {
        return Err(ConvertError::validation(format!(
            "no mp3 files found in {}, nothing to encode",
            folder.display()
        )));
    }

    let mut tracks = files
        .iter()
        .map(|f| probe.probe(f).and_then(|out| track_metadata(f, &out)))
        .collect::<Result<Vec<_>>>()?;

    let image = find_cover_image(folder)?;
    let book = aggregate(&mut tracks, image);

    info!(
        title = %book.title,
        files = book.files.len(),
        chapters = book.chapters.len(),
        duration_secs = book.duration_secs,
        "folder metadata collected"
    );

    Ok(book)
}

/// Order tracks and fold them into book-level metadata.
pub fn aggregate(tracks: &mut Vec<TrackMetadata>, image: Option<PathBuf>) -> BookMetadata {
    tracks.sort_by(|a, b| a.track.cmp(&b.track).then_with(|| a.path.cmp(&b.path)));

    let mut chapters = Vec::new();
    let mut offset = 0.0;
    for track in tracks.iter() {
        chapters.extend(
            track
                .chapters
                .iter()
                .map(|c| Chapter::new(c.name.clone(), c.start_secs + offset)),
        );
        offset += track.duration_secs;
    }

    let first = |pick: fn(&TrackTags) -> Option<&String>| -> Option<String> {
        tracks
            .iter()
            .filter_map(|t| pick(&t.tags))
            .find(|v| !v.is_empty())
            .cloned()
    };
    let field = |pick: fn(&TrackTags) -> Option<&String>| {
        first(pick).unwrap_or_else(|| UNKNOWN.to_string())
    };

    let title = match first(|t| t.album.as_ref()) {
        Some(album) => album,
        None => {
            warn!("no album information, guessing title");
            let title = match first(|t| t.title.as_ref()) {
                Some(t) => TRAILING_PART_RE.replace(&t, "").into_owned(),
                None => UNKNOWN.to_string(),
            };
            info!(%title, "guessed title");
            title
        }
    };

    BookMetadata {
        album: format!("{title} - Overdrive"),
        title,
        artist: field(|t| t.artist.as_ref()),
        genre: field(|t| t.genre.as_ref()),
        comment: field(|t| t.comment.as_ref()),
        publisher: field(|t| t.publisher.as_ref()),
        copyright: field(|t| t.copyright.as_ref()),
        image,
        chapters,
        duration_secs: offset,
        files: std::mem::take(tracks),
    }
}
