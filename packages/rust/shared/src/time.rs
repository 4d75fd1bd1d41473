//! Timestamp formatting and parsing.
//!
//! Chapter comments use `HH:MM:SS.mmm`; OverDrive markers and ffmpeg stats use
//! colon-separated fields of varying length (`M:SS.fff`, `HH:MM:SS.ff`).

use crate::error::{ConvertError, Result};

/// Format seconds as `HH:MM:SS.mmm`. Hours are not wrapped.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };

    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let minutes = (total_secs / 60) % 60;
    let hours = total_secs / 3600;

    format!("{hours:02}:{minutes:02}:{secs:02}.{ms:03}")
}

/// Parse a colon-separated timestamp (`S`, `M:S`, `H:M:S`) into seconds.
pub fn parse_timestamp(s: &str) -> Result<f64> {
    let mut total = 0.0;

    for field in s.split(':') {
        let field = field.trim();
        let value: f64 = field
            .parse()
            .map_err(|_| ConvertError::parse(format!("invalid timestamp '{s}'")))?;
        if !value.is_finite() {
            return Err(ConvertError::parse(format!("invalid timestamp '{s}'")));
        }
        total = total * 60.0 + value;
    }

    Ok(total)
}
