//! `ffprobe` invocation and output model.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use overdrive2opus_shared::{ConvertError, Result};
use serde::Deserialize;
use tracing::{debug, instrument};

/// Top-level `ffprobe -print_format json -show_format` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub format: ProbeFormat,
}

/// The `format` object. Only the fields we use are modelled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFormat {
    /// Container duration in seconds, as ffprobe prints it.
    #[serde(default)]
    pub duration: Option<String>,
    /// Container tags (ID3 frames for MP3).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ProbeFormat {
    /// Look up a tag by key, ignoring ASCII case.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .or_else(|| {
                self.tags
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// Parsed duration in seconds, if present and numeric.
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration
            .as_deref()
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0)
    }
}

/// Parse ffprobe's JSON output.
pub fn parse_probe_json(bytes: &[u8]) -> Result<ProbeOutput> {
    serde_json::from_slice(bytes)
        .map_err(|e| ConvertError::parse(format!("invalid ffprobe output: {e}")))
}

/// Source of per-file container metadata.
pub trait Probe {
    fn probe(&self, path: &Path) -> Result<ProbeOutput>;
}

/// [`Probe`] implementation backed by the `ffprobe` executable.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    program: PathBuf,
}

impl Ffprobe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for Ffprobe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl Probe for Ffprobe {
    #[instrument(skip(self), fields(program = %self.program.display()))]
    fn probe(&self, path: &Path) -> Result<ProbeOutput> {
        let output = Command::new(&self.program)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| {
                ConvertError::tool(
                    "ffprobe",
                    format!("failed to run `{}`: {e}", self.program.display()),
                )
            })?;

        if !output.status.success() {
            return Err(ConvertError::tool(
                "ffprobe",
                format!("{} exited with {}", path.display(), output.status),
            ));
        }

        let parsed = parse_probe_json(&output.stdout)?;
        debug!(tags = parsed.format.tags.len(), duration = ?parsed.format.duration, "raw metadata");
        Ok(parsed)
    }
}
