//! Application configuration for overdrive2opus.
//!
//! User config lives at `~/.overdrive2opus/overdrive2opus.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConvertError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "overdrive2opus.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".overdrive2opus";

/// rnnoise model tuned for speech over background noise.
pub const DEFAULT_NOISE_MODEL_URL: &str = "https://raw.githubusercontent.com/GregorR/rnnoise-models/master/somnolent-hogwash-2018-09-01/sh.rnnn";

// ---------------------------------------------------------------------------
// Config structs (matching overdrive2opus.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default encoding options.
    #[serde(default)]
    pub encode: EncodeDefaults,

    /// External executables.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Voice-isolation model download.
    #[serde(default)]
    pub noise_model: NoiseModelConfig,
}

/// `[encode]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeDefaults {
    /// Opus bitrate in kbps.
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Signed speed change in percent.
    #[serde(default)]
    pub speed: i32,

    /// Dynamic normalization target (percent of max volume).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalize: Option<i32>,

    /// Keep sub-chapters instead of filtering them.
    #[serde(default)]
    pub subchapters: bool,

    /// Run the noise-isolation filter.
    #[serde(default)]
    pub isolate_voice: bool,

    /// Show the encoding progress bar.
    #[serde(default = "default_true")]
    pub progress: bool,
}

impl Default for EncodeDefaults {
    fn default() -> Self {
        Self {
            bitrate: default_bitrate(),
            speed: 0,
            normalize: None,
            subchapters: false,
            isolate_voice: false,
            progress: true,
        }
    }
}

fn default_bitrate() -> u32 {
    15
}
fn default_true() -> bool {
    true
}

/// `[tools]` section. Values are program names looked up on `PATH`, or paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    #[serde(default = "default_opusenc")]
    pub opusenc: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            opusenc: default_opusenc(),
        }
    }
}

fn default_ffmpeg() -> PathBuf {
    "ffmpeg".into()
}
fn default_ffprobe() -> PathBuf {
    "ffprobe".into()
}
fn default_opusenc() -> PathBuf {
    "opusenc".into()
}

/// `[noise_model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseModelConfig {
    /// Where to download the rnnoise model from.
    #[serde(default = "default_noise_model_url")]
    pub url: String,

    /// Cache directory override (defaults to the OS cache dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Expected SHA-256 of the model file, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Download timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NoiseModelConfig {
    fn default() -> Self {
        Self {
            url: default_noise_model_url(),
            cache_dir: None,
            sha256: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl NoiseModelConfig {
    /// Parse and validate the configured URL.
    pub fn parsed_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url).map_err(|e| {
            ConvertError::config(format!("invalid noise_model.url '{}': {e}", self.url))
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConvertError::config(format!(
                "unsupported noise_model.url scheme '{other}'"
            ))),
        }
    }
}

fn default_noise_model_url() -> String {
    DEFAULT_NOISE_MODEL_URL.into()
}
fn default_timeout_secs() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.overdrive2opus/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ConvertError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.overdrive2opus/overdrive2opus.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ConvertError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ConvertError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ConvertError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ConvertError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that every configured tool can be found. Returns the resolved paths
/// in the order ffmpeg, ffprobe, opusenc.
pub fn validate_tools(tools: &ToolsConfig) -> Result<[PathBuf; 3]> {
    let resolve = |name: &str, program: &Path| {
        which::which(program).map_err(|_| {
            ConvertError::config(format!(
                "{name} not found (configured as '{}'). Install it or set tools.{name} in {CONFIG_FILE_NAME}",
                program.display()
            ))
        })
    };

    let ffmpeg = resolve("ffmpeg", &tools.ffmpeg)?;
    let ffprobe = resolve("ffprobe", &tools.ffprobe)?;
    let opusenc = resolve("opusenc", &tools.opusenc)?;
    tracing::debug!(?ffmpeg, ?ffprobe, ?opusenc, "resolved external tools");

    Ok([ffmpeg, ffprobe, opusenc])
}
