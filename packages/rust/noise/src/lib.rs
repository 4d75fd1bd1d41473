//! Voice-isolation model cache.
//!
//! The `arnndn` ffmpeg filter needs an rnnoise model file. We don't ship one;
//! it is downloaded on first use into the user cache directory and reused
//! afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use overdrive2opus_shared::{ConvertError, NoiseModelConfig, Result};
use reqwest::{Client, Response};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use url::Url;

/// Application directory name inside the OS cache dir.
const APP_CACHE_DIR: &str = "overdrive2opus";

/// File name of the cached model.
pub const MODEL_FILE_NAME: &str = "voice.rnnn";

/// Maximum model size we accept (rnnoise models are a few hundred KB).
const MAX_MODEL_SIZE: u64 = 64 * 1024 * 1024;

/// User-Agent string for model downloads.
const USER_AGENT: &str = concat!("overdrive2opus/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Resolved settings for locating and fetching the model.
#[derive(Debug, Clone)]
pub struct NoiseModelOptions {
    /// Download source.
    pub url: Url,
    /// Directory holding [`MODEL_FILE_NAME`].
    pub cache_dir: PathBuf,
    /// Expected SHA-256 (lowercase hex), if pinned.
    pub sha256: Option<String>,
    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl NoiseModelOptions {
    /// Build options from the `[noise_model]` config section.
    pub fn from_config(config: &NoiseModelConfig) -> Result<Self> {
        let cache_dir = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => default_cache_dir()?,
        };

        Ok(Self {
            url: config.parsed_url()?,
            cache_dir,
            sha256: config.sha256.as_ref().map(|s| s.trim().to_ascii_lowercase()),
            timeout_secs: config.timeout_secs,
        })
    }

    /// Where the model lives (or will live) on disk.
    pub fn model_path(&self) -> PathBuf {
        self.cache_dir.join(MODEL_FILE_NAME)
    }
}

/// `<OS cache dir>/overdrive2opus`.
pub fn default_cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .ok_or_else(|| ConvertError::config("could not determine user cache directory"))?;
    Ok(base.join(APP_CACHE_DIR))
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Return the cached model path, downloading it first if needed.
#[instrument(skip_all, fields(url = %opts.url))]
pub async fn ensure_model(opts: &NoiseModelOptions) -> Result<PathBuf> {
    let path = opts.model_path();
    debug!(path = %path.display(), "noise model path");

    if path.is_file() {
        return Ok(path);
    }

    tokio::fs::create_dir_all(&opts.cache_dir)
        .await
        .map_err(|e| ConvertError::io(&opts.cache_dir, e))?;

    info!(url = %opts.url, "downloading voice/noise model");
    let body = download(opts).await?;

    let digest = sha256_hex(&body);
    if let Some(expected) = &opts.sha256 {
        if *expected != digest {
            return Err(ConvertError::validation(format!(
                "noise model checksum mismatch: expected {expected}, got {digest}"
            )));
        }
    }

    write_atomically(&path, &body).await?;
    info!(path = %path.display(), bytes = body.len(), sha256 = %digest, "noise model cached");

    Ok(path)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &NoiseModelOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| ConvertError::Network(format!("failed to build HTTP client: {e}")))
}

/// Fetch the model body, rejecting error statuses and oversized responses.
async fn download(opts: &NoiseModelOptions) -> Result<Vec<u8>> {
    let client = build_client(opts)?;
    let url = &opts.url;

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| ConvertError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ConvertError::Network(format!("{url}: HTTP {status}")));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_MODEL_SIZE {
            return Err(ConvertError::validation(format!(
                "{url}: response too large ({len} bytes, max {MAX_MODEL_SIZE})"
            )));
        }
    }

    let body = read_body(response, url, MAX_MODEL_SIZE).await?;

    if body.is_empty() {
        return Err(ConvertError::validation(format!("{url}: empty model file")));
    }

    Ok(body)
}

/// Read the body chunk by chunk, failing once it grows past `limit` bytes.
async fn read_body(mut response: Response, url: &Url, limit: u64) -> Result<Vec<u8>> {
    let mut body = Vec::new();

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ConvertError::Network(format!("{url}: failed to read body: {e}")))?
    {
        if (body.len() + chunk.len()) as u64 > limit {
            return Err(ConvertError::validation(format!(
                "{url}: response too large (over {limit} bytes)"
            )));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

/// Write to a sibling `.part` file and rename over the target.
async fn write_atomically(path: &Path, body: &[u8]) -> Result<()> {
    let partial = path.with_extension("rnnn.part");
    tokio::fs::write(&partial, body)
        .await
        .map_err(|e| ConvertError::io(&partial, e))?;
    if let Err(e) = tokio::fs::rename(&partial, path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(ConvertError::io(path, e));
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
