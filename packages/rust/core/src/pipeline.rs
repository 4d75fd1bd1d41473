//! End-to-end `encode` pipeline: folder → metadata → chapters → commands → Opus.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use overdrive2opus_metadata::{Ffprobe, Probe};
use overdrive2opus_noise::NoiseModelOptions;
use overdrive2opus_shared::{BookMetadata, Chapter, ConvertError, Result, ToolsConfig};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::chapters;
use crate::command::{self, CommandLine, EncodeOptions};
use crate::transcode::{self, TranscodeProgress};

/// Configuration for the `encode` pipeline.
#[derive(Debug, Clone)]
pub struct EncodeConfig {
    /// Folder holding the MP3 segments and cover art.
    pub folder: PathBuf,
    /// Output file (defaults to the folder name with `.opus`).
    pub output: Option<PathBuf>,
    /// Encoding options.
    pub options: EncodeOptions,
    /// External executables.
    pub tools: ToolsConfig,
    /// Where the voice-isolation model is cached.
    pub noise_model: NoiseModelOptions,
    /// Build the commands but don't run them.
    pub dry_run: bool,
}

/// Everything needed to run (or print) one conversion.
#[derive(Debug, Clone)]
pub struct EncodePlan {
    pub book: BookMetadata,
    /// Chapters as they will be written (filtered and rescaled).
    pub chapters: Vec<Chapter>,
    pub output: PathBuf,
    pub ffmpeg: CommandLine,
    pub opusenc: CommandLine,
    /// Length of the encoded audio in seconds.
    pub encoded_secs: f64,
}

/// Result of the `encode` pipeline.
#[derive(Debug)]
pub struct EncodeResult {
    pub output: PathBuf,
    pub title: String,
    pub file_count: usize,
    pub chapter_count: usize,
    /// Combined length of the source segments.
    pub source_secs: f64,
    /// Length after the speed change.
    pub encoded_secs: f64,
    pub ffmpeg: CommandLine,
    pub opusenc: CommandLine,
    /// True when nothing was executed.
    pub dry_run: bool,
    pub elapsed: Duration,
}

/// Book metadata plus the chapters an encode would write.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub book: BookMetadata,
    pub chapters: Vec<Chapter>,
    pub encoded_secs: f64,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once before transcoding with the expected output length.
    fn encode_started(&self, title: &str, total_secs: f64);
    /// Called as the decoder advances through the output timeline.
    fn encode_position(&self, seconds: f64);
    /// Called when the pipeline completes.
    fn done(&self, result: &EncodeResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn encode_started(&self, _title: &str, _total_secs: f64) {}
    fn encode_position(&self, _seconds: f64) {}
    fn done(&self, _result: &EncodeResult) {}
}

/// Default output: the folder path with an `.opus` extension.
///
/// Paths without a final name (`.`, `..`) are canonicalized first so the
/// output lands beside the folder rather than on it.
pub fn default_output_path(folder: &Path) -> Result<PathBuf> {
    let folder = match folder.file_name() {
        Some(_) => folder.to_path_buf(),
        None => std::fs::canonicalize(folder).map_err(|e| ConvertError::io(folder, e))?,
    };

    if folder.file_name().is_none() {
        return Err(ConvertError::validation(format!(
            "cannot derive an output name from {}, pass an output file",
            folder.display()
        )));
    }

    Ok(folder.with_extension("opus"))
}

/// Run the full `encode` pipeline.
///
/// 1. Read folder metadata
/// 2. Select and rescale chapters
/// 3. Fetch the noise model (voice isolation only)
/// 4. Build ffmpeg/opusenc commands
/// 5. Transcode (skipped for dry runs)
#[instrument(skip_all, fields(folder = %config.folder.display()))]
pub async fn encode(config: &EncodeConfig, progress: &dyn ProgressReporter) -> Result<EncodeResult> {
    let start = Instant::now();

    let output = match &config.output {
        Some(p) => p.clone(),
        None => {
            let guessed = default_output_path(&config.folder)?;
            warn!(output = %guessed.display(), "guessing opus filename");
            guessed
        }
    };

    info!(folder = %config.folder.display(), output = %output.display(), "encoding");

    // --- Phase 1: Metadata ---
    progress.phase("Reading metadata");
    let probe = Ffprobe::new(&config.tools.ffprobe);
    let book = overdrive2opus_metadata::read_folder(&config.folder, &probe)?;

    // --- Phase 2: Noise model ---
    let noise_model = if config.options.isolate_voice {
        if config.dry_run {
            Some(config.noise_model.model_path())
        } else {
            progress.phase("Fetching voice model");
            Some(overdrive2opus_noise::ensure_model(&config.noise_model).await?)
        }
    } else {
        None
    };

    // --- Phase 3: Commands ---
    let plan = build_plan(
        book,
        output,
        noise_model.as_deref(),
        &config.options,
        &config.tools,
    );

    info!(
        files = plan.book.files.len(),
        duration = %overdrive2opus_shared::format_timestamp(plan.book.duration_secs),
        chapters = plan.chapters.len(),
        "plan ready"
    );

    // --- Phase 4: Transcode ---
    if !config.dry_run {
        progress.phase("Encoding");
        progress.encode_started(&plan.book.title, plan.encoded_secs);
        let adapter = PipelineTranscodeProgress { inner: progress };
        transcode::run(&plan.ffmpeg, &plan.opusenc, &adapter)?;
    }

    let result = EncodeResult {
        output: plan.output,
        title: plan.book.title,
        file_count: plan.book.files.len(),
        chapter_count: plan.chapters.len(),
        source_secs: plan.book.duration_secs,
        encoded_secs: plan.encoded_secs,
        ffmpeg: plan.ffmpeg,
        opusenc: plan.opusenc,
        dry_run: config.dry_run,
        elapsed: start.elapsed(),
    };

    progress.done(&result);

    info!(
        output = %result.output.display(),
        chapters = result.chapter_count,
        dry_run = result.dry_run,
        elapsed_ms = result.elapsed.as_millis(),
        "encode pipeline complete"
    );

    Ok(result)
}

/// Turn book metadata and options into concrete commands.
pub fn build_plan(
    book: BookMetadata,
    output: PathBuf,
    noise_model: Option<&Path>,
    options: &EncodeOptions,
    tools: &ToolsConfig,
) -> EncodePlan {
    let selected = chapters::select_chapters(&book.chapters, options.include_subchapters);
    let chapters = chapters::rescale(&selected, options.speed);

    let inputs: Vec<PathBuf> = book.files.iter().map(|f| f.path.clone()).collect();
    let graph = command::build_filter_graph(inputs.len(), noise_model, options);
    let ffmpeg = command::ffmpeg_command(&tools.ffmpeg, &inputs, &graph);
    let opusenc = command::opusenc_command(&tools.opusenc, &book, &chapters, options.bitrate, &output);

    EncodePlan {
        encoded_secs: book.duration_secs / options.speed.factor(),
        book,
        chapters,
        output,
        ffmpeg,
        opusenc,
    }
}

/// Read a folder and report the chapters an encode would write.
pub fn inspect(folder: &Path, probe: &dyn Probe, options: &EncodeOptions) -> Result<Inspection> {
    let book = overdrive2opus_metadata::read_folder(folder, probe)?;
    let selected = chapters::select_chapters(&book.chapters, options.include_subchapters);

    Ok(Inspection {
        chapters: chapters::rescale(&selected, options.speed),
        encoded_secs: book.duration_secs / options.speed.factor(),
        book,
    })
}

// ---------------------------------------------------------------------------
// Transcode progress adapter
// ---------------------------------------------------------------------------

/// Adapts a `ProgressReporter` to the `TranscodeProgress` interface.
struct PipelineTranscodeProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl TranscodeProgress for PipelineTranscodeProgress<'_> {
    fn position(&self, seconds: f64) {
        self.inner.encode_position(seconds);
    }
}
