//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use overdrive2opus_core::command::EncodeOptions;
use overdrive2opus_core::pipeline::{EncodeConfig, EncodeResult, ProgressReporter};
use overdrive2opus_metadata::Ffprobe;
use overdrive2opus_noise::NoiseModelOptions;
use overdrive2opus_shared::{
    AppConfig, Loudness, Speed, ToolsConfig, format_timestamp, init_config, load_config,
    validate_tools,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// overdrive2opus: OverDrive MP3 folders to chaptered Opus audiobooks.
#[derive(Parser)]
#[command(
    name = "overdrive2opus",
    version,
    about = "Convert an OverDrive audiobook folder into an Opus file with chapters and cover art.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Encode a book folder into a single Opus file.
    Encode(EncodeArgs),

    /// Show the metadata and chapters an encode would write.
    Inspect {
        /// Input folder.
        folder: PathBuf,

        /// Include sub-chapters.
        #[arg(long)]
        subchapters: bool,

        /// Speed change in signed percent; chapter times are rescaled.
        #[arg(long, allow_negative_numbers = true)]
        speed: Option<i32>,

        /// Print JSON instead of a chapter list.
        #[arg(long)]
        json: bool,
    },

    /// Voice-isolation model management.
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `encode`. Unset options fall back to the config file.
#[derive(Args, Debug)]
pub(crate) struct EncodeArgs {
    /// Input folder.
    pub folder: PathBuf,

    /// Output opus file (defaults to the folder name with `.opus`).
    pub opus_file: Option<PathBuf>,

    /// Opus bitrate in kbps.
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// Include sub-chapters.
    #[arg(long, overrides_with = "no_subchapters")]
    pub subchapters: bool,

    /// Drop sub-chapters even if the config file keeps them.
    #[arg(long, overrides_with = "subchapters")]
    pub no_subchapters: bool,

    /// Do not display the encoding progress bar.
    #[arg(long, alias = "noprogress")]
    pub no_progress: bool,

    /// Speed up or down in signed percent; chapters are adjusted accordingly.
    #[arg(long, allow_negative_numbers = true)]
    pub speed: Option<i32>,

    /// Percent of max volume for dynamic normalization.
    #[arg(long)]
    pub normalize: Option<i32>,

    /// Filter background noise to isolate the voice.
    #[arg(long, alias = "isolate_voice", overrides_with = "no_isolate_voice")]
    pub isolate_voice: bool,

    /// Skip voice isolation even if the config file enables it.
    #[arg(long, overrides_with = "isolate_voice")]
    pub no_isolate_voice: bool,

    /// Extra ffmpeg audio filter appended to the graph.
    #[arg(long)]
    pub filter: Option<String>,

    /// Print the ffmpeg and opusenc commands without running them.
    #[arg(long)]
    pub dry_run: bool,
}

/// Model subcommands.
#[derive(Subcommand)]
pub(crate) enum ModelAction {
    /// Download the model into the cache if it is missing.
    Fetch,
    /// Print where the cached model lives.
    Path,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(cli.verbose)));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "overdrive2opus=warn",
        1 => "overdrive2opus=info",
        2 => "overdrive2opus=debug",
        _ => "overdrive2opus=trace",
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Encode(args) => cmd_encode(args).await,
        Command::Inspect {
            folder,
            subchapters,
            speed,
            json,
        } => cmd_inspect(folder, subchapters, speed, json).await,
        Command::Model { action } => match action {
            ModelAction::Fetch => cmd_model_fetch().await,
            ModelAction::Path => cmd_model_path().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Merge config-file defaults with command-line overrides.
fn encode_options(config: &AppConfig, args: &EncodeArgs) -> EncodeOptions {
    let mut options = EncodeOptions::from(&config.encode);

    if let Some(bitrate) = args.bitrate {
        options.bitrate = bitrate;
    }
    if let Some(speed) = args.speed {
        options.speed = Speed::new(speed);
    }
    if let Some(normalize) = args.normalize {
        options.normalize = Some(Loudness::new(normalize));
    }
    if args.subchapters || args.no_subchapters {
        options.include_subchapters = args.subchapters;
    }
    if args.isolate_voice || args.no_isolate_voice {
        options.isolate_voice = args.isolate_voice;
    }
    options.extra_filter = args.filter.clone();

    options
}

async fn cmd_encode(args: EncodeArgs) -> Result<()> {
    let config = load_config()?;
    let options = encode_options(&config, &args);

    let tools = if args.dry_run {
        config.tools.clone()
    } else {
        let [ffmpeg, ffprobe, opusenc] = validate_tools(&config.tools)?;
        ToolsConfig {
            ffmpeg,
            ffprobe,
            opusenc,
        }
    };

    let encode_config = EncodeConfig {
        folder: args.folder.clone(),
        output: args.opus_file.clone(),
        options,
        tools,
        noise_model: NoiseModelOptions::from_config(&config.noise_model)?,
        dry_run: args.dry_run,
    };

    info!(
        folder = %args.folder.display(),
        bitrate = encode_config.options.bitrate,
        speed = encode_config.options.speed.percent(),
        isolate_voice = encode_config.options.isolate_voice,
        dry_run = args.dry_run,
        "encoding audiobook"
    );

    let show_progress = config.encode.progress && !args.no_progress && !args.dry_run;
    let reporter = CliProgress::new(show_progress);

    let result = overdrive2opus_core::pipeline::encode(&encode_config, &reporter).await?;

    if result.dry_run {
        println!("{} | {}", result.ffmpeg, result.opusenc);
        return Ok(());
    }

    println!();
    println!("  Audiobook encoded!");
    println!("  Title:    {}", result.title);
    println!("  Files:    {}", result.file_count);
    println!("  Chapters: {}", result.chapter_count);
    println!("  Length:   {}", format_timestamp(result.encoded_secs));
    println!("  Output:   {}", result.output.display());
    println!("  Time:     {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_inspect(folder: PathBuf, subchapters: bool, speed: Option<i32>, json: bool) -> Result<()> {
    let config = load_config()?;
    let mut options = EncodeOptions::from(&config.encode);
    options.include_subchapters |= subchapters;
    if let Some(speed) = speed {
        options.speed = Speed::new(speed);
    }

    info!(folder = %folder.display(), "inspecting folder");

    let probe = Ffprobe::new(&config.tools.ffprobe);
    let inspection = overdrive2opus_core::pipeline::inspect(&folder, &probe, &options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    let book = &inspection.book;
    println!("  Title:     {}", book.title);
    println!("  Artist:    {}", book.artist);
    println!("  Publisher: {}", book.publisher);
    println!("  Files:     {}", book.files.len());
    println!("  Length:    {}", format_timestamp(inspection.encoded_secs));
    if let Some(image) = &book.image {
        println!("  Cover:     {}", image.display());
    }
    println!();
    for (i, chapter) in inspection.chapters.iter().enumerate() {
        println!(
            "  {:>3}  {}  {}",
            i + 1,
            format_timestamp(chapter.start_secs),
            chapter.name
        );
    }

    Ok(())
}

async fn cmd_model_fetch() -> Result<()> {
    let config = load_config()?;
    let opts = NoiseModelOptions::from_config(&config.noise_model)?;
    let path = overdrive2opus_noise::ensure_model(&opts).await?;
    println!("Model ready at: {}", path.display());
    Ok(())
}

async fn cmd_model_path() -> Result<()> {
    let config = load_config()?;
    let opts = NoiseModelOptions::from_config(&config.noise_model)?;
    println!("{}", opts.model_path().display());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter: a spinner for setup phases, then a bar over the
/// encoded timeline.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(enabled: bool) -> Self {
        if !enabled {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn encode_started(&self, title: &str, total_secs: f64) {
        self.bar.set_style(
            ProgressStyle::with_template("{msg} {wide_bar:.cyan/blue} {percent:>3}% {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.bar.set_length(total_secs.ceil().max(1.0) as u64);
        self.bar.set_position(0);
        self.bar.set_message(title.to_string());
    }

    fn encode_position(&self, seconds: f64) {
        self.bar.set_position(seconds as u64);
    }

    fn done(&self, _result: &EncodeResult) {
        self.bar.finish_and_clear();
    }
}
