//! External command construction.
//!
//! Builds the two halves of the transcode pipeline: an `ffmpeg` invocation
//! that concatenates and filters the segments into WAV on stdout, and an
//! `opusenc` invocation that reads that WAV from stdin and writes the tagged
//! Opus file with chapter comments and cover art.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use overdrive2opus_shared::{BookMetadata, Chapter, EncodeDefaults, Loudness, Speed, format_timestamp};

/// `dynaudnorm` frame length in milliseconds.
const NORM_FRAMELEN: u32 = 8000;
/// `dynaudnorm` gaussian window size (frames).
const NORM_GAUSSSIZE: u32 = 301;

// ---------------------------------------------------------------------------
// Encode options
// ---------------------------------------------------------------------------

/// User-selectable encoding options.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    /// Opus bitrate in kbps.
    pub bitrate: u32,
    /// Keep sub-chapters instead of filtering them.
    pub include_subchapters: bool,
    /// Playback speed change.
    pub speed: Speed,
    /// Dynamic loudness normalization target.
    pub normalize: Option<Loudness>,
    /// Run the rnnoise voice-isolation filter.
    pub isolate_voice: bool,
    /// Extra ffmpeg filter appended verbatim to the chain.
    pub extra_filter: Option<String>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::from(&EncodeDefaults::default())
    }
}

impl From<&EncodeDefaults> for EncodeOptions {
    fn from(defaults: &EncodeDefaults) -> Self {
        Self {
            bitrate: defaults.bitrate,
            include_subchapters: defaults.subchapters,
            speed: Speed::new(defaults.speed),
            normalize: defaults.normalize.map(Loudness::new),
            isolate_voice: defaults.isolate_voice,
            extra_filter: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CommandLine
// ---------------------------------------------------------------------------

/// A program plus its arguments, ready to spawn or print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for a in args {
            self.arg(a);
        }
        self
    }

    /// Short tool name for logs and errors (`ffmpeg`, `opusenc`).
    pub fn name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Convert to a spawnable command with arguments set.
    pub fn to_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Whether any argument equals `needle`.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.program.to_string_lossy();
        write!(f, "{}", quote(&program))?;
        for arg in &self.args {
            write!(f, " {}", quote(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    match shlex::try_quote(s) {
        Ok(q) => q.into_owned(),
        Err(_) => format!("{s:?}"),
    }
}

// ---------------------------------------------------------------------------
// ffmpeg
// ---------------------------------------------------------------------------

/// Escape a value for use as a filter option inside `-filter_complex`.
///
/// Two levels apply: the option value (`\ ' :`) and the filter graph
/// (`\ ' [ ] , ;`).
pub fn escape_filter_value(value: &str) -> String {
    fn escape(input: &str, special: &[char]) -> String {
        let mut out = String::with_capacity(input.len());
        for c in input.chars() {
            if special.contains(&c) {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }

    let option_level = escape(value, &['\\', '\'', ':']);
    escape(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

/// Build the `-filter_complex` graph for `inputs` segments.
pub fn build_filter_graph(inputs: usize, noise_model: Option<&Path>, opts: &EncodeOptions) -> String {
    let mut graph: String = (0..inputs).map(|n| format!("[{n}:a]")).collect();
    graph.push_str(&format!("concat=n={inputs}:v=0:a=1"));

    if let Some(model) = noise_model {
        let model = escape_filter_value(&model.to_string_lossy());
        graph.push_str(&format!(",arnndn=m={model}"));
    }

    if let Some(loudness) = opts.normalize {
        graph.push_str(&format!(
            ",dynaudnorm=peak={}:framelen={NORM_FRAMELEN}:gausssize={NORM_GAUSSSIZE}:correctdc=1",
            loudness.peak()
        ));
    }

    if !opts.speed.is_unchanged() {
        graph.push_str(&format!(",atempo={:.6}", opts.speed.factor()));
    }

    if let Some(extra) = opts.extra_filter.as_deref().filter(|f| !f.trim().is_empty()) {
        graph.push(',');
        graph.push_str(extra);
    }

    graph
}

/// Decode, concatenate and filter all segments to 16-bit WAV on stdout.
pub fn ffmpeg_command(program: &Path, inputs: &[PathBuf], filter_graph: &str) -> CommandLine {
    let mut cmd = CommandLine::new(program);
    cmd.args([
        "-loglevel",
        "quiet",
        "-hide_banner",
        "-nostdin",
        "-stats",
        "-stats_period",
        "1",
    ]);

    for input in inputs {
        cmd.arg("-i").arg(input);
    }

    cmd.arg("-filter_complex")
        .arg(filter_graph)
        .args(["-f", "wav", "-acodec", "pcm_s16le", "-"]);
    cmd
}

// ---------------------------------------------------------------------------
// opusenc
// ---------------------------------------------------------------------------

/// Encode WAV from stdin into `output` with book tags and chapter comments.
///
/// `chapters` must already be filtered and rescaled.
pub fn opusenc_command(
    program: &Path,
    book: &BookMetadata,
    chapters: &[Chapter],
    bitrate: u32,
    output: &Path,
) -> CommandLine {
    let mut cmd = CommandLine::new(program);
    cmd.args([
        "--quiet",
        "--ignorelength",
        "--framesize",
        "60",
        "--downmix-mono",
        "--comp",
        "10",
        "--vbr",
        "--bitrate",
    ])
    .arg(bitrate.to_string())
    // Skip music/speech detection; audiobooks are speech.
    .arg("--speech")
    .arg("--title")
    .arg(&book.title)
    .arg("--artist")
    .arg(&book.artist)
    .arg("--album")
    .arg(&book.album)
    .arg("--genre")
    .arg(&book.genre);

    for (key, value) in [
        ("description", &book.comment),
        ("publisher", &book.publisher),
        ("copyright", &book.copyright),
    ] {
        cmd.arg("--comment").arg(format!("{key}={value}"));
    }

    for (comment_time, comment_name) in chapter_comments(chapters) {
        cmd.arg("--comment").arg(comment_time);
        cmd.arg("--comment").arg(comment_name);
    }

    if let Some(image) = &book.image {
        cmd.arg("--picture").arg(image);
    }

    cmd.arg("-").arg(output);
    cmd
}

/// Vorbis-comment chapter pairs: `CHAPTERnn=HH:MM:SS.mmm`, `CHAPTERnnNAME=...`.
pub fn chapter_comments(chapters: &[Chapter]) -> Vec<(String, String)> {
    chapters
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let n = i + 1;
            (
                format!("CHAPTER{n:02}={}", format_timestamp(c.start_secs)),
                format!("CHAPTER{n:02}NAME={}", c.name),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use overdrive2opus_shared::types::UNKNOWN;

    fn book() -> BookMetadata {
        BookMetadata {
            files: vec![],
            chapters: vec![],
            duration_secs: 3600.0,
            title: "The Long Road".into(),
            album: "The Long Road - Overdrive".into(),
            artist: "Jane Author".into(),
            genre: "Fiction".into(),
            comment: "Roads & people".into(),
            publisher: "Example House".into(),
            copyright: UNKNOWN.into(),
            image: Some("/books/road/cover.jpg".into()),
        }
    }

    fn strings(cmd: &CommandLine) -> Vec<String> {
        cmd.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn plain_concat_graph() {
        let graph = build_filter_graph(3, None, &EncodeOptions::default());
        assert_eq!(graph, "[0:a][1:a][2:a]concat=n=3:v=0:a=1");
    }

    #[test]
    fn full_filter_chain_order() {
        let opts = EncodeOptions {
            speed: Speed::new(25),
            normalize: Some(Loudness::new(90)),
            isolate_voice: true,
            extra_filter: Some("highpass=f=80".into()),
            ..EncodeOptions::default()
        };
        let graph = build_filter_graph(1, Some(Path::new("/cache/voice.rnnn")), &opts);
        assert_eq!(
            graph,
            "[0:a]concat=n=1:v=0:a=1,arnndn=m=/cache/voice.rnnn,\
             dynaudnorm=peak=0.9:framelen=8000:gausssize=301:correctdc=1,\
             atempo=1.250000,highpass=f=80"
        );
    }

    #[test]
    fn escapes_model_paths() {
        assert_eq!(escape_filter_value("/plain/path"), "/plain/path");
        assert_eq!(escape_filter_value("C:\\m"), "C\\\\:\\\\\\\\m");
        assert_eq!(escape_filter_value("a,b"), "a\\,b");
    }

    #[test]
    fn ffmpeg_args_list_every_input() {
        let inputs = vec![PathBuf::from("p1.mp3"), PathBuf::from("p2.mp3")];
        let cmd = ffmpeg_command(Path::new("ffmpeg"), &inputs, "GRAPH");
        let args = strings(&cmd);

        assert_eq!(&args[..7], ["-loglevel", "quiet", "-hide_banner", "-nostdin", "-stats", "-stats_period", "1"]);
        assert_eq!(&args[7..11], ["-i", "p1.mp3", "-i", "p2.mp3"]);
        assert_eq!(
            &args[11..],
            ["-filter_complex", "GRAPH", "-f", "wav", "-acodec", "pcm_s16le", "-"]
        );
    }

    #[test]
    fn opusenc_tags_chapters_and_picture() {
        let chapters = vec![
            Chapter::new("Opening", 0.0),
            Chapter::new("Chapter 1", 95.25),
        ];
        let cmd = opusenc_command(
            Path::new("opusenc"),
            &book(),
            &chapters,
            24,
            Path::new("out.opus"),
        );
        let args = strings(&cmd);

        let bitrate = args.iter().position(|a| a == "--bitrate").unwrap();
        assert_eq!(args[bitrate + 1], "24");
        assert!(cmd.has_arg("--speech"));
        assert!(cmd.has_arg("--downmix-mono"));
        assert!(cmd.has_arg("The Long Road - Overdrive"));
        assert!(cmd.has_arg("description=Roads & people"));
        assert!(cmd.has_arg("copyright=Unknown"));
        assert!(cmd.has_arg("CHAPTER01=00:00:00.000"));
        assert!(cmd.has_arg("CHAPTER01NAME=Opening"));
        assert!(cmd.has_arg("CHAPTER02=00:01:35.250"));
        assert!(cmd.has_arg("CHAPTER02NAME=Chapter 1"));

        let n = args.len();
        assert_eq!(&args[n - 4..], ["--picture", "/books/road/cover.jpg", "-", "out.opus"]);
    }

    #[test]
    fn chapter_numbers_grow_past_two_digits() {
        let chapters: Vec<_> = (0..100).map(|i| Chapter::new(format!("C{i}"), f64::from(i))).collect();
        let comments = chapter_comments(&chapters);
        assert_eq!(comments[8].0, "CHAPTER09=00:00:08.000");
        assert_eq!(comments[99].1, "CHAPTER100NAME=C99");
    }

    #[test]
    fn display_quotes_arguments() {
        let mut cmd = CommandLine::new("opusenc");
        cmd.args(["--title", "Two Words", "-"]);
        let rendered = cmd.to_string();
        assert_eq!(
            shlex::split(&rendered).unwrap(),
            ["opusenc", "--title", "Two Words", "-"]
        );
        assert_eq!(cmd.name(), "opusenc");
    }
}
