//! End-to-end `encode` runs against shell-script stand-ins for ffprobe,
//! ffmpeg and opusenc.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use overdrive2opus_core::command::EncodeOptions;
use overdrive2opus_core::pipeline::{EncodeConfig, EncodeResult, ProgressReporter, encode};
use overdrive2opus_noise::NoiseModelOptions;
use overdrive2opus_shared::{ConvertError, Speed, ToolsConfig};

/// Scripts are written and executed under this lock so no concurrent fork
/// holds a writable handle to a script we are about to exec.
static SCRIPT_LOCK: Mutex<()> = Mutex::new(());

#[derive(Default)]
struct Recorder {
    phases: Mutex<Vec<String>>,
    positions: Mutex<Vec<f64>>,
    total: Mutex<Option<f64>>,
}

impl ProgressReporter for Recorder {
    fn phase(&self, name: &str) {
        self.phases.lock().unwrap().push(name.to_string());
    }
    fn encode_started(&self, _title: &str, total_secs: f64) {
        *self.total.lock().unwrap() = Some(total_secs);
    }
    fn encode_position(&self, seconds: f64) {
        self.positions.lock().unwrap().push(seconds);
    }
    fn done(&self, _result: &EncodeResult) {}
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Exit codes for the fake decoder and encoder.
#[derive(Clone, Copy)]
struct Exits {
    ffmpeg: i32,
    opusenc: i32,
}

const CLEAN: Exits = Exits { ffmpeg: 0, opusenc: 0 };

/// Lay out a two-part book plus fake tools. Returns (book folder, tools, log dir).
fn setup(root: &Path, exits: Exits) -> (PathBuf, ToolsConfig, PathBuf) {
    let book = root.join("The Long Road");
    let bin = root.join("bin");
    let logs = root.join("logs");
    for d in [&book, &bin, &logs] {
        std::fs::create_dir_all(d).unwrap();
    }

    for (mp3, fixture) in [("Part01.mp3", "part1.json"), ("Part02.mp3", "part2.json")] {
        std::fs::write(book.join(mp3), b"ID3").unwrap();
        std::fs::copy(
            format!("../../../fixtures/ffprobe/{fixture}"),
            book.join(mp3).with_extension("json"),
        )
        .unwrap();
    }
    std::fs::write(book.join("cover.jpg"), vec![0u8; 64]).unwrap();

    let logs_s = logs.display();
    let ffprobe = write_script(&bin, "ffprobe", "for last; do :; done\ncat \"${last%.mp3}.json\"");
    let ffmpeg = write_script(
        &bin,
        "ffmpeg",
        &format!(
            "printf '%s\\n' \"$@\" > '{logs_s}/ffmpeg.args'\n\
             printf 'size=N/A time=00:10:00.00 bitrate=N/A\\r' >&2\n\
             printf 'size=N/A time=00:40:00.00 bitrate=N/A\\r' >&2\n\
             printf 'RIFFfakewav'\n\
             exit {ffmpeg_exit}",
            ffmpeg_exit = exits.ffmpeg
        ),
    );
    let opusenc = write_script(
        &bin,
        "opusenc",
        &format!(
            "printf '%s\\n' \"$@\" > '{logs_s}/opusenc.args'\n\
             for last; do :; done\n\
             cat > \"$last\"\n\
             exit {opusenc_exit}",
            opusenc_exit = exits.opusenc
        ),
    );

    (book, ToolsConfig { ffmpeg, ffprobe, opusenc }, logs)
}

fn config(book: &Path, output: &Path, tools: ToolsConfig, root: &Path) -> EncodeConfig {
    EncodeConfig {
        folder: book.to_path_buf(),
        output: Some(output.to_path_buf()),
        options: EncodeOptions {
            speed: Speed::new(25),
            ..EncodeOptions::default()
        },
        tools,
        noise_model: NoiseModelOptions {
            url: url::Url::parse("http://127.0.0.1:9/sh.rnnn").unwrap(),
            cache_dir: root.join("cache"),
            sha256: None,
            timeout_secs: 1,
        },
        dry_run: false,
    }
}

#[tokio::test]
async fn encodes_book_through_tool_pipeline() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let root = tempfile::tempdir().unwrap();
    let (book, tools, logs) = setup(root.path(), CLEAN);
    let output = root.path().join("out.opus");

    let recorder = Recorder::default();
    let result = encode(&config(&book, &output, tools, root.path()), &recorder)
        .await
        .unwrap();

    assert!(!result.dry_run);
    assert_eq!(result.file_count, 2);
    assert_eq!(result.title, "The Long Road");
    assert_eq!(result.source_secs, 3000.5);
    assert_eq!(std::fs::read(&output).unwrap(), b"RIFFfakewav");

    // Progress total is the sped-up length; positions come from ffmpeg stats.
    assert_eq!(*recorder.total.lock().unwrap(), Some(3000.5 / 1.25));
    assert_eq!(*recorder.positions.lock().unwrap(), vec![600.0, 2400.0]);
    assert!(recorder.phases.lock().unwrap().contains(&"Encoding".to_string()));

    let ffmpeg_args = std::fs::read_to_string(logs.join("ffmpeg.args")).unwrap();
    assert!(ffmpeg_args.contains("Part01.mp3\n-i\n"));
    assert!(ffmpeg_args.contains("[0:a][1:a]concat=n=2:v=0:a=1,atempo=1.250000\n"));

    // Dropped: the "(05:12)" marker, the repeated name at the part boundary,
    // and the indented scene.
    let opusenc_args = std::fs::read_to_string(logs.join("opusenc.args")).unwrap();
    assert!(opusenc_args.contains("--title\nThe Long Road\n"));
    assert!(opusenc_args.contains("--album\nThe Long Road - Overdrive\n"));
    assert!(opusenc_args.contains("CHAPTER01NAME=Opening Credits\n"));
    assert!(opusenc_args.contains("CHAPTER02=00:00:16.400\n"));
    assert!(opusenc_args.contains("CHAPTER03NAME=Chapter 2 & More\n"));
    assert!(opusenc_args.contains("CHAPTER04NAME=Chapter 3\n"));
    assert!(!opusenc_args.contains("CHAPTER05"));
    assert!(!opusenc_args.contains("continued"));
    assert!(opusenc_args.contains("--picture\n"));
    assert_eq!(result.chapter_count, 4);
}

#[tokio::test]
async fn dry_run_builds_commands_without_running_them() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let root = tempfile::tempdir().unwrap();
    let (book, tools, logs) = setup(root.path(), CLEAN);
    let output = root.path().join("out.opus");

    let mut cfg = config(&book, &output, tools, root.path());
    cfg.dry_run = true;
    cfg.options.isolate_voice = true;

    let recorder = Recorder::default();
    let result = encode(&cfg, &recorder).await.unwrap();

    assert!(result.dry_run);
    assert!(!output.exists());
    assert!(!logs.join("ffmpeg.args").exists());
    assert!(recorder.positions.lock().unwrap().is_empty());

    // The model is referenced at its cache path but never downloaded.
    let model = root.path().join("cache").join("voice.rnnn");
    assert!(!model.exists());
    assert!(result.ffmpeg.to_string().contains("arnndn=m="));
}

#[tokio::test]
async fn encoder_failure_is_reported() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let root = tempfile::tempdir().unwrap();
    let (book, tools, _logs) = setup(root.path(), Exits { ffmpeg: 0, opusenc: 3 });
    let output = root.path().join("out.opus");

    let err = encode(&config(&book, &output, tools, root.path()), &Recorder::default())
        .await
        .unwrap_err();

    match err {
        ConvertError::Tool { tool, message } => {
            assert_eq!(tool, "opusenc");
            assert!(message.contains("exit"));
        }
        other => panic!("expected tool error, got {other:?}"),
    }
}

#[tokio::test]
async fn decoder_failure_is_reported() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let root = tempfile::tempdir().unwrap();
    let (book, tools, _logs) = setup(root.path(), Exits { ffmpeg: 1, opusenc: 0 });
    let output = root.path().join("out.opus");

    let err = encode(&config(&book, &output, tools, root.path()), &Recorder::default())
        .await
        .unwrap_err();

    match err {
        ConvertError::Tool { tool, message } => {
            assert_eq!(tool, "ffmpeg");
            assert!(message.contains("exit"));
        }
        other => panic!("expected tool error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_encoder_stops_decoder() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let root = tempfile::tempdir().unwrap();
    let (book, mut tools, logs) = setup(root.path(), CLEAN);
    let output = root.path().join("out.opus");

    // A decoder that would hang for a long time unless it is killed.
    tools.ffmpeg = write_script(
        &root.path().join("bin"),
        "ffmpeg",
        &format!(
            "printf '%s\\n' \"$@\" > '{}/ffmpeg.args'\nexec sleep 60",
            logs.display()
        ),
    );
    tools.opusenc = root.path().join("absent").join("opusenc");

    let started = Instant::now();
    let err = encode(&config(&book, &output, tools, root.path()), &Recorder::default())
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(30));
    match err {
        ConvertError::Tool { tool, message } => {
            assert_eq!(tool, "opusenc");
            assert!(message.contains("failed to spawn"));
        }
        other => panic!("expected tool error, got {other:?}"),
    }
}
