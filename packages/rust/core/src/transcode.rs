//! ffmpeg → opusenc process pipeline.
//!
//! ffmpeg writes WAV to a pipe that becomes opusenc's stdin. ffmpeg's
//! `-stats` output on stderr is `\r`-terminated and is followed to report
//! progress until the decoder closes it.

use std::io::{BufRead, BufReader, Read};
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;

use overdrive2opus_shared::{ConvertError, Result, parse_timestamp};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::command::CommandLine;

/// Matches `time=00:01:02.34` in an ffmpeg stats line.
static STATS_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*time\s*=\s*(\S+)\s*").expect("stats time regex"));

/// Receives the decoder's output position in seconds.
pub trait TranscodeProgress {
    fn position(&self, seconds: f64);
}

/// Extract the output timestamp from one ffmpeg stats line.
pub fn parse_stats_time(line: &str) -> Option<f64> {
    let caps = STATS_TIME_RE.captures(line)?;
    parse_timestamp(&caps[1]).ok()
}

/// Read ffmpeg stats until EOF, reporting monotonically increasing positions.
/// Returns the last position seen.
pub fn follow_stats<R: Read>(stats: R, progress: &dyn TranscodeProgress) -> std::io::Result<f64> {
    let mut reader = BufReader::new(stats);
    let mut buf = Vec::new();
    let mut last = 0.0;

    loop {
        buf.clear();
        if reader.read_until(b'\r', &mut buf)? == 0 {
            break;
        }

        let chunk = String::from_utf8_lossy(&buf);
        for line in chunk.split(['\r', '\n']) {
            if let Some(pos) = parse_stats_time(line) {
                if pos > last {
                    last = pos;
                    progress.position(pos);
                }
            }
        }
    }

    Ok(last)
}

/// Run the decoder/encoder pair to completion.
#[instrument(skip_all)]
pub fn run(ffmpeg: &CommandLine, opusenc: &CommandLine, progress: &dyn TranscodeProgress) -> Result<()> {
    debug!(%ffmpeg, "ffmpeg command");
    debug!(%opusenc, "opusenc command");

    let mut decoder = ffmpeg
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(ffmpeg, e))?;

    let pcm = decoder
        .stdout
        .take()
        .ok_or_else(|| ConvertError::tool(ffmpeg.name(), "failed to capture stdout"))?;
    let stats = decoder
        .stderr
        .take()
        .ok_or_else(|| ConvertError::tool(ffmpeg.name(), "failed to capture stderr"))?;

    let mut encoder = match opusenc
        .to_command()
        .stdin(Stdio::from(pcm))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            // Nothing will drain the pipe; don't leave the decoder blocked on it.
            let _ = decoder.kill();
            let _ = decoder.wait();
            return Err(spawn_error(opusenc, e));
        }
    };

    let last = match follow_stats(stats, progress) {
        Ok(pos) => pos,
        Err(e) => {
            warn!(error = %e, "lost ffmpeg stats stream");
            0.0
        }
    };

    let encoder_status = encoder
        .wait()
        .map_err(|e| ConvertError::tool(opusenc.name(), format!("failed to wait: {e}")))?;
    let decoder_status = decoder
        .wait()
        .map_err(|e| ConvertError::tool(ffmpeg.name(), format!("failed to wait: {e}")))?;

    check_status(opusenc, encoder_status)?;
    check_status(ffmpeg, decoder_status)?;

    info!(position_secs = last, "transcode finished");
    Ok(())
}

fn spawn_error(cmd: &CommandLine, e: std::io::Error) -> ConvertError {
    ConvertError::tool(
        cmd.name(),
        format!("failed to spawn `{}`: {e}", cmd.program.display()),
    )
}

fn check_status(cmd: &CommandLine, status: ExitStatus) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(ConvertError::tool(cmd.name(), format!("exited with {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<f64>>);

    impl TranscodeProgress for Recorder {
        fn position(&self, seconds: f64) {
            self.0.lock().unwrap().push(seconds);
        }
    }

    #[test]
    fn parses_stats_lines() {
        let line = "size=    1024kB time=00:01:02.50 bitrate= 134.2kbits/s speed=61.3x";
        assert_eq!(parse_stats_time(line), Some(62.5));
        assert_eq!(parse_stats_time("size=N/A time=N/A bitrate=N/A"), None);
        assert_eq!(parse_stats_time("Press [q] to stop"), None);
    }

    #[test]
    fn follows_carriage_return_stream() {
        let stream = b"size=1kB time=00:00:01.00 x\rsize=2kB time=00:00:03.00 x\r\
size=2kB time=00:00:02.00 x\rjunk\nsize=3kB time=00:01:00.00 x\n";
        let recorder = Recorder::default();
        let last = follow_stats(Cursor::new(&stream[..]), &recorder).unwrap();

        assert_eq!(last, 60.0);
        assert_eq!(*recorder.0.lock().unwrap(), vec![1.0, 3.0, 60.0]);
    }

    #[test]
    fn missing_decoder_is_tool_error() {
        let ffmpeg = CommandLine::new("o2o-test-definitely-missing-ffmpeg");
        let opusenc = CommandLine::new("o2o-test-definitely-missing-opusenc");
        let err = run(&ffmpeg, &opusenc, &Recorder::default()).unwrap_err();
        assert!(err.to_string().contains("o2o-test-definitely-missing-ffmpeg"));
    }
}
