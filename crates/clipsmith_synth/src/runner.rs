use std::path::PathBuf;
use std::process::Stdio;

use clipsmith_core::types::TimeUs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::assemble::Command;
use crate::error::{Result, SynthError};

// ---------------------------------------------------------------------------
// Collaborator contract
// ---------------------------------------------------------------------------

/// What one execution returned. Timeout policy wraps this call on the
/// caller's side; the engine itself never runs commands.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The process-execution collaborator seam.
pub trait CommandRunner {
    fn run(&self, command: &Command) -> impl std::future::Future<Output = Result<RunOutput>> + Send;
}

/// Progress snapshot parsed from the tool's stderr, forwarded by the
/// caller to its own progress channel (websocket layer, job table, ...).
#[derive(Debug, Clone, Default)]
pub struct RenderProgress {
    pub percent: f64,
    pub frame: u64,
    pub fps: f64,
    pub speed: String,
    pub eta_seconds: Option<f64>,
}

// ---------------------------------------------------------------------------
// FfmpegRunner
// ---------------------------------------------------------------------------

pub struct FfmpegRunner {
    binary: PathBuf,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// The concat-list sidecar is part of the command; materialize it
    /// before the tool opens it.
    async fn write_sidecar(&self, command: &Command) -> Result<()> {
        if let Some(list) = &command.concat_list {
            tokio::fs::write(&list.path, &list.contents).await?;
        }
        Ok(())
    }

    /// Run while streaming stderr, publishing progress on a watch channel.
    pub async fn run_with_progress(
        &self,
        command: &Command,
        progress_tx: watch::Sender<RenderProgress>,
        total_duration: TimeUs,
    ) -> Result<RunOutput> {
        self.write_sidecar(command).await?;

        let mut child = tokio::process::Command::new(&self.binary)
            .args(command.to_argv())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(map_spawn_error)?;

        let stderr = child.stderr.take().ok_or(SynthError::FfmpegNotFound)?;
        let mut lines = BufReader::new(stderr).lines();
        let total_secs = total_duration.as_seconds();

        let mut captured = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(progress) = parse_progress(&line, total_secs) {
                let _ = progress_tx.send(progress);
            } else {
                captured.push_str(&line);
                captured.push('\n');
            }
        }

        let status = child.wait().await?;
        Ok(RunOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::new(),
            stderr: captured,
        })
    }
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for FfmpegRunner {
    async fn run(&self, command: &Command) -> Result<RunOutput> {
        self.write_sidecar(command).await?;

        tracing::info!(
            output = %command.output_path.display(),
            "executing synthesized command"
        );
        let output = tokio::process::Command::new(&self.binary)
            .args(command.to_argv())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(map_spawn_error)?;

        Ok(RunOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn map_spawn_error(err: std::io::Error) -> SynthError {
    if err.kind() == std::io::ErrorKind::NotFound {
        SynthError::FfmpegNotFound
    } else {
        SynthError::Io(err)
    }
}

// ---------------------------------------------------------------------------
// Progress parsing
// ---------------------------------------------------------------------------

/// Parse one stderr status line, e.g.
/// `frame=  123 fps= 60 ... time=00:01:02.05 speed=1.50x`.
pub fn parse_progress(line: &str, total_secs: f64) -> Option<RenderProgress> {
    if !line.contains("time=") {
        return None;
    }

    let frame = field_after(line, "frame=")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let fps = field_after(line, "fps=")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    let speed = field_after(line, "speed=").unwrap_or_default();
    let elapsed = field_after(line, "time=")
        .and_then(|v| parse_clock(&v))
        .unwrap_or(0.0);

    let percent = if total_secs > 0.0 {
        (elapsed / total_secs * 100.0).min(100.0)
    } else {
        0.0
    };

    let speed_factor: f64 = speed.trim_end_matches('x').parse().unwrap_or(0.0);
    let eta_seconds = if speed_factor > 0.0 && total_secs > elapsed {
        Some((total_secs - elapsed) / speed_factor)
    } else {
        None
    };

    Some(RenderProgress {
        percent,
        frame,
        fps,
        speed,
        eta_seconds,
    })
}

/// Value following `key` in a key=value status line; the tool pads some
/// values with spaces after the equals sign.
fn field_after(line: &str, key: &str) -> Option<String> {
    let rest = line[line.find(key)? + key.len()..].trim_start();
    let end = rest
        .find(|c: char| c.is_whitespace())
        .unwrap_or(rest.len());
    let value = &rest[..end];
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse an `HH:MM:SS.cc` clock into seconds.
fn parse_clock(s: &str) -> Option<f64> {
    let mut parts = s.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let mins: f64 = parts.next()?.parse().ok()?;
    let secs: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + mins * 60.0 + secs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_progress_extracts_fields() {
        let line = "frame=  150 fps= 30 q=28.0 size=    1024kB time=00:00:05.00 bitrate= 200.0kbits/s speed=1.50x";
        let progress = parse_progress(line, 10.0).unwrap();

        assert_eq!(progress.frame, 150);
        assert!((progress.fps - 30.0).abs() < 0.01);
        assert!((progress.percent - 50.0).abs() < 0.1);
        assert_eq!(progress.speed, "1.50x");
        assert!((progress.eta_seconds.unwrap() - 3.33).abs() < 0.1);
    }

    #[test]
    fn parse_progress_skips_non_status_lines() {
        assert!(parse_progress("Input #0, mov,mp4...", 10.0).is_none());
        assert!(parse_progress("Stream #0:0: Video: h264", 10.0).is_none());
        assert!(parse_progress("", 10.0).is_none());
    }

    #[test]
    fn parse_progress_handles_zero_total() {
        let line = "frame=  10 fps= 30 time=00:00:01.00 speed=1.00x";
        let progress = parse_progress(line, 0.0).unwrap();
        assert!((progress.percent - 0.0).abs() < 0.01);
        assert!(progress.eta_seconds.is_none());
    }

    #[test]
    fn parse_clock_values() {
        assert!((parse_clock("00:01:02.05").unwrap() - 62.05).abs() < 1e-9);
        assert!((parse_clock("01:00:00.00").unwrap() - 3600.0).abs() < 1e-9);
        assert!(parse_clock("00:00").is_none());
        assert!(parse_clock("junk").is_none());
    }

    #[test]
    fn field_after_tolerates_padding() {
        let line = "frame=  150 fps= 30.0 time=00:00:05.00 speed=1.50x";
        assert_eq!(field_after(line, "frame=").unwrap(), "150");
        assert_eq!(field_after(line, "fps=").unwrap(), "30.0");
        assert_eq!(field_after(line, "speed=").unwrap(), "1.50x");
        assert!(field_after(line, "bitrate=").is_none());
    }
}
