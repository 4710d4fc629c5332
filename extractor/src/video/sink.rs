use std::path::{Path, PathBuf};
use std::process::Stdio;

use motion_extract_common::config::FfmpegConfig;
use motion_extract_common::frame::{Frame, FrameError, FrameSize};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use super::{drain_stderr, stderr_report, FrameSink};

/// Four-character code tagged on the encoded video stream.
pub const FOURCC: &str = "mp4v";

/// ffmpeg encoder that produces `FOURCC` streams.
const CODEC: &str = "mpeg4";

/// Encodes RGB24 frames into a video file through an ffmpeg subprocess.
pub struct VideoSink {
    child: Child,
    stdin: ChildStdin,
    stderr: JoinHandle<String>,
    output_path: PathBuf,
    frame_size: FrameSize,
    frame_count: u64,
}

#[derive(Debug)]
pub struct SinkReport {
    pub path: PathBuf,
    pub frame_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("cannot write video to {path}: {reason}")]
    Unwritable { path: String, reason: String },
    #[error("frame does not match the output video: {0}")]
    DimensionMismatch(FrameError),
    #[error("failed to write frame to encoder stdin: {0}")]
    Write(String),
    #[error("failed to wait for encoder: {0}")]
    Wait(String),
    #[error("encoder exited with non-zero status: {0}")]
    Finish(String),
}

impl VideoSink {
    /// Create (or truncate) `path` and spawn an encoder expecting frames of
    /// exactly `frame_size` at `frame_rate` frames per second.
    pub async fn open(
        path: &Path,
        frame_rate: f64,
        frame_size: FrameSize,
        ffmpeg: &FfmpegConfig,
    ) -> Result<Self, SinkError> {
        let unwritable = |reason: String| SinkError::Unwritable {
            path: path.display().to_string(),
            reason,
        };

        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(unwritable(format!("invalid frame rate {frame_rate}")));
        }
        if frame_size.is_empty() {
            return Err(unwritable(format!("invalid frame size {frame_size}")));
        }
        check_encoder(&ffmpeg.ffmpeg_bin).await.map_err(unwritable)?;

        tokio::fs::File::create(path)
            .await
            .map_err(|e| unwritable(e.to_string()))?;

        let size_str = frame_size.to_string();
        let fps_str = frame_rate.to_string();
        let quality_str = ffmpeg.quality.to_string();

        let mut cmd = Command::new(&ffmpeg.ffmpeg_bin);
        cmd.args([
            "-hide_banner",
            "-loglevel", "error",
            "-f", "rawvideo",
            "-pix_fmt", "rgb24",
            "-s", &size_str,
            "-r", &fps_str,
            "-i", "pipe:0",
            "-c:v", CODEC,
            "-tag:v", FOURCC,
            "-q:v", &quality_str,
            "-pix_fmt", "yuv420p",
            "-y",
        ])
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            unwritable(format!("failed to spawn {}: {e}", ffmpeg.ffmpeg_bin))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| unwritable("could not get encoder stdin handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| unwritable("could not get encoder stderr handle".into()))?;

        debug!(
            fourcc = FOURCC,
            size = %frame_size,
            fps = frame_rate,
            quality = ffmpeg.quality,
            output = %path.display(),
            "ffmpeg encoder started"
        );

        Ok(Self {
            child,
            stdin,
            stderr: drain_stderr(stderr),
            output_path: path.to_path_buf(),
            frame_size,
            frame_count: 0,
        })
    }
}

impl FrameSink for VideoSink {
    fn frame_size(&self) -> FrameSize {
        self.frame_size
    }

    /// Append one frame. Its size must equal the size given at open.
    async fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        frame
            .ensure_size(self.frame_size)
            .map_err(SinkError::DimensionMismatch)?;
        self.stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;
        self.frame_count += 1;
        trace!(frame_count = self.frame_count, "pushed frame to encoder");
        Ok(())
    }

    /// Finalize the video: close stdin and wait for ffmpeg to finish writing.
    async fn close(mut self) -> Result<SinkReport, SinkError> {
        let flushed = self.stdin.shutdown().await;
        // Dropping stdin signals end of input.
        drop(self.stdin);

        let status = self
            .child
            .wait()
            .await
            .map_err(|e| SinkError::Wait(e.to_string()))?;

        if !status.success() {
            let stderr = stderr_report(self.stderr).await;
            error!(status = %status, stderr = %stderr, "ffmpeg exited with error");
            return Err(SinkError::Finish(stderr));
        }
        flushed.map_err(|e| SinkError::Write(e.to_string()))?;

        info!(
            frame_count = self.frame_count,
            output = %self.output_path.display(),
            "video encoding complete"
        );

        Ok(SinkReport {
            path: self.output_path,
            frame_count: self.frame_count,
        })
    }
}

/// Ask `ffmpeg_bin` for its encoder list and make sure [`CODEC`] is on it.
async fn check_encoder(ffmpeg_bin: &str) -> Result<(), String> {
    let output = Command::new(ffmpeg_bin)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("failed to spawn {ffmpeg_bin}: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{ffmpeg_bin} cannot list encoders: {}", stderr.trim()));
    }

    // Rows look like ` V....D mpeg4   MPEG-4 part 2`.
    let listed = String::from_utf8_lossy(&output.stdout)
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(CODEC));
    if listed {
        Ok(())
    } else {
        Err(format!("{ffmpeg_bin} has no {CODEC} encoder"))
    }
}
