//! Video streams backed by ffmpeg subprocesses.
//!
//! Frames cross the process boundary as packed RGB24: the decoder writes them
//! to its stdout, the encoder reads them from its stdin.

pub mod sink;
pub mod source;

use futures_util::stream::{self, Stream};
use motion_extract_common::config::FfmpegConfig;
use motion_extract_common::frame::{Frame, FrameSize};
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use sink::{SinkError, SinkReport, VideoSink};
pub use source::{SourceError, VideoSource};

/// A finite, forward-only supply of frames.
#[allow(async_fn_in_trait)]
pub trait FrameSource {
    /// The next frame, or `None` once the stream has ended. Read failures
    /// end the stream the same way end-of-data does.
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Release the underlying stream.
    async fn close(self);
}

/// An append-only destination for frames of one fixed size.
#[allow(async_fn_in_trait)]
pub trait FrameSink {
    fn frame_size(&self) -> FrameSize;

    async fn write(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Flush and release the destination.
    async fn close(self) -> Result<SinkReport, SinkError>;
}

/// Lazily pull frames from `source` until it is exhausted.
pub fn frames<S: FrameSource>(source: &mut S) -> impl Stream<Item = Frame> + '_ {
    stream::unfold(source, |source| async move {
        let frame = source.next_frame().await?;
        Some((frame, source))
    })
}

/// How much of a child's stderr is kept for error reports.
const STDERR_TAIL: usize = 16 * 1024;

/// Read a child's stderr to the end so the child never blocks on a full pipe.
/// Resolves to the last [`STDERR_TAIL`] bytes once the pipe closes.
fn drain_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut tail = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match stderr.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.extend_from_slice(&chunk[..n]);
                    if tail.len() > STDERR_TAIL {
                        let excess = tail.len() - STDERR_TAIL;
                        tail.drain(..excess);
                    }
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    })
}

/// Collect what a drain task captured. A task that panicked or was aborted
/// yields an empty report.
async fn stderr_report(drain: JoinHandle<String>) -> String {
    drain.await.unwrap_or_default()
}

/// Check whether ffmpeg and ffprobe can be run. Logs a warning if not.
pub async fn ffmpeg_available(config: &FfmpegConfig) -> bool {
    let mut available = true;
    for program in [&config.ffmpeg_bin, &config.ffprobe_bin] {
        match Command::new(program).arg("-version").output().await {
            Ok(out) if out.status.success() => {
                debug!(program = program.as_str(), "found on PATH");
            }
            Ok(_) => {
                warn!(program = program.as_str(), "returned non-zero for -version; decoding may fail");
                available = false;
            }
            Err(e) => {
                warn!(
                    program = program.as_str(),
                    error = %e,
                    "not found; install ffmpeg to read and write video files"
                );
                available = false;
            }
        }
    }
    available
}

#[cfg(all(test, unix))]
pub(crate) mod stub {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Write an executable `sh` script named `name` into `dir`.
    pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// An ffprobe stand-in reporting one video stream.
    pub fn ffprobe(dir: &Path, width: u32, height: u32, rate: &str) -> PathBuf {
        script(
            dir,
            "ffprobe",
            &format!(
                r#"echo '{{"streams":[{{"width":{width},"height":{height},"avg_frame_rate":"{rate}","r_frame_rate":"{rate}"}}]}}'"#
            ),
        )
    }
}
