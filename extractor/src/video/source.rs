use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use motion_extract_common::config::FfmpegConfig;
use motion_extract_common::frame::{Frame, FrameSize};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{drain_stderr, stderr_report, FrameSource};

/// Stream metadata probed before decoding starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub size: FrameSize,
    pub frame_rate: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("no readable video at {path}: {reason}")]
    NotFound { path: String, reason: String },
    #[error("unusable metadata for {path}: {reason}")]
    Metadata { path: String, reason: String },
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },
}

/// Decodes a video file into RGB24 frames through an ffmpeg subprocess.
pub struct VideoSource {
    path: PathBuf,
    info: VideoInfo,
    child: Child,
    /// `None` once the stream has ended.
    stdout: Option<BufReader<ChildStdout>>,
    stderr: JoinHandle<String>,
    frames_read: u64,
}

impl VideoSource {
    /// Probe `path` and start decoding it.
    ///
    /// Fails with [`SourceError::NotFound`] before anything is spawned when
    /// the path does not name a readable file.
    pub async fn open(path: &Path, ffmpeg: &FfmpegConfig) -> Result<Self, SourceError> {
        let not_found = |reason: String| SourceError::NotFound {
            path: path.display().to_string(),
            reason,
        };

        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| not_found(e.to_string()))?;
        let metadata = file.metadata().await.map_err(|e| not_found(e.to_string()))?;
        if !metadata.is_file() {
            return Err(not_found("not a regular file".into()));
        }
        drop(file);

        let info = probe(path, &ffmpeg.ffprobe_bin).await?;

        let mut child = Command::new(&ffmpeg.ffmpeg_bin)
            .args(["-nostdin", "-v", "error", "-noautorotate", "-i"])
            .arg(path)
            .args([
                "-map", "0:v:0",
                "-vsync", "0",
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Spawn {
                program: ffmpeg.ffmpeg_bin.clone(),
                reason: e.to_string(),
            })?;

        let handle_missing = |stream: &str| SourceError::Spawn {
            program: ffmpeg.ffmpeg_bin.clone(),
            reason: format!("could not get {stream} handle"),
        };
        let stdout = child.stdout.take().ok_or_else(|| handle_missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| handle_missing("stderr"))?;

        info!(
            path = %path.display(),
            size = %info.size,
            frame_rate = info.frame_rate,
            "video source opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            child,
            stdout: Some(BufReader::with_capacity(info.size.byte_len(), stdout)),
            stderr: drain_stderr(stderr),
            frames_read: 0,
        })
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }
}

impl FrameSource for VideoSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        let stdout = self.stdout.as_mut()?;
        let mut buf = vec![0u8; self.info.size.byte_len()];

        if let Err(e) = stdout.read_exact(&mut buf).await {
            if e.kind() == ErrorKind::UnexpectedEof {
                debug!(frames_read = self.frames_read, "decoder reached end of stream");
            } else {
                warn!(error = %e, frames_read = self.frames_read, "decoder read failed, ending stream");
            }
            self.stdout = None;
            return None;
        }

        match Frame::from_raw(self.info.size, buf) {
            Ok(frame) => {
                self.frames_read += 1;
                Some(frame)
            }
            Err(e) => {
                warn!(error = %e, "decoded frame has unexpected layout, ending stream");
                self.stdout = None;
                None
            }
        }
    }

    /// Stops the decoder if frames remain unread, then reaps it. A decoder
    /// that failed after the stream ended is reported as a warning only.
    async fn close(mut self) {
        let exhausted = self.stdout.take().is_none();
        if !exhausted {
            self.stderr.abort();
            if let Err(e) = self.child.start_kill() {
                debug!(error = %e, "decoder already exited");
            }
        }

        match self.child.wait().await {
            Ok(status) if exhausted && !status.success() => {
                let stderr = stderr_report(self.stderr).await;
                warn!(
                    path = %self.path.display(),
                    status = %status,
                    stderr = %stderr.trim(),
                    frames_read = self.frames_read,
                    "decoder exited abnormally, input may be truncated or corrupt"
                );
            }
            Ok(_) => {
                debug!(frames_read = self.frames_read, "video source closed");
            }
            Err(e) => {
                warn!(error = %e, "failed to wait for decoder");
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    avg_frame_rate: String,
    #[serde(default)]
    r_frame_rate: String,
}

async fn probe(path: &Path, ffprobe: &str) -> Result<VideoInfo, SourceError> {
    let output = Command::new(ffprobe)
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,avg_frame_rate,r_frame_rate",
            "-of", "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| SourceError::Spawn {
            program: ffprobe.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(SourceError::NotFound {
            path: path.display().to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    match video_info(&output.stdout) {
        Ok(Some(info)) => Ok(info),
        Ok(None) => Err(SourceError::NotFound {
            path: path.display().to_string(),
            reason: "no video stream".into(),
        }),
        Err(reason) => Err(SourceError::Metadata {
            path: path.display().to_string(),
            reason,
        }),
    }
}

/// Parse ffprobe's JSON report. `Ok(None)` means the file has no video stream.
fn video_info(json: &[u8]) -> Result<Option<VideoInfo>, String> {
    let probe: ProbeOutput = serde_json::from_slice(json).map_err(|e| e.to_string())?;
    let Some(stream) = probe.streams.into_iter().next() else {
        return Ok(None);
    };

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err("video stream has no dimensions".into());
    };
    let size = FrameSize::new(width, height);
    if size.is_empty() {
        return Err(format!("video stream has empty size {size}"));
    }

    let frame_rate = parse_rate(&stream.avg_frame_rate)
        .or_else(|| parse_rate(&stream.r_frame_rate))
        .ok_or_else(|| {
            format!(
                "no usable frame rate (avg {:?}, r {:?})",
                stream.avg_frame_rate, stream.r_frame_rate
            )
        })?;

    Ok(Some(VideoInfo { size, frame_rate }))
}

/// Parse an ffprobe rational such as `30000/1001` or a plain number.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rate_handles_rationals() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert_eq!(parse_rate("25"), Some(25.0));
        let ntsc = parse_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
    }

    #[test]
    fn parse_rate_rejects_unknown() {
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("0/1"), None);
        assert_eq!(parse_rate(""), None);
        assert_eq!(parse_rate("abc"), None);
    }

    #[test]
    fn video_info_reads_first_stream() {
        let json = br#"{"programs":[],"streams":[{"width":1920,"height":1080,"r_frame_rate":"30/1","avg_frame_rate":"30/1"}]}"#;
        let info = video_info(json).unwrap().unwrap();
        assert_eq!(info.size, FrameSize::new(1920, 1080));
        assert_eq!(info.frame_rate, 30.0);
    }

    #[test]
    fn video_info_falls_back_to_r_frame_rate() {
        let json = br#"{"streams":[{"width":640,"height":480,"r_frame_rate":"24/1","avg_frame_rate":"0/0"}]}"#;
        let info = video_info(json).unwrap().unwrap();
        assert_eq!(info.frame_rate, 24.0);
    }

    #[test]
    fn video_info_without_streams_is_none() {
        assert!(video_info(br#"{"programs":[],"streams":[]}"#).unwrap().is_none());
        assert!(video_info(br#"{}"#).unwrap().is_none());
    }

    #[test]
    fn video_info_rejects_missing_rate() {
        let json = br#"{"streams":[{"width":640,"height":480}]}"#;
        assert!(video_info(json).is_err());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.mp4");
        let result = VideoSource::open(&path, &FfmpegConfig::default()).await;
        assert!(matches!(result, Err(SourceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = VideoSource::open(dir.path(), &FfmpegConfig::default()).await;
        assert!(matches!(result, Err(SourceError::NotFound { .. })));
    }

    #[cfg(unix)]
    mod decoder {
        use super::*;
        use crate::video::{frames, stub};
        use futures_util::StreamExt;
        use std::time::Duration;

        /// A 4x2 source whose decoder runs `decode` in place of ffmpeg.
        async fn open_stub(dir: &Path, decode: &str) -> VideoSource {
            let input = dir.join("input.mp4");
            std::fs::write(&input, b"not really a video").unwrap();
            let config = FfmpegConfig {
                ffmpeg_bin: stub::script(dir, "ffmpeg", decode).display().to_string(),
                ffprobe_bin: stub::ffprobe(dir, 4, 2, "25/1").display().to_string(),
                ..FfmpegConfig::default()
            };
            VideoSource::open(&input, &config).await.unwrap()
        }

        async fn read_all(source: &mut VideoSource) -> Vec<Frame> {
            let decoded = frames(source).collect::<Vec<_>>();
            tokio::time::timeout(Duration::from_secs(10), decoded)
                .await
                .expect("decoder stalled")
        }

        #[tokio::test]
        async fn frames_are_cut_at_frame_boundaries() {
            let dir = tempfile::tempdir().unwrap();
            // Three 4x2 RGB frames of 24 bytes, then 8 stray bytes.
            let mut source = open_stub(dir.path(), "head -c 80 /dev/zero").await;
            assert_eq!(source.info().size, FrameSize::new(4, 2));
            assert_eq!(source.info().frame_rate, 25.0);

            let decoded = read_all(&mut source).await;
            assert_eq!(decoded.len(), 3);
            assert!(decoded.iter().all(|f| f.size() == FrameSize::new(4, 2)));
            assert!(source.next_frame().await.is_none());
            source.close().await;
        }

        #[tokio::test]
        async fn noisy_decoder_keeps_delivering_frames() {
            let dir = tempfile::tempdir().unwrap();
            let mut source = open_stub(
                dir.path(),
                "head -c 300000 /dev/zero | tr '\\0' 'e' >&2\nhead -c 72 /dev/zero",
            )
            .await;

            assert_eq!(read_all(&mut source).await.len(), 3);
            source.close().await;
        }

        #[tokio::test]
        async fn failing_decoder_ends_stream_quietly() {
            let dir = tempfile::tempdir().unwrap();
            let mut source = open_stub(
                dir.path(),
                "head -c 48 /dev/zero\necho 'corrupt packet' >&2\nexit 1",
            )
            .await;

            assert_eq!(read_all(&mut source).await.len(), 2);
            source.close().await;
        }

        #[tokio::test]
        async fn close_stops_an_unfinished_decoder() {
            let dir = tempfile::tempdir().unwrap();
            let mut source = open_stub(dir.path(), "head -c 48 /dev/zero\nexec sleep 60").await;

            assert!(source.next_frame().await.is_some());
            tokio::time::timeout(Duration::from_secs(10), source.close())
                .await
                .expect("close waited for the decoder to finish on its own");
        }
    }
}
