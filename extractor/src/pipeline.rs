use std::path::PathBuf;

use futures_util::StreamExt;
use motion_extract_common::config::Config;
use motion_extract_common::frame::{Frame, FrameError, FrameSize};
use tracing::{debug, error, info};

use crate::motion::{compose, diff, recolor, RecolorOptions};
use crate::video::{
    frames, FrameSink, FrameSource, SinkError, SourceError, VideoSink, VideoSource,
};

/// Lifecycle of one run. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Opened,
    Streaming,
    Closed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Failed)
    }

    pub fn can_advance_to(self, next: Phase) -> bool {
        match (self, next) {
            (Phase::Init, Phase::Opened)
            | (Phase::Opened, Phase::Streaming)
            | (Phase::Streaming, Phase::Closed) => true,
            (current, Phase::Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            self.can_advance_to(next),
            "illegal phase transition {self:?} -> {next:?}"
        );
        debug!(from = ?*self, to = ?next, "phase transition");
        *self = next;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("resolution ratio {ratio} scales {original} down to an empty frame")]
    InvalidResolution { ratio: f64, original: FrameSize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_written: u64,
    /// Frames whose difference from their predecessor was exactly zero.
    pub identical_frames: u64,
    pub output: PathBuf,
}

/// Turns a sequence of frames into side-by-side (frame, motion) composites.
pub struct MotionPipeline {
    working_size: FrameSize,
    options: RecolorOptions,
    /// The only state carried from one frame to the next.
    previous: Option<Frame>,
    identical_frames: u64,
}

impl MotionPipeline {
    pub fn new(working_size: FrameSize, options: RecolorOptions) -> Self {
        Self {
            working_size,
            options,
            previous: None,
            identical_frames: 0,
        }
    }

    /// Size of every composite this pipeline produces.
    pub fn output_size(&self) -> FrameSize {
        self.working_size.side_by_side()
    }

    /// Process one input frame.
    ///
    /// The frame is resized to the working size and differenced against the
    /// previous one. The first frame only establishes the baseline and yields
    /// `None`. Every frame becomes the new baseline, whatever the outcome.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<Option<Frame>, FrameError> {
        let current = frame.resized(self.working_size);
        let (difference, current) = diff(self.previous.take(), current)?;

        let composite = difference.map(|difference| {
            if difference.is_zero() {
                self.identical_frames += 1;
            }
            let motion = recolor(&difference, &self.options);
            compose(&current, &motion)
        });

        self.previous = Some(current);
        composite.transpose()
    }
}

/// Open the configured input and output and run the pipeline over them.
pub async fn run(config: &Config) -> Result<RunSummary, PipelineError> {
    let mut phase = Phase::Init;
    debug!(input = %config.pipeline.input.display(), "opening video source");
    let source = match VideoSource::open(&config.pipeline.input, &config.ffmpeg).await {
        Ok(source) => source,
        Err(e) => {
            phase.advance(Phase::Failed);
            error!(error = %e, "failed to open video source");
            return Err(e.into());
        }
    };
    let info = source.info();

    let ratio = config.pipeline.resolution_ratio;
    let working_size = info.size.scaled(ratio);
    if working_size.is_empty() {
        source.close().await;
        phase.advance(Phase::Failed);
        error!(ratio, size = %info.size, "resolution ratio too small");
        return Err(PipelineError::InvalidResolution {
            ratio,
            original: info.size,
        });
    }

    let pipeline = MotionPipeline::new(working_size, RecolorOptions::from(&config.motion));
    let output = config.pipeline.resolved_output();
    // Sources slower than one frame per second still get a valid rate.
    let frame_rate = info.frame_rate.round().max(1.0);

    let opened =
        VideoSink::open(&output, frame_rate, pipeline.output_size(), &config.ffmpeg).await;
    let sink = match opened {
        Ok(sink) => sink,
        Err(e) => {
            source.close().await;
            phase.advance(Phase::Failed);
            error!(error = %e, "failed to open video sink");
            return Err(e.into());
        }
    };
    phase.advance(Phase::Opened);

    info!(
        working_size = %working_size,
        output_size = %pipeline.output_size(),
        frame_rate,
        output = %output.display(),
        "pipeline opened"
    );

    execute(source, sink, pipeline).await
}

/// Stream every frame of `source` through `pipeline` into `sink`.
///
/// Both ends are closed exactly once on every path. The first error wins.
pub async fn execute<S, K>(
    mut source: S,
    mut sink: K,
    mut pipeline: MotionPipeline,
) -> Result<RunSummary, PipelineError>
where
    S: FrameSource,
    K: FrameSink,
{
    let mut phase = Phase::Opened;
    phase.advance(Phase::Streaming);
    let streamed = stream_into(&mut source, &mut sink, &mut pipeline).await;

    source.close().await;
    let closed = sink.close().await;

    let summary = match (streamed, closed) {
        (Ok((frames_read, frames_written)), Ok(report)) => {
            debug_assert_eq!(frames_written, report.frame_count);
            RunSummary {
                frames_read,
                frames_written,
                identical_frames: pipeline.identical_frames,
                output: report.path,
            }
        }
        (Err(e), _) => {
            phase.advance(Phase::Failed);
            error!(error = %e, "pipeline failed");
            return Err(e);
        }
        (Ok(_), Err(e)) => {
            phase.advance(Phase::Failed);
            error!(error = %e, "failed to finalize output");
            return Err(e.into());
        }
    };
    phase.advance(Phase::Closed);

    info!(
        frames_read = summary.frames_read,
        frames_written = summary.frames_written,
        identical_frames = summary.identical_frames,
        output = %summary.output.display(),
        "motion extraction complete"
    );
    Ok(summary)
}

async fn stream_into<S, K>(
    source: &mut S,
    sink: &mut K,
    pipeline: &mut MotionPipeline,
) -> Result<(u64, u64), PipelineError>
where
    S: FrameSource,
    K: FrameSink,
{
    let expected = sink.frame_size();
    if pipeline.output_size() != expected {
        return Err(FrameError::DimensionMismatch {
            expected,
            actual: pipeline.output_size(),
        }
        .into());
    }

    let stream = frames(source);
    futures_util::pin_mut!(stream);

    let mut frames_read = 0u64;
    let mut frames_written = 0u64;
    while let Some(frame) = stream.next().await {
        frames_read += 1;
        if let Some(composite) = pipeline.process_frame(&frame)? {
            sink.write(&composite).await?;
            frames_written += 1;
        }
        if frames_read % 100 == 0 {
            debug!(frames_read, frames_written, "frames processed");
        }
    }

    Ok((frames_read, frames_written))
}
