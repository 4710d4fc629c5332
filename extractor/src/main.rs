mod motion;
mod pipeline;
mod video;

use clap::Parser;
use motion_extract_common::config::Config;
use std::path::PathBuf;
use tracing::{error, info};

/// Extract motion from a video into a side-by-side comparison video.
#[derive(Parser, Debug)]
#[command(name = "motion-extract")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Input video (overrides pipeline.input)
    #[arg(short, long, value_name = "PATH")]
    input: Option<PathBuf>,

    /// Output video or directory (overrides pipeline.output)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Resolution scale ratio (overrides pipeline.resolution_ratio)
    #[arg(short = 'r', long, value_name = "RATIO")]
    ratio: Option<f64>,

    /// Motion threshold, 0-255 (overrides motion.threshold)
    #[arg(short, long, value_name = "LUMA")]
    threshold: Option<u8>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Some(input) = args.input {
        config.pipeline.input = input;
    }
    if let Some(output) = args.output {
        config.pipeline.output = output;
    }
    if let Some(ratio) = args.ratio {
        config.pipeline.resolution_ratio = ratio;
    }
    if let Some(threshold) = args.threshold {
        config.motion.threshold = threshold;
    }
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        input = %config.pipeline.input.display(),
        output = %config.pipeline.output.display(),
        resolution_ratio = config.pipeline.resolution_ratio,
        threshold = config.motion.threshold,
        fill_color = ?config.motion.fill_color.0,
        "starting motion extraction"
    );

    // Decoding and encoding both fail without ffmpeg.
    video::ffmpeg_available(&config.ffmpeg).await;

    if let Err(e) = pipeline::run(&config).await {
        error!(error = %e, "motion extraction failed");
        std::process::exit(1);
    }
}
