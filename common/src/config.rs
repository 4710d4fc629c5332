use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::frame::Color;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_input")]
    pub input: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Scale applied to the source resolution before differencing.
    #[serde(default = "default_resolution_ratio")]
    pub resolution_ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Luma values at or below this are treated as unchanged.
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    #[serde(default = "default_fill_color")]
    pub fill_color: Color,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FfmpegConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
    /// mpeg4 quantizer scale, 1 (best) to 31.
    #[serde(default = "default_quality")]
    pub quality: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: default_input(),
            output: default_output(),
            resolution_ratio: default_resolution_ratio(),
        }
    }
}

impl PipelineConfig {
    /// The file the composite video is written to. An output path naming an
    /// existing directory resolves to `output.mp4` inside it.
    pub fn resolved_output(&self) -> PathBuf {
        if self.output.is_dir() {
            self.output.join("output.mp4")
        } else {
            self.output.clone()
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            fill_color: default_fill_color(),
        }
    }
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            quality: default_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.pipeline.resolution_ratio;
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "pipeline.resolution_ratio must be a positive number, got {ratio}"
            )));
        }
        if !(1..=31).contains(&self.ffmpeg.quality) {
            return Err(ConfigError::Invalid(format!(
                "ffmpeg.quality must be within 1..=31, got {}",
                self.ffmpeg.quality
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_input() -> PathBuf {
    PathBuf::from("data").join("video.mp4")
}
fn default_output() -> PathBuf {
    PathBuf::from("data").join("output.mp4")
}
fn default_resolution_ratio() -> f64 {
    0.5
}
fn default_threshold() -> u8 {
    25
}
fn default_fill_color() -> Color {
    Color::GREEN
}
fn default_ffmpeg_bin() -> String {
    "ffmpeg".into()
}
fn default_ffprobe_bin() -> String {
    "ffprobe".into()
}
fn default_quality() -> u32 {
    2
}
fn default_log_level() -> String {
    "info".into()
}
