use std::fmt;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use serde::Deserialize;

/// Channels per pixel. Every frame in the pipeline is packed 8-bit RGB.
pub const CHANNELS: u8 = 3;

/// Width and height of a frame in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale both dimensions by `ratio`, rounding to the nearest pixel.
    pub fn scaled(self, ratio: f64) -> Self {
        Self {
            width: (self.width as f64 * ratio).round() as u32,
            height: (self.height as f64 * ratio).round() as u32,
        }
    }

    /// Size of a frame holding two frames of this size next to each other.
    pub fn side_by_side(self) -> Self {
        Self {
            width: self.width * 2,
            height: self.height,
        }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of bytes in a packed RGB24 buffer of this size.
    pub fn byte_len(self) -> usize {
        self.width as usize * self.height as usize * CHANNELS as usize
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A pixel color in the frame's native (RGB) channel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "[u8; 3]")]
pub struct Color(pub [u8; 3]);

impl Color {
    pub const BLACK: Color = Color([0, 0, 0]);
    pub const WHITE: Color = Color([255, 255, 255]);
    pub const GREEN: Color = Color([0, 255, 0]);
}

impl From<[u8; 3]> for Color {
    fn from(channels: [u8; 3]) -> Self {
        Color(channels)
    }
}

impl From<Color> for Rgb<u8> {
    fn from(color: Color) -> Self {
        Rgb(color.0)
    }
}

/// One decoded video frame: packed 8-bit RGB pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// A frame where every pixel is `color`.
    pub fn filled(size: FrameSize, color: Color) -> Self {
        Self {
            image: RgbImage::from_pixel(size.width, size.height, color.into()),
        }
    }

    /// Wrap a raw RGB24 buffer. The buffer must hold exactly `size.byte_len()` bytes.
    pub fn from_raw(size: FrameSize, data: Vec<u8>) -> Result<Self, FrameError> {
        let actual = data.len();
        RgbImage::from_raw(size.width, size.height, data)
            .filter(|_| actual == size.byte_len())
            .map(|image| Self { image })
            .ok_or(FrameError::BufferLength {
                size,
                expected: size.byte_len(),
                actual,
            })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.image.width(), self.image.height())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        CHANNELS
    }

    pub fn pixel(&self, x: u32, y: u32) -> Color {
        Color(self.image.get_pixel(x, y).0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.image
    }

    /// Bilinear resize to `size`. Returns a copy when the size already matches.
    pub fn resized(&self, size: FrameSize) -> Frame {
        if self.size() == size {
            return self.clone();
        }
        Frame {
            image: imageops::resize(&self.image, size.width, size.height, FilterType::Triangle),
        }
    }

    pub fn ensure_size(&self, expected: FrameSize) -> Result<(), FrameError> {
        let actual = self.size();
        if actual != expected {
            return Err(FrameError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }

    /// Returns true if every pixel equals `color`.
    pub fn is_uniform(&self, color: Color) -> bool {
        self.image.pixels().all(|p| p.0 == color.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: FrameSize,
        actual: FrameSize,
    },
    #[error("frame buffer for {size} holds {actual} bytes, expected {expected}")]
    BufferLength {
        size: FrameSize,
        expected: usize,
        actual: usize,
    },
}
