use image::imageops;
use image::{GrayImage, Rgb, RgbImage};
use motion_extract_common::config::MotionConfig;
use motion_extract_common::frame::{Color, Frame};

use super::diff::DifferenceFrame;

const UNCHANGED: u8 = 255;
const CHANGED: u8 = 0;

/// How a difference frame is turned into a motion frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecolorOptions {
    /// Painted over every pixel classified as unchanged.
    pub fill_color: Color,
    /// Luma at or below this value counts as unchanged.
    pub threshold: u8,
}

impl Default for RecolorOptions {
    fn default() -> Self {
        Self {
            fill_color: Color::GREEN,
            threshold: 25,
        }
    }
}

impl From<&MotionConfig> for RecolorOptions {
    fn from(config: &MotionConfig) -> Self {
        Self {
            fill_color: config.fill_color,
            threshold: config.threshold,
        }
    }
}

/// Inverted binary mask: 255 where a pixel is unchanged, 0 where it moved.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionMask(GrayImage);

impl MotionMask {
    pub fn is_unchanged(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y).0[0] == UNCHANGED
    }
}

/// Threshold the luma of `difference` into a [`MotionMask`].
pub fn motion_mask(difference: &DifferenceFrame, threshold: u8) -> MotionMask {
    let mut gray = imageops::grayscale(difference.as_frame().as_image());
    for pixel in gray.pixels_mut() {
        pixel.0[0] = if pixel.0[0] <= threshold {
            UNCHANGED
        } else {
            CHANGED
        };
    }
    MotionMask(gray)
}

/// Paint the unchanged pixels of `difference` with the fill color; changed
/// pixels keep their difference value.
pub fn recolor(difference: &DifferenceFrame, options: &RecolorOptions) -> Frame {
    let mask = motion_mask(difference, options.threshold);
    let source = difference.as_frame().as_image();
    let fill: Rgb<u8> = options.fill_color.into();

    let image = RgbImage::from_fn(source.width(), source.height(), |x, y| {
        if mask.is_unchanged(x, y) {
            fill
        } else {
            *source.get_pixel(x, y)
        }
    });
    Frame::from_image(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_extract_common::frame::FrameSize;

    fn uniform_difference(size: FrameSize, value: u8) -> DifferenceFrame {
        DifferenceFrame::from(Frame::filled(size, Color([value, value, value])))
    }

    #[test]
    fn zero_difference_becomes_fill_color() {
        let size = FrameSize::new(20, 10);
        let frame = recolor(&uniform_difference(size, 0), &RecolorOptions::default());
        assert_eq!(frame.size(), size);
        assert!(frame.is_uniform(Color::GREEN));
    }

    #[test]
    fn threshold_is_inclusive_for_unchanged() {
        let size = FrameSize::new(3, 3);
        let options = RecolorOptions::default();

        let at = recolor(&uniform_difference(size, 25), &options);
        assert!(at.is_uniform(Color::GREEN));

        let above = recolor(&uniform_difference(size, 26), &options);
        assert!(above.is_uniform(Color([26, 26, 26])));
    }

    #[test]
    fn changed_pixels_keep_difference_color() {
        let size = FrameSize::new(2, 1);
        let difference =
            DifferenceFrame::from(Frame::from_raw(size, vec![200, 40, 90, 3, 1, 2]).unwrap());
        let frame = recolor(&difference, &RecolorOptions::default());
        assert_eq!(frame.pixel(0, 0), Color([200, 40, 90]));
        assert_eq!(frame.pixel(1, 0), Color::GREEN);
    }

    #[test]
    fn recolor_of_fill_frame_is_stable() {
        let size = FrameSize::new(12, 8);
        let options = RecolorOptions::default();
        let once = recolor(&uniform_difference(size, 0), &options);
        let twice = recolor(&DifferenceFrame::from(once.clone()), &options);
        assert_eq!(once, twice);
        assert!(twice.is_uniform(options.fill_color));
    }

    #[test]
    fn custom_fill_and_threshold() {
        let size = FrameSize::new(5, 5);
        let options = RecolorOptions {
            fill_color: Color([255, 0, 255]),
            threshold: 100,
        };
        let frame = recolor(&uniform_difference(size, 80), &options);
        assert!(frame.is_uniform(Color([255, 0, 255])));
    }

    #[test]
    fn mask_marks_moving_pixels() {
        let size = FrameSize::new(2, 2);
        let difference = DifferenceFrame::from(
            Frame::from_raw(size, vec![255, 255, 255, 0, 0, 0, 0, 0, 0, 90, 90, 90]).unwrap(),
        );
        let mask = motion_mask(&difference, 25);
        assert!(!mask.is_unchanged(0, 0));
        assert!(mask.is_unchanged(1, 0));
        assert!(mask.is_unchanged(0, 1));
        assert!(!mask.is_unchanged(1, 1));
    }
}
