use image::imageops;
use image::RgbImage;
use motion_extract_common::frame::{Frame, FrameError, FrameSize};

/// Place `left` and `right` next to each other in one frame.
///
/// Both frames must have the same height. The result is
/// `left.width + right.width` wide, with `left` starting at column 0 and
/// `right` at column `left.width`.
pub fn compose(left: &Frame, right: &Frame) -> Result<Frame, FrameError> {
    if left.height() != right.height() {
        return Err(FrameError::DimensionMismatch {
            expected: FrameSize::new(right.width(), left.height()),
            actual: right.size(),
        });
    }

    let mut canvas = RgbImage::new(left.width() + right.width(), left.height());
    imageops::replace(&mut canvas, left.as_image(), 0, 0);
    imageops::replace(&mut canvas, right.as_image(), left.width() as i64, 0);
    Ok(Frame::from_image(canvas))
}
