use motion_extract_common::frame::{Frame, FrameError};

/// Per-pixel absolute difference between two temporally adjacent frames.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceFrame(Frame);

impl DifferenceFrame {
    pub fn as_frame(&self) -> &Frame {
        &self.0
    }

    /// Returns `true` if no channel of any pixel changed.
    pub fn is_zero(&self) -> bool {
        self.0.as_bytes().iter().all(|&b| b == 0)
    }
}

impl From<Frame> for DifferenceFrame {
    fn from(frame: Frame) -> Self {
        DifferenceFrame(frame)
    }
}

/// Difference `current` against `previous`.
///
/// Without a previous frame there is nothing to compare against: the result
/// is `(None, current)`, establishing `current` as the baseline. Otherwise
/// every channel of every pixel becomes `|previous - current|`.
///
/// `current` is always handed back so the caller can thread it into the next
/// call as `previous`.
pub fn diff(
    previous: Option<Frame>,
    current: Frame,
) -> Result<(Option<DifferenceFrame>, Frame), FrameError> {
    let Some(previous) = previous else {
        return Ok((None, current));
    };

    current.ensure_size(previous.size())?;

    let delta: Vec<u8> = previous
        .as_bytes()
        .iter()
        .zip(current.as_bytes())
        .map(|(a, b)| a.abs_diff(*b))
        .collect();
    let difference = Frame::from_raw(current.size(), delta)?;

    Ok((Some(DifferenceFrame(difference)), current))
}
