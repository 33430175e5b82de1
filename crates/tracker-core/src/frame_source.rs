//! External-collaborator contract for random-access frame delivery, and an
//! in-memory implementation used by tests.

use crate::error::{Result, TrackerError};
use crate::patch::OwnedImage;

/// Random-access delivery of decoded RGB frames. Implementations are
/// expected to be safe to call concurrently from independent threads, since
/// the index source's worker pool fetches frames in parallel.
pub trait FrameSource: Send + Sync {
    fn num_frames(&self) -> usize;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn frame(&self, index: usize) -> Result<OwnedImage>;
}

/// An in-memory [`FrameSource`] over pre-decoded frames, used by tests and
/// doctests that would otherwise need a directory of real images.
pub struct VecFrameSource {
    frames: Vec<OwnedImage>,
    width: u32,
    height: u32,
}

impl VecFrameSource {
    pub fn new(frames: Vec<OwnedImage>) -> Result<Self> {
        let first = frames
            .first()
            .ok_or_else(|| TrackerError::InvalidArgument("frames must not be empty".into()))?;
        let width = first.width() as u32;
        let height = first.height() as u32;
        for frame in &frames {
            if frame.width() as u32 != width || frame.height() as u32 != height {
                return Err(TrackerError::SizeMismatch(
                    "all frames in a VecFrameSource must share one size".into(),
                ));
            }
        }
        Ok(Self {
            frames,
            width,
            height,
        })
    }
}

impl FrameSource for VecFrameSource {
    fn num_frames(&self) -> usize {
        self.frames.len()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn frame(&self, index: usize) -> Result<OwnedImage> {
        self.frames
            .get(index)
            .cloned()
            .ok_or_else(|| TrackerError::InvalidArgument(format!("frame index {index} out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(w: usize, h: usize) -> OwnedImage {
        OwnedImage::new(w, h, 3, vec![0u8; w * h * 3]).unwrap()
    }

    #[test]
    fn rejects_mismatched_frame_sizes() {
        let frames = vec![blank(4, 4), blank(4, 5)];
        assert!(VecFrameSource::new(frames).is_err());
    }

    #[test]
    fn reports_dimensions_and_count() {
        let source = VecFrameSource::new(vec![blank(4, 4), blank(4, 4), blank(4, 4)]).unwrap();
        assert_eq!(source.num_frames(), 3);
        assert_eq!(source.width(), 4);
        assert_eq!(source.height(), 4);
        assert!(source.frame(2).is_ok());
        assert!(source.frame(3).is_err());
    }
}
