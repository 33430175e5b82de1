//! Directory-of-images [`FrameSource`] adapter: one numbered image file per
//! frame, decoded on demand via the `image` crate. This is the CLI's stand-in
//! for the video decoder the core treats as an external collaborator.

use std::path::{Path, PathBuf};

use tracker_core::{FrameSource, OwnedImage};
use tracker_core::{Result, TrackerError};

/// Reads frames `000000.<ext>`, `000001.<ext>`, ... (or any sorted listing
/// of image files) from a directory, decoding each to RGB8 on `frame()`.
pub struct DirFrameSource {
    paths: Vec<PathBuf>,
    width: u32,
    height: u32,
}

impl DirFrameSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image_extension(path))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(TrackerError::InvalidArgument(format!(
                "no image files found in {}",
                dir.display()
            )));
        }

        let first = image::open(&paths[0])?.into_rgb8();
        let width = first.width();
        let height = first.height();

        Ok(Self { paths, width, height })
    }
}

fn is_image_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("png" | "jpg" | "jpeg" | "bmp" | "tif" | "tiff")
    )
}

impl FrameSource for DirFrameSource {
    fn num_frames(&self) -> usize {
        self.paths.len()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn frame(&self, index: usize) -> Result<OwnedImage> {
        let path = self
            .paths
            .get(index)
            .ok_or_else(|| TrackerError::InvalidArgument(format!("frame index {index} out of range")))?;
        let rgb = image::open(path)?.into_rgb8();
        if rgb.width() != self.width || rgb.height() != self.height {
            return Err(TrackerError::SizeMismatch(format!(
                "{} is {}x{}, expected {}x{}",
                path.display(),
                rgb.width(),
                rgb.height(),
                self.width,
                self.height
            )));
        }
        OwnedImage::new(self.width as usize, self.height as usize, 3, rgb.into_raw())
    }
}
