use anyhow::{Context, Result};
use image::{ImageBuffer, Rgb};
use std::path::Path;

/// A single captured RGB frame.
pub type Frame = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Anything that can hand out the current frame.
pub trait FrameSource: Send {
    fn frame(&mut self) -> Result<Frame>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn frame(&mut self) -> Result<Frame> {
        (**self).frame()
    }
}

/// Frame source backed by a single image, returned on every call.
pub struct StillFrame {
    frame: Frame,
}

impl StillFrame {
    pub fn open(path: &Path) -> Result<Self> {
        let img = image::open(path).with_context(|| format!("reading frame {}", path.display()))?;
        log::debug!(
            "loaded still frame {} ({}x{})",
            path.display(),
            img.width(),
            img.height()
        );
        Ok(Self {
            frame: img.to_rgb8(),
        })
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self { frame }
    }
}

impl FrameSource for StillFrame {
    fn frame(&mut self) -> Result<Frame> {
        Ok(self.frame.clone())
    }
}
