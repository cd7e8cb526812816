use anyhow::{Context, Result};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::frame::{Frame, FrameSource};
use crate::pixel;

/// V4L2 capture device, opened once and held for the whole session.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {device}"))?;
        let mut fmt = dev.format().context("query capture format")?;
        let rgb = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&rgb).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        let stream =
            Stream::with_buffers(&dev, Type::VideoCapture, 4).context("start capture stream")?;
        log::info!(
            "camera {} streaming {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }
}

impl FrameSource for Camera {
    fn frame(&mut self) -> Result<Frame> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!("captured frame seq={} len={}", meta.sequence, data.len());
        let mut buf = match self.fourcc {
            f if f == FourCC::new(b"RGB3") => data.to_vec(),
            f if f == FourCC::new(b"YUYV") => pixel::yuyv_to_rgb(self.width, self.height, data)?,
            f if f == FourCC::new(b"GREY") => pixel::grey_to_rgb(self.width, self.height, data)?,
            other => anyhow::bail!("unsupported pixel format {:?}", other),
        };
        let expected = pixel::buffer_len(self.width, self.height, 3)?;
        if buf.len() < expected {
            anyhow::bail!("frame buffer too small: {} < {}", buf.len(), expected);
        }
        buf.truncate(expected);
        Frame::from_raw(self.width, self.height, buf)
            .ok_or_else(|| anyhow::anyhow!("failed to build frame"))
    }
}
