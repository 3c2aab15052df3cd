use crate::common::{CameraConfig, FaceAuthError, Result};
use image::{GrayImage, ImageFormat, RgbImage};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// A blocking source of RGB frames. Created and used on the capture thread only.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<RgbImage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    Mjpg,
    Yuyv,
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: &FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" => Some(PixelFormat::Mjpg),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            _ => None,
        }
    }
}

pub struct V4lCamera {
    // Declared before the device so the mapped buffers are released first.
    stream: Stream<'static>,
    _device: Device,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl V4lCamera {
    /// Any failure to open or configure the device is `DeviceUnavailable`.
    pub fn open(config: &CameraConfig) -> Result<Self> {
        let index = config.device_index;
        let unavailable = |what: &str, e: std::io::Error| {
            FaceAuthError::DeviceUnavailable(format!("/dev/video{}: {}: {}", index, what, e))
        };

        let device = Device::new(index as usize).map_err(|e| unavailable("open failed", e))?;
        let caps = device.query_caps().map_err(|e| unavailable("query caps failed", e))?;
        tracing::info!("Opened camera /dev/video{} ({})", index, caps.card);

        let mut fmt = device.format().map_err(|e| unavailable("get format failed", e))?;
        fmt.width = config.width;
        fmt.height = config.height;
        if fmt.fourcc != FourCC::new(b"GREY") {
            fmt.fourcc = FourCC::new(b"MJPG");
        }
        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set {}x{} MJPG: {}. Using device defaults.", fmt.width, fmt.height, e);
        }

        let actual = device.format().map_err(|e| unavailable("get format failed", e))?;
        let format = PixelFormat::from_fourcc(&actual.fourcc).ok_or_else(|| {
            FaceAuthError::DeviceUnavailable(format!(
                "/dev/video{}: unsupported pixel format {}",
                index, actual.fourcc
            ))
        })?;
        if actual.width != config.width || actual.height != config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                actual.width,
                actual.height,
                config.width,
                config.height
            );
        }

        let stream = Stream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|e| unavailable("stream setup failed", e))?;

        Ok(Self {
            stream,
            _device: device,
            width: actual.width,
            height: actual.height,
            format,
        })
    }
}

impl FrameSource for V4lCamera {
    fn read_frame(&mut self) -> Result<RgbImage> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| FaceAuthError::DeviceUnavailable(format!("Failed to capture: {}", e)))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used > 0 { &buf[..used] } else { buf };

        match self.format {
            PixelFormat::Mjpg => {
                Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8())
            }
            PixelFormat::Yuyv => yuyv_to_rgb(data, self.width, self.height),
            PixelFormat::Grey => {
                let expected = (self.width * self.height) as usize;
                let pixels = data.get(..expected).map(<[u8]>::to_vec).unwrap_or_default();
                let grey = GrayImage::from_raw(self.width, self.height, pixels)
                    .ok_or_else(|| FaceAuthError::Other(anyhow::anyhow!("short GREY frame")))?;
                Ok(image::DynamicImage::ImageLuma8(grey).to_rgb8())
            }
        }
    }
}

/// Packed YUYV 4:2:2 (BT.601) to RGB.
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return Err(FaceAuthError::Other(anyhow::anyhow!(
            "short YUYV frame: {} of {} bytes",
            data.len(),
            expected
        )));
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0] as f32, chunk[1] as f32 - 128.0, chunk[2] as f32, chunk[3] as f32 - 128.0);
        for y in [y0, y1] {
            rgb.push((y + 1.402 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).clamp(0.0, 255.0) as u8);
        }
    }

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| FaceAuthError::Other(anyhow::anyhow!("YUYV buffer size mismatch")))
}
