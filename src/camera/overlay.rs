//! The on-screen oval guide: geometry, the in-oval test and compositing of
//! display frames.

use crate::common::Result;
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_ellipse_mut;

const AXIS_X_RATIO: f32 = 0.35;
const AXIS_Y_RATIO: f32 = 0.50;
const EXTERIOR_BRIGHTNESS: f32 = 0.3;

const RING_IDLE: Rgb<u8> = Rgb([255, 255, 255]);
const RING_FACE: Rgb<u8> = Rgb([0, 255, 0]);

/// Ellipse centred in a frame, semi-axes 35% of the width and 50% of the height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OvalGuide {
    pub center_x: f32,
    pub center_y: f32,
    pub axis_x: f32,
    pub axis_y: f32,
}

impl OvalGuide {
    pub fn for_frame(width: u32, height: u32) -> Self {
        Self {
            center_x: (width / 2) as f32,
            center_y: (height / 2) as f32,
            axis_x: (width as f32 * AXIS_X_RATIO).floor().max(1.0),
            axis_y: (height as f32 * AXIS_Y_RATIO).floor().max(1.0),
        }
    }

    /// Squared normalised elliptical distance; 1.0 is on the ring.
    pub fn distance(&self, x: f32, y: f32) -> f32 {
        let nx = (x - self.center_x) / self.axis_x;
        let ny = (y - self.center_y) / self.axis_y;
        nx * nx + ny * ny
    }

    pub fn contains(&self, x: f32, y: f32, margin: f32) -> bool {
        self.distance(x, y) <= margin
    }
}

/// Darkens everything outside the oval and draws its ring, white while
/// waiting and green (and thicker) once a face is in place.
pub fn draw_guide(frame: &mut RgbImage, face_detected: bool) {
    let guide = OvalGuide::for_frame(frame.width(), frame.height());

    for (x, y, pixel) in frame.enumerate_pixels_mut() {
        if guide.distance(x as f32, y as f32) > 1.0 {
            for channel in pixel.0.iter_mut() {
                *channel = (*channel as f32 * EXTERIOR_BRIGHTNESS) as u8;
            }
        }
    }

    let (color, thickness) = if face_detected { (RING_FACE, 3) } else { (RING_IDLE, 2) };
    let center = (guide.center_x as i32, guide.center_y as i32);
    for t in 0..thickness {
        draw_hollow_ellipse_mut(
            frame,
            center,
            guide.axis_x as i32 - t,
            guide.axis_y as i32 - t,
            color,
        );
    }
}

/// JPEG-encodes and wraps the frame as a `data:image/jpeg;base64,` URI.
pub fn encode_data_uri(frame: &RgbImage, quality: u8) -> Result<String> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ColorType::Rgb8,
    )?;
    Ok(format!(
        "data:image/jpeg;base64,{}",
        general_purpose::STANDARD.encode(jpeg)
    ))
}
