//! Decoding of YOLOv8-style detection heads.
//!
//! The head is either `[1, 4 + classes (+ extras), N]` (channels first, the
//! default export) or `[1, N, 4 + classes (+ extras)]`. Each prediction is
//! `[cx, cy, w, h, class scores..., extras...]`; extras such as face
//! keypoints are ignored.

use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;

#[derive(Debug, Clone, PartialEq)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl RawBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }
}

/// Resizes to the network input and packs RGB into a normalised NCHW tensor.
pub fn image_to_tensor(image: &RgbImage, input_width: u32, input_height: u32) -> Array4<f32> {
    let resized;
    let source = if image.width() == input_width && image.height() == input_height {
        image
    } else {
        resized = image::imageops::resize(image, input_width, input_height, FilterType::Triangle);
        &resized
    };

    let width = input_width as usize;
    let height = input_height as usize;
    let mut array = Array4::<f32>::zeros((1, 3, height, width));
    let norm_factor = 1.0 / 255.0;

    for (x, y, pixel) in source.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        array[[0, 0, y, x]] = pixel[0] as f32 * norm_factor;
        array[[0, 1, y, x]] = pixel[1] as f32 * norm_factor;
        array[[0, 2, y, x]] = pixel[2] as f32 * norm_factor;
    }

    array
}

/// Turns the raw head into corner boxes in network-input pixels, keeping
/// predictions whose best class score reaches `min_confidence`.
pub fn decode(
    output: &[f32],
    shape: &[usize],
    num_classes: usize,
    input_width: u32,
    input_height: u32,
    min_confidence: f32,
) -> Vec<RawBox> {
    let mut boxes = Vec::new();
    let num_classes = num_classes.max(1);

    let (rows, cols) = match shape {
        [_, a, b] => (*a, *b),
        [a, b] => (*a, *b),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return boxes;
        }
    };
    // Channels-first heads have far fewer attribute rows than predictions;
    // a dimension too short to hold one prediction settles tiny outputs.
    let min_attributes = 4 + num_classes;
    let channels_first = if rows >= min_attributes && cols >= min_attributes {
        rows < cols
    } else {
        rows >= min_attributes
    };
    let (num_predictions, attributes) = if channels_first { (cols, rows) } else { (rows, cols) };

    if attributes < min_attributes || output.len() < num_predictions * attributes {
        tracing::warn!(
            "Detector output {:?} too small for {} classes",
            shape,
            num_classes
        );
        return boxes;
    }

    let at = |prediction: usize, attribute: usize| -> f32 {
        if channels_first {
            output[attribute * num_predictions + prediction]
        } else {
            output[prediction * attributes + attribute]
        }
    };

    for i in 0..num_predictions {
        let (mut class_id, mut confidence) = (0usize, f32::MIN);
        for c in 0..num_classes {
            let score = at(i, 4 + c);
            if score > confidence {
                confidence = score;
                class_id = c;
            }
        }
        if !(confidence >= min_confidence) {
            continue;
        }

        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        // Some exports emit coordinates normalised to [0, 1].
        let (sx, sy) = if cx <= 1.0 && cy <= 1.0 && w <= 1.0 && h <= 1.0 {
            (input_width as f32, input_height as f32)
        } else {
            (1.0, 1.0)
        };

        let x1 = ((cx - w / 2.0) * sx).max(0.0);
        let y1 = ((cy - h / 2.0) * sy).max(0.0);
        let x2 = ((cx + w / 2.0) * sx).min(input_width as f32);
        let y2 = ((cy + h / 2.0) * sy).min(input_height as f32);

        if x2 > x1 && y2 > y1 {
            boxes.push(RawBox {
                x1,
                y1,
                x2,
                y2,
                confidence,
                class_id,
            });
        }
    }

    boxes
}

/// Greedy per-class non-maximum suppression, highest confidence first.
pub fn non_max_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && iou(kept, &candidate) >= iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

pub fn iou(a: &RawBox, b: &RawBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Maps a box from network-input pixels back onto the source image.
pub fn rescale(raw: &mut RawBox, scale_x: f32, scale_y: f32) {
    raw.x1 *= scale_x;
    raw.x2 *= scale_x;
    raw.y1 *= scale_y;
    raw.y2 *= scale_y;
}
