use std::collections::BTreeSet;

use image::{Rgb, RgbImage};
use imageproc::drawing;

use crate::geometry::{detector_to_original, Letterbox};
use crate::pipeline::{FaceRecord, JobResult};
use crate::shapes::rect::{Rect, RectF32};

const CHILD: Rgb<u8> = Rgb([255, 0, 0]);
const ADULT: Rgb<u8> = Rgb([0, 255, 0]);

/// Face boxes placed on a `canvas_width` x `canvas_height` display.
pub fn display_boxes(result: &JobResult, canvas_width: f32, canvas_height: f32) -> Vec<RectF32> {
    let (w, h) = result.image.dimensions();
    let letterbox = Letterbox::fit(w, h, canvas_width, canvas_height);

    result
        .faces
        .iter()
        .map(|f| letterbox.to_display(&f.bounds, result.detector_width))
        .collect()
}

/// Index of the face under a display point, preferring the last drawn box.
pub fn face_at(boxes: &[RectF32], x: f32, y: f32) -> Option<usize> {
    boxes
        .iter()
        .rposition(|b| x >= b.x1 && x <= b.x2 && y >= b.y1 && y <= b.y2)
}

/// Outlines every face on the image, red for children and green otherwise.
/// Faces picked for redaction get a double outline.
pub fn draw_faces(img: &mut RgbImage, faces: &[FaceRecord], detector_width: u32, selected: &BTreeSet<usize>) {
    let (w, h) = img.dimensions();

    for (idx, face) in faces.iter().enumerate() {
        let region = detector_to_original(&face.bounds, w, detector_width).to_pixels(w, h);
        if region.is_empty() {
            continue;
        }

        let colour = if face.age.is_child() { CHILD } else { ADULT };
        drawing::draw_hollow_rect_mut(img, region.into(), colour);

        if selected.contains(&idx) && region.w > 2 && region.h > 2 {
            let inner = Rect::new(region.x + 1, region.y + 1, region.w - 2, region.h - 2);
            drawing::draw_hollow_rect_mut(img, inner.into(), colour);
        }
    }
}
