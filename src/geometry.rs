//! Mapping between the three coordinate spaces a face box lives in: the
//! detector input, the oriented original image and an on-screen canvas.
//!
//! The overlay renderer and the redaction compositor both go through these
//! functions, so a highlighted box and a blurred region always cover the same
//! pixels.

use crate::shapes::rect::RectF32;

/// Factor taking detector-input coordinates to original-image coordinates.
pub fn detector_scale(original_width: u32, detector_width: u32) -> f32 {
    original_width as f32 / detector_width as f32
}

/// Dimensions of the detector input for an image of the given size. Width is
/// fixed, height keeps the aspect ratio.
pub fn detector_dimensions(original_width: u32, original_height: u32, detector_width: u32) -> (u32, u32) {
    let scale = detector_scale(original_width, detector_width);
    let height = (original_height as f32 / scale).round().max(1.) as u32;
    (detector_width, height)
}

pub fn detector_to_original(r: &RectF32, original_width: u32, detector_width: u32) -> RectF32 {
    r.scale(detector_scale(original_width, detector_width))
}

pub fn original_to_detector(r: &RectF32, original_width: u32, detector_width: u32) -> RectF32 {
    r.scale(1. / detector_scale(original_width, detector_width))
}

/// Placement of an image inside a canvas, scaled to fit and centred along
/// the axis with spare room.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub offset_x: f32,
    pub offset_y: f32,
    pub width: f32,
    pub height: f32,
}

impl Letterbox {
    pub fn fit(image_width: u32, image_height: u32, canvas_width: f32, canvas_height: f32) -> Letterbox {
        let image_aspect = image_width as f32 / image_height as f32;
        let canvas_aspect = canvas_width / canvas_height;

        if image_aspect > canvas_aspect {
            let height = canvas_width / image_aspect;
            Letterbox {
                offset_x: 0.,
                offset_y: (canvas_height - height) / 2.,
                width: canvas_width,
                height,
            }
        } else {
            let width = canvas_height * image_aspect;
            Letterbox {
                offset_x: (canvas_width - width) / 2.,
                offset_y: 0.,
                width,
                height: canvas_height,
            }
        }
    }

    /// Maps a box given in a space `source_width` pixels wide (original or
    /// detector) onto the canvas.
    pub fn to_display(&self, r: &RectF32, source_width: u32) -> RectF32 {
        r.scale(self.width / source_width as f32)
            .translate(self.offset_x, self.offset_y)
    }

    /// Inverse of [`Letterbox::to_display`].
    pub fn from_display(&self, r: &RectF32, source_width: u32) -> RectF32 {
        r.translate(-self.offset_x, -self.offset_y)
            .scale(source_width as f32 / self.width)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.offset_x
            && x <= self.offset_x + self.width
            && y >= self.offset_y
            && y <= self.offset_y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &RectF32, b: &RectF32, tolerance: f32) {
        for (l, r) in [(a.x1, b.x1), (a.y1, b.y1), (a.x2, b.x2), (a.y2, b.y2)] {
            assert!((l - r).abs() <= tolerance, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn test_detector_box_to_original() {
        let r = RectF32::new(100., 100., 200., 220.);
        let mapped = detector_to_original(&r, 1280, 640);
        assert_eq!(mapped, RectF32::new(200., 200., 400., 440.));
    }

    #[test]
    fn test_round_trip_within_one_pixel() {
        let boxes = [
            RectF32::new(0., 0., 640., 480.),
            RectF32::new(13.3, 77.7, 101.9, 250.01),
            RectF32::new(600.5, 2.25, 639.9, 9.75),
        ];
        for original_width in [1, 333, 640, 1279, 4032, 12000] {
            for r in &boxes {
                let there = detector_to_original(r, original_width, 640);
                let back = original_to_detector(&there, original_width, 640);
                assert_close(r, &back, 1.);
            }
        }
    }

    #[test]
    fn test_detector_dimensions_keep_aspect() {
        assert_eq!(detector_dimensions(1280, 960, 640), (640, 480));
        assert_eq!(detector_dimensions(3024, 4032, 640), (640, 853));
        assert_eq!(detector_dimensions(6400, 1, 640), (640, 1));
    }

    #[test]
    fn test_letterbox_wide_image() {
        let lb = Letterbox::fit(200, 100, 100., 100.);
        assert_eq!(lb, Letterbox { offset_x: 0., offset_y: 25., width: 100., height: 50. });

        let display = lb.to_display(&RectF32::new(0., 0., 200., 100.), 200);
        assert_eq!(display, RectF32::new(0., 25., 100., 75.));
    }

    #[test]
    fn test_letterbox_tall_image() {
        let lb = Letterbox::fit(100, 200, 300., 300.);
        assert_eq!(lb, Letterbox { offset_x: 75., offset_y: 0., width: 150., height: 300. });
        assert!(lb.contains(80., 10.));
        assert!(!lb.contains(10., 10.));
    }

    #[test]
    fn test_display_round_trip() {
        let lb = Letterbox::fit(1280, 960, 390., 844.);
        let r = RectF32::new(200., 200., 400., 440.);
        let back = lb.from_display(&lb.to_display(&r, 1280), 1280);
        assert_close(&r, &back, 1e-3);
    }
}
