use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use ndarray::Array4;

use crate::error::{Error, Result};
use crate::geometry::detector_to_original;
use crate::shapes::rect::{Rect, RectF32};

/// Pixel region of `img` covered by a detector-space box. Boxes that collapse
/// after mapping are grown to a single pixel so every detection gets a crop.
pub fn face_region(img: &RgbImage, bounds: &RectF32, detector_width: u32) -> Rect {
    let (w, h) = img.dimensions();
    detector_to_original(bounds, w, detector_width)
        .to_pixels(w, h)
        .at_least_one_pixel(w, h)
}

pub fn crop(img: &RgbImage, region: Rect) -> RgbImage {
    imageops::crop_imm(img, region.x, region.y, region.w, region.h).to_image()
}

/// Resizes a face crop to the classifier's square input and lays it out as
/// 1 x side x side x 3, RGB, scaled to [0, 1].
pub fn classifier_input(face: &RgbImage, side: u32) -> Array4<f32> {
    let resized = imageops::resize(face, side, side, FilterType::Triangle);
    Array4::from_shape_fn((1, side as usize, side as usize, 3), |(_, y, x, c)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.
    })
}

/// PNG bytes of a face crop, for thumbnails.
pub fn encode_png(face: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    face.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| Error::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_face_region_maps_to_original() {
        let img = RgbImage::new(1280, 960);
        let region = face_region(&img, &RectF32::new(100., 100., 200., 220.), 640);
        assert_eq!(region, Rect::new(200, 200, 200, 240));
    }

    #[test]
    fn test_degenerate_box_becomes_one_pixel() {
        let img = RgbImage::new(100, 100);
        let region = face_region(&img, &RectF32::new(700., 30., 650., 30.), 640);
        assert_eq!((region.w, region.h), (1, 1));
        assert!(region.right() <= 100 && region.bottom() <= 100);
        assert_eq!(crop(&img, region).dimensions(), (1, 1));
    }

    #[test]
    fn test_classifier_input_layout() {
        let face = RgbImage::from_pixel(40, 20, Rgb([255, 0, 51]));
        let tensor = classifier_input(&face, 133);

        assert_eq!(tensor.shape(), &[1, 133, 133, 3]);
        assert_eq!(tensor[[0, 0, 0, 0]], 1.);
        assert_eq!(tensor[[0, 132, 132, 1]], 0.);
        assert!((tensor[[0, 66, 66, 2]] - 0.2).abs() < 1e-6);
        assert!(tensor.iter().all(|v| (0. ..=1.).contains(v)));
    }

    #[test]
    fn test_encode_png_round_trips_dimensions() -> anyhow::Result<()> {
        let png = encode_png(&RgbImage::new(7, 5))?;
        let decoded = image::load_from_memory(&png)?;
        assert_eq!((decoded.width(), decoded.height()), (7, 5));
        Ok(())
    }
}
