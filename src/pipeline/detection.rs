use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array, Axis, Ix2};
use ort::value::Tensor;
use tracing::{debug, span, trace, Level};

use super::model::{first_input_name, first_output_name, initialize_model, Session};
use crate::error::{Error, Result};
use crate::shapes::rect::RectF32;

/// Face candidate, in the pixel space of the image handed to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bounds: RectF32,
    pub confidence: f32,
}

pub trait FaceDetector: Send {
    /// Returns zero or more faces ordered by descending confidence.
    fn detect(&mut self, img: &RgbImage) -> Result<Vec<Detection>>;
}

const INPUT_SIZE: u32 = 640;
const MIN_CONFIDENCE: f32 = 0.5;
const MAX_OVERLAP_PCT: f32 = 45.;

pub struct OnnxFaceDetector {
    model: Session,
    input_name: String,
    output_name: String,
}

impl OnnxFaceDetector {
    /*
    YOLO face model wrapper.

    Model Input: 1x3x640x640 f32 image, RGB in [0, 1]. The image is placed in
    the top-left corner and the rest is zero padding.
    Model Output: 1xFxN, one column per candidate. The first 4 values are
    centre x, centre y, width, height in input pixels, the 5th the face
    score. Anything after that (landmarks) is ignored.
     */
    pub fn new(path: &Path, threads: usize) -> Result<OnnxFaceDetector> {
        let model = initialize_model(path, threads)?;
        Ok(OnnxFaceDetector {
            input_name: first_input_name(&model)?,
            output_name: first_output_name(&model)?,
            model,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&mut self, img: &RgbImage) -> Result<Vec<Detection>> {
        let span = span!(Level::DEBUG, "face_detector");
        let _guard = span.enter();

        // Portrait images are taller than the square input; shrink them to
        // fit and undo it on the way out.
        let fit = (INPUT_SIZE as f32 / img.width().max(img.height()) as f32).min(1.);
        let fitted;
        let input_img = if fit < 1. {
            fitted = imageops::resize(
                img,
                ((img.width() as f32 * fit).round() as u32).max(1),
                ((img.height() as f32 * fit).round() as u32).max(1),
                FilterType::Triangle,
            );
            &fitted
        } else {
            img
        };

        let (width, height) = input_img.dimensions();
        let model_input = Array::from_shape_fn(
            (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
            |(_, c, y, x)| {
                let (x, y) = (x as u32, y as u32);
                if x >= width || y >= height {
                    0.
                } else {
                    input_img.get_pixel(x, y)[c] as f32 / 255.
                }
            },
        );

        let input = Tensor::from_array(model_input).map_err(Error::model)?;
        let outputs = self
            .model
            .run(ort::inputs![self.input_name.as_str() => input].map_err(Error::model)?)
            .map_err(Error::model)?;
        let result = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(Error::model)?;

        let preds = result
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(Error::model)?;
        // Some exports put candidates on the first axis
        let preds = if preds.nrows() > preds.ncols() {
            preds.reversed_axes()
        } else {
            preds
        };
        if preds.nrows() < 5 {
            return Err(Error::ModelInvocation(format!(
                "unexpected detector output shape {:?}",
                result.shape()
            )));
        }

        let mut candidates = Vec::new();
        for col in preds.columns() {
            let confidence = col[4];
            if confidence < MIN_CONFIDENCE {
                continue;
            }

            let bounds = RectF32::from_center(col[0], col[1], col[2], col[3]).scale(1. / fit);
            candidates.push(Detection { bounds, confidence });
        }
        trace!("{} candidates above threshold", candidates.len());

        let faces = suppress_overlaps(candidates);
        debug!("Detected {} faces", faces.len());

        Ok(faces)
    }
}

/// Keeps the most confident of any group of heavily overlapping candidates.
pub(crate) fn suppress_overlaps(mut candidates: Vec<Detection>) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for c in candidates {
        let px = c.bounds.to_pixels(u32::MAX, u32::MAX);
        let dup = kept
            .iter()
            .any(|k| k.bounds.to_pixels(u32::MAX, u32::MAX).overlap_pct(&px) > MAX_OVERLAP_PCT);
        if !dup {
            kept.push(c);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
        Detection {
            bounds: RectF32::new(x1, y1, x2, y2),
            confidence,
        }
    }

    #[test]
    fn test_suppress_keeps_most_confident() {
        let kept = suppress_overlaps(vec![
            det(10., 10., 50., 50., 0.6),
            det(12., 12., 52., 52., 0.9),
            det(200., 200., 240., 240., 0.7),
        ]);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn test_suppress_empty() {
        assert!(suppress_overlaps(Vec::new()).is_empty());
    }
}
