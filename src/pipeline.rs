use std::time::Instant;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::Array4;
use tracing::{debug, info, span, trace, Level};

use crate::config::{ADULT_THRESHOLD, PipelineConfig};
use crate::error::Result;
use crate::geometry::{detector_dimensions, detector_to_original};
use crate::orientation::decode_oriented;
use crate::shapes::rect::RectF32;
pub use age::{AgeClassifier, OnnxAgeClassifier};
pub use detection::{Detection, FaceDetector, OnnxFaceDetector};

mod age;
mod detection;
mod model;
pub mod region;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeLabel {
    Child,
    TeenOrAdult,
}

/// Classifier output. The label is always derived from the confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeEstimate {
    label: AgeLabel,
    confidence: f32,
}

impl AgeEstimate {
    pub fn new(adult_confidence: f32) -> AgeEstimate {
        let label = if adult_confidence <= ADULT_THRESHOLD {
            AgeLabel::Child
        } else {
            AgeLabel::TeenOrAdult
        };

        AgeEstimate {
            label,
            confidence: adult_confidence,
        }
    }

    pub fn label(&self) -> AgeLabel {
        self.label
    }

    /// Probability mass on "adult".
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn is_child(&self) -> bool {
        self.label == AgeLabel::Child
    }
}

#[derive(Debug, Clone)]
pub struct FaceRecord {
    /// In detector-input space.
    pub bounds: RectF32,
    pub confidence: f32,
    pub age: AgeEstimate,
    /// PNG thumbnail, display only.
    pub face_crop: Vec<u8>,
}

impl FaceRecord {
    pub fn original_bounds(&self, original_width: u32, detector_width: u32) -> RectF32 {
        detector_to_original(&self.bounds, original_width, detector_width)
    }
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub faces: Vec<FaceRecord>,
    /// Decoded source in display orientation.
    pub image: RgbImage,
    pub detector_width: u32,
}

pub struct Pipeline {
    face_detector: Box<dyn FaceDetector>,
    age_classifier: Box<dyn AgeClassifier>,
    detector_width: u32,
    classifier_size: u32,
}

impl Pipeline {
    pub fn new(
        face_detector: impl FaceDetector + 'static,
        age_classifier: impl AgeClassifier + 'static,
        detector_width: u32,
        classifier_size: u32,
    ) -> Pipeline {
        Pipeline {
            face_detector: Box::new(face_detector),
            age_classifier: Box::new(age_classifier),
            detector_width,
            classifier_size,
        }
    }

    pub fn load(config: &PipelineConfig) -> Result<Pipeline> {
        Ok(Pipeline::new(
            OnnxFaceDetector::new(&config.detector_model, config.threads)?,
            OnnxAgeClassifier::new(&config.age_model, config.threads)?,
            config.detector_width,
            config.classifier_size,
        ))
    }

    /// Runs both models once on synthetic input so backend setup cost is not
    /// paid by the first real job.
    pub fn warm_up(&mut self) -> Result<()> {
        let span = span!(Level::DEBUG, "warm_up");
        let _guard = span.enter();
        let start = Instant::now();

        let (w, h) = detector_dimensions(4, 3, self.detector_width);
        let synthetic = RgbImage::from_pixel(w, h, Rgb([128, 128, 128]));
        self.face_detector.detect(&synthetic)?;

        let side = self.classifier_size as usize;
        self.age_classifier
            .predict(&Array4::from_elem((1, side, side, 3), 0.5))?;

        info!("Models warmed up in {:?}", start.elapsed());
        Ok(())
    }

    pub fn run(&mut self, bytes: &[u8]) -> Result<JobResult> {
        let img = {
            let span = span!(Level::DEBUG, "decode");
            let _guard = span.enter();
            decode_oriented(bytes)?.into_rgb8()
        };

        self.run_image(img)
    }

    /// Detects faces on an already oriented image and classifies each one.
    pub fn run_image(&mut self, img: RgbImage) -> Result<JobResult> {
        let span = span!(Level::DEBUG, "pipeline");
        let _guard = span.enter();

        let (w, h) = detector_dimensions(img.width(), img.height(), self.detector_width);
        let resized = imageops::resize(&img, w, h, FilterType::Triangle);
        trace!("Resized {:?} to {w}x{h}", img.dimensions());

        let start = Instant::now();
        let detections = self.face_detector.detect(&resized)?;
        debug!("Detection took {:?}", start.elapsed());

        let mut faces = Vec::with_capacity(detections.len());
        for (idx, d) in detections.into_iter().enumerate() {
            let span = span!(Level::DEBUG, "classify", idx);
            let _guard = span.enter();

            let face_region = region::face_region(&img, &d.bounds, self.detector_width);
            let face = region::crop(&img, face_region);
            let input = region::classifier_input(&face, self.classifier_size);
            let age = AgeEstimate::new(self.age_classifier.predict(&input)?);
            trace!("Face {idx} at {face_region:?}: {age:?}");

            faces.push(FaceRecord {
                bounds: d.bounds,
                confidence: d.confidence,
                age,
                face_crop: region::encode_png(&face)?,
            });
        }

        Ok(JobResult {
            faces,
            image: img,
            detector_width: self.detector_width,
        })
    }
}
