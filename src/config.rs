use std::path::PathBuf;
use std::time::Duration;

/// Width of the image handed to the face detector. Height follows the
/// source aspect ratio.
pub const DETECTOR_WIDTH: u32 = 640;

/// Side of the square tensor the age classifier was trained on.
pub const CLASSIFIER_SIZE: u32 = 133;

/// Confidences at or below this are labelled as a child.
pub const ADULT_THRESHOLD: f32 = 0.5;

/// Faces are shrunk to this square before blurring.
pub const REDACTION_WORKING_SIZE: u32 = 64;

/// Reach of the redaction blur kernel, in working-size pixels.
pub const REDACTION_BLUR_RADIUS: f32 = REDACTION_WORKING_SIZE as f32 / 6.;

pub const JPEG_QUALITY: u8 = 90;

/// Requests allowed to wait behind the one in flight.
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

pub const DETECTOR_MODEL: &str = "face_detection_yolo.onnx";
pub const AGE_MODEL: &str = "age_classification.onnx";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub detector_model: PathBuf,
    pub age_model: PathBuf,
    pub threads: usize,
    pub detector_width: u32,
    pub classifier_size: u32,
    pub queue_depth: usize,
    pub job_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector_model: PathBuf::from("./models").join(DETECTOR_MODEL),
            age_model: PathBuf::from("./models").join(AGE_MODEL),
            threads: num_cpus::get(),
            detector_width: DETECTOR_WIDTH,
            classifier_size: CLASSIFIER_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            job_timeout: None,
        }
    }
}
