use std::collections::BTreeSet;
use std::thread;

use flume::Receiver;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{GenericImage, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use tracing::{debug, span, trace, warn, Level};

use crate::config::{DETECTOR_WIDTH, JPEG_QUALITY, REDACTION_BLUR_RADIUS, REDACTION_WORKING_SIZE};
use crate::error::{Error, Result};
use crate::geometry::detector_to_original;
use crate::orientation::decode_oriented;
use crate::pipeline::FaceRecord;
use crate::shapes::rect::Rect;

/// Blurs selected faces. Each region is shrunk to a small square, blurred,
/// and blown back up with nearest-neighbour sampling, which destroys far more
/// detail than blurring at full size.
#[derive(Debug, Clone, Copy)]
pub struct Redactor {
    pub detector_width: u32,
    pub working_size: u32,
    pub blur_radius: f32,
    pub jpeg_quality: u8,
}

impl Default for Redactor {
    fn default() -> Self {
        Self {
            detector_width: DETECTOR_WIDTH,
            working_size: REDACTION_WORKING_SIZE,
            blur_radius: REDACTION_BLUR_RADIUS,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

/// Pending background redaction.
pub struct RedactionTicket {
    reply: Receiver<Result<Vec<u8>>>,
}

impl RedactionTicket {
    pub fn wait(self) -> Result<Vec<u8>> {
        self.reply.recv().map_err(|_| Error::WorkerStopped)?
    }

    pub async fn wait_async(self) -> Result<Vec<u8>> {
        self.reply.recv_async().await.map_err(|_| Error::WorkerStopped)?
    }
}

impl Redactor {
    /// Returns a copy of `source` with the selected faces blurred. Every
    /// patch is computed from `source`, never from already blurred pixels.
    pub fn redact_image(
        &self,
        source: &RgbImage,
        faces: &[FaceRecord],
        selected: &BTreeSet<usize>,
    ) -> Result<RgbImage> {
        let span = span!(Level::DEBUG, "redact", faces = selected.len());
        let _guard = span.enter();

        let (w, h) = source.dimensions();
        let mut out = source.clone();

        for &idx in selected {
            let face = faces.get(idx).ok_or(Error::IndexOutOfRange {
                index: idx,
                len: faces.len(),
            })?;

            let region = detector_to_original(&face.bounds, w, self.detector_width).to_pixels(w, h);
            if region.is_empty() {
                warn!("Skipping face {idx}: region {region:?} has no area");
                continue;
            }

            let patch = self.blurred_patch(source, region);
            out.copy_from(&patch, region.x, region.y)
                .map_err(|e| Error::Encode(e.to_string()))?;
            trace!("Blurred face {idx} at {region:?}");
        }

        Ok(out)
    }

    fn blurred_patch(&self, source: &RgbImage, region: Rect) -> RgbImage {
        let face = imageops::crop_imm(source, region.x, region.y, region.w, region.h).to_image();
        let small = imageops::resize(&face, self.working_size, self.working_size, FilterType::Triangle);
        let blurred = gaussian_blur_f32(&small, self.blur_sigma());
        imageops::resize(&blurred, region.w, region.h, FilterType::Nearest)
    }

    /// imageproc cuts its kernel off at 2 sigma either side of the centre.
    fn blur_sigma(&self) -> f32 {
        self.blur_radius / 2.
    }

    /// Decodes `original`, blurs the selected faces and re-encodes as JPEG.
    /// The output carries no EXIF or other metadata from the input.
    pub fn redact(&self, original: &[u8], faces: &[FaceRecord], selected: &BTreeSet<usize>) -> Result<Vec<u8>> {
        let source = decode_oriented(original)?.into_rgb8();
        let out = self.redact_image(&source, faces, selected)?;
        encode_jpeg(&out, self.jpeg_quality)
    }

    /// Runs [`Redactor::redact`] on its own short-lived thread.
    pub fn spawn(&self, original: Vec<u8>, faces: Vec<FaceRecord>, selected: BTreeSet<usize>) -> Result<RedactionTicket> {
        let redactor = *self;
        let (tx, rx) = flume::bounded(1);

        thread::Builder::new()
            .name("redaction".into())
            .spawn(move || {
                let result = redactor.redact(&original, &faces, &selected);
                if let Err(e) = &result {
                    warn!("Redaction failed: {e}");
                }
                let _ = tx.send(result);
            })?;

        Ok(RedactionTicket { reply: rx })
    }
}

/// Baseline JPEG with no APP segments besides the encoder's own JFIF header.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(img)
        .map_err(|e| Error::Encode(e.to_string()))?;
    debug!("Encoded {}x{} JPEG, {} bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}
