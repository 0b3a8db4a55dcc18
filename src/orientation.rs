use std::io::Cursor;

use exif::{In, Tag};
use image::DynamicImage;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// EXIF orientation, naming the transform that brings stored pixels into
/// display orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Identity,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Rotate90FlipHorizontal,
    Rotate90,
    Rotate270FlipHorizontal,
    Rotate270,
}

impl Orientation {
    /// Unknown tag values fall back to identity.
    pub fn from_tag(tag: u32) -> Orientation {
        match tag {
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Rotate90FlipHorizontal,
            6 => Orientation::Rotate90,
            7 => Orientation::Rotate270FlipHorizontal,
            8 => Orientation::Rotate270,
            _ => Orientation::Identity,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Orientation {
        read_orientation_tag(bytes)
            .map(Orientation::from_tag)
            .unwrap_or_default()
    }

    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Orientation::Identity => img,
            Orientation::FlipHorizontal => img.fliph(),
            Orientation::Rotate180 => img.rotate180(),
            Orientation::FlipVertical => img.flipv(),
            Orientation::Rotate90FlipHorizontal => img.rotate90().fliph(),
            Orientation::Rotate90 => img.rotate90(),
            Orientation::Rotate270FlipHorizontal => img.rotate270().fliph(),
            Orientation::Rotate270 => img.rotate270(),
        }
    }
}

/// Raw orientation tag of the primary image, if the container carries EXIF.
pub fn read_orientation_tag(bytes: &[u8]) -> Option<u32> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;

    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
}

/// Decodes image bytes and rotates/flips the pixels into display orientation.
pub fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage> {
    let img = image::load_from_memory(bytes).map_err(|e| Error::Decode(e.to_string()))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::Decode("image has no pixels".into()));
    }

    let orientation = Orientation::from_bytes(bytes);
    trace!("Orientation {orientation:?}");
    let img = orientation.apply(img);
    debug!("Decoded {}x{} image", img.width(), img.height());

    Ok(img)
}
