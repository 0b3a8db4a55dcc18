use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::error::Result;

/// Where censored photos go, relative to the chosen base directory.
pub const OUTPUT_DIR: &str = "Pictures/Censored";

const PREFIX: &str = "censored_";

/// `censored_<stem>.jpg`, or a timestamped name when there is no usable
/// source name.
pub fn censored_file_name(original: Option<&Path>) -> String {
    let stem = original
        .and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty());

    match stem {
        Some(stem) => format!("{PREFIX}{stem}.jpg"),
        None => {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            format!("{PREFIX}{millis}.jpg")
        }
    }
}

/// Writes `bytes` to `<base>/Pictures/Censored/<name>`, creating directories
/// as needed.
pub fn save(base: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let dir = base.join(OUTPUT_DIR);
    fs::create_dir_all(&dir)?;

    let path = dir.join(name);
    fs::write(&path, bytes)?;
    info!("Saved {} bytes to {}", bytes.len(), path.display());

    Ok(path)
}
