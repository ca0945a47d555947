use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Md1Error, Result};

/// Copy `image` to `<stem>_backup_<YYYYmmdd_HHMMSS><.ext>`, inside
/// `backup_dir` when given (created on demand), otherwise next to the image.
pub fn create_backup(image: &Path, backup_dir: Option<&Path>) -> Result<PathBuf> {
    let stem = image.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let ext = image
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup_name = format!("{stem}_backup_{timestamp}{ext}");

    let backup_path = match backup_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(Md1Error::io_at(dir))?;
            dir.join(backup_name)
        }
        None => image.parent().unwrap_or_else(|| Path::new(".")).join(backup_name),
    };

    fs::copy(image, &backup_path).map_err(Md1Error::io_at(&backup_path))?;
    Ok(backup_path)
}
