//! Offline helpers for tuning OCR fields and file name patterns

use anpr2mqtt_core::config::{EventSettings, FilenamePattern, OcrSettings};
use anpr2mqtt_core::filename;
use anpr2mqtt_core::ocr::{extract_fields, TextRecognizer};
use anyhow::Context;
use indexmap::IndexMap;
use std::path::Path;

/// Run the configured OCR fields against one image
pub fn ocr_file(
    image_path: &Path,
    event: &EventSettings,
    ocr: &OcrSettings,
    recognizer: &dyn TextRecognizer,
) -> anyhow::Result<IndexMap<String, String>> {
    let image = image::open(image_path).with_context(|| format!("Image can't be loaded: {}", image_path.display()))?;
    Ok(extract_fields(Some(&image), event, ocr, recognizer))
}

/// Describe every file in `dir` whose name the pattern can parse
pub fn list_dir(dir: &Path, pattern: &FilenamePattern) -> anyhow::Result<Vec<String>> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut lines = Vec::new();
    for entry in entries {
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(info) = filename::parse(&name, metadata.len(), pattern) {
            lines.push(format!(
                "{}: timestamp={},ext={}",
                info.target,
                filename::isoformat(&info.timestamp),
                info.extension.as_deref().unwrap_or("")
            ));
        }
    }
    Ok(lines)
}
