//! Text extraction from regions of a camera image
//!
//! Cameras burn status text (direction of travel, lane, speed) into the
//! image. Each configured field crops one region, reads it and checks the
//! reading against an allow-list.

use crate::config::{DimensionSettings, EventSettings, OcrFieldSettings, OcrSettings};
use crate::error::{Anpr2MqttError, Result};
use image::{DynamicImage, ImageFormat};
use indexmap::IndexMap;
use std::process::Command;
use tracing::{debug, error, warn};

/// Value of a field that could not be read
pub const UNKNOWN: &str = "Unknown";

/// Key under which per-field failures are reported
pub const OCR_ERROR: &str = "OCR_ERROR";

/// Text recognition engine
pub trait TextRecognizer: Send + Sync {
    /// Recognise all text in `image`
    fn recognize(&self, image: &DynamicImage) -> Result<String>;
}

/// Runs the `tesseract` command line tool
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    command: String,
    args: Vec<String>,
}

impl TesseractRecognizer {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_settings(settings: &OcrSettings) -> Self {
        Self::new(settings.tesseract_cmd.clone(), settings.tesseract_args.clone())
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Result<String> {
        let file = tempfile::Builder::new()
            .prefix("anpr2mqtt-ocr-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(file.path(), ImageFormat::Png)?;

        let output = Command::new(&self.command)
            .arg(file.path())
            .arg("stdout")
            .args(&self.args)
            .output()
            .map_err(|e| Anpr2MqttError::Ocr(format!("Failed to run {}: {}", self.command, e)))?;

        if !output.status.success() {
            return Err(Anpr2MqttError::Ocr(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Read every OCR field configured for an event
///
/// Fields default to [`UNKNOWN`]; a failure in one field is reported under
/// [`OCR_ERROR`] and does not stop the others.
pub fn extract_fields(
    image: Option<&DynamicImage>,
    event: &EventSettings,
    ocr: &OcrSettings,
    recognizer: &dyn TextRecognizer,
) -> IndexMap<String, String> {
    let fields: Vec<&OcrFieldSettings> = event
        .ocr_field_ids
        .iter()
        .filter_map(|id| ocr.fields.get(id))
        .collect();
    let mut results: IndexMap<String, String> = fields
        .iter()
        .map(|field| (field.label.clone(), UNKNOWN.to_string()))
        .collect();
    debug!("OCR default values: {:?}", results);

    let Some(image) = image else {
        debug!("OCR empty image");
        return results;
    };
    if fields.is_empty() {
        debug!("OCR no fields to scan");
        return results;
    }

    for field in fields {
        match read_field(image, field, recognizer) {
            Ok(Some(value)) => {
                results.insert(field.label.clone(), value);
            }
            Ok(None) => {}
            Err(e) => {
                error!("OCR fail on field {}: {}", field.label, e);
                results.insert(
                    OCR_ERROR.to_string(),
                    format!("field:{}, error:{}", field.label, e),
                );
            }
        }
    }
    results
}

/// `Ok(None)` leaves the field at its default
fn read_field(
    image: &DynamicImage,
    field: &OcrFieldSettings,
    recognizer: &dyn TextRecognizer,
) -> Result<Option<String>> {
    let mut region = match &field.crop {
        Some(crop) => match crop_from_bottom_left(image, crop) {
            Some(region) => region,
            None => {
                warn!(
                    "OCR field {} crop {:?} outside {}x{} image",
                    field.label,
                    crop,
                    image.width(),
                    image.height()
                );
                return Ok(None);
            }
        },
        None => image.clone(),
    };
    if field.invert {
        region.invert();
    }

    let text = recognizer.recognize(&region)?;
    let Some((_, value)) = text.split_once(':') else {
        warn!("Unparsable field {}: {:?}", field.label, text);
        return Ok(None);
    };

    let candidate = normalize_value(value.trim(), field);
    match &field.values {
        Some(values) if !values.contains(&candidate) => {
            warn!("Unknown value {} for OCR field {}", candidate, field.label);
            Ok(Some(UNKNOWN.to_string()))
        }
        _ => Ok(Some(candidate)),
    }
}

/// Apply the correction map, then align case with the allow-list
fn normalize_value(candidate: &str, field: &OcrFieldSettings) -> String {
    let mut candidate = candidate.to_string();

    if !field.correction.is_empty() && !field.correction.contains_key(&candidate) {
        for (correct_to, patterns) in &field.correction {
            if patterns.iter().any(|p| p.is_match(&candidate)) {
                debug!("Auto-correcting {} from {} to {}", field.label, candidate, correct_to);
                candidate = correct_to.clone();
            }
        }
    }

    if let Some(values) = &field.values {
        if !candidate.is_empty() && !values.contains(&candidate) {
            let upper = candidate.to_uppercase();
            let mut matches = values.iter().filter(|v| v.to_uppercase() == upper);
            if let (Some(value), None) = (matches.next(), matches.next()) {
                debug!("OCR case correcting field {} from {} to {}", field.label, candidate, value);
                candidate = value.clone();
            }
        }
    }
    candidate
}

/// Crop a box whose `y` is measured up from the bottom edge
///
/// The box is clamped to the image; `None` when nothing of it is inside.
fn crop_from_bottom_left(image: &DynamicImage, crop: &DimensionSettings) -> Option<DynamicImage> {
    let (width, height) = (i64::from(image.width()), i64::from(image.height()));

    let x1 = i64::from(crop.x);
    let y1 = height - (i64::from(crop.y) + i64::from(crop.h));
    let x2 = x1 + i64::from(crop.w);
    let y2 = height - i64::from(crop.y);
    debug!("Cropping {}x{} image to {:?}", width, height, (x1, y1, x2, y2));

    let (x1, x2) = (x1.clamp(0, width), x2.clamp(0, width));
    let (y1, y2) = (y1.clamp(0, height), y2.clamp(0, height));
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(image.crop_imm(x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
}
