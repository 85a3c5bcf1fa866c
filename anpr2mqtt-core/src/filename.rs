//! Image file name parsing
//!
//! Cameras encode the detection time and the recognised target in the
//! file name, e.g. `20250602103045407_B4DM3N_VEHICLE_DETECTION.jpg`.

use crate::config::FilenamePattern;
use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Metadata recovered from an image file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub target: String,
    pub sub_event: Option<String>,
    pub timestamp: DateTime<FixedOffset>,
    pub extension: Option<String>,
    /// Bytes on disk, or of the re-encoded image once normalised
    pub size_bytes: u64,
}

/// Parse a file name against the event pattern
///
/// Returns `None` when the name does not match or carries an impossible date.
pub fn parse(file_name: &str, size_bytes: u64, pattern: &FilenamePattern) -> Option<ImageInfo> {
    let captures = pattern.captures(file_name)?;

    let target = match captures.name("target").map(|m| m.as_str()) {
        Some(target) if !target.is_empty() => target.to_string(),
        _ => {
            warn!("No target found in {} for pattern {}", file_name, pattern.as_str());
            return None;
        }
    };

    let raw_date = captures.name("dt").map(|m| m.as_str()).unwrap_or_default();
    let timestamp = match parse_timestamp(raw_date) {
        Some(timestamp) => timestamp,
        None => {
            warn!("Unable to parse {}: invalid timestamp '{}'", file_name, raw_date);
            return None;
        }
    };

    let sub_event = captures.name("event").map(|m| m.as_str().to_string());
    let extension = match captures.name("ext") {
        Some(ext) => Some(ext.as_str().to_string()),
        // Falls back to the stem, not the suffix
        None => Some(
            file_name
                .rsplit_once('.')
                .map_or(file_name, |(stem, _)| stem)
                .to_string(),
        ),
    };

    debug!("Parsed {}: target={} timestamp={}", file_name, target, timestamp);
    Some(ImageInfo {
        target,
        sub_event,
        timestamp,
        extension,
        size_bytes,
    })
}

/// `YYYYMMDDHHMMSSfff` in the local zone
///
/// The last three digits are taken as microseconds as they stand, so
/// `407` becomes `.000407`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if raw.len() < 17 || !raw.is_ascii() {
        return None;
    }
    let field = |range: std::ops::Range<usize>| raw[range].parse::<u32>().ok();

    let year = raw[0..4].parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?;
    let naive = date.and_hms_micro_opt(field(8..10)?, field(10..12)?, field(12..14)?, field(14..17)?)?;

    local_timestamp(&naive)
}

/// Resolve a wall-clock time in the local zone
///
/// Ambiguous times take the earlier instant. Times inside a spring-forward
/// gap keep the offset in force just before it.
pub fn local_timestamp(naive: &NaiveDateTime) -> Option<DateTime<FixedOffset>> {
    if let Some(local) = Local.from_local_datetime(naive).earliest() {
        return Some(local.fixed_offset());
    }
    let before = Local.from_local_datetime(&(*naive - Duration::hours(1))).earliest()?;
    before.offset().from_local_datetime(naive).single()
}

/// ISO-8601 rendering with microseconds only when non-zero
pub fn isoformat(timestamp: &DateTime<FixedOffset>) -> String {
    let format = if timestamp.timestamp_subsec_nanos() == 0 {
        SecondsFormat::Secs
    } else {
        SecondsFormat::Micros
    };
    timestamp.to_rfc3339_opts(format, false)
}
