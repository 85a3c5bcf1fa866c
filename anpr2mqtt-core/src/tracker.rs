//! Per-target visit history
//!
//! Each target gets an append-only JSON array of ISO-8601 sighting times at
//! `{data_dir}/{target_type}/{target}.json`.

use crate::error::{Anpr2MqttError, Result};
use crate::filename::{isoformat, local_timestamp};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime};
use std::path::PathBuf;
use tracing::{debug, error};

/// Identifier recorded when a target is empty
pub const UNKNOWN_TARGET: &str = "UNKNOWN";

#[derive(Debug, Clone)]
pub struct VisitTracker {
    data_dir: PathBuf,
}

impl VisitTracker {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Record a sighting and report what was known before it
    ///
    /// Returns the number of earlier sightings and the most recent one.
    /// Failures are logged and reported as `(0, None)`.
    pub fn record_visit(
        &self,
        target: &str,
        target_type: &str,
        event_time: Option<DateTime<FixedOffset>>,
    ) -> (usize, Option<DateTime<FixedOffset>>) {
        let target = if target.is_empty() { UNKNOWN_TARGET } else { target };
        match self.append(target, target_type, event_time) {
            Ok(previous) => previous,
            Err(e) => {
                error!("Failed to track sightings for {}:{}: {}", target_type, target, e);
                (0, None)
            }
        }
    }

    /// Path of the history file for a target
    pub fn history_path(&self, target: &str, target_type: &str) -> Result<PathBuf> {
        for part in [target, target_type] {
            if part.is_empty() || part.contains(&['/', '\\'][..]) || part.contains("..") {
                return Err(Anpr2MqttError::Tracker(format!(
                    "Refusing unsafe history path component '{}'",
                    part
                )));
            }
        }
        Ok(self.data_dir.join(target_type).join(format!("{}.json", target)))
    }

    fn append(
        &self,
        target: &str,
        target_type: &str,
        event_time: Option<DateTime<FixedOffset>>,
    ) -> Result<(usize, Option<DateTime<FixedOffset>>)> {
        let path = self.history_path(target, target_type)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut sightings: Vec<String> = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        let previous = sightings.len();
        let last_seen = match sightings.last() {
            Some(raw) => Some(parse_sighting(raw)?),
            None => None,
        };

        let now = event_time.unwrap_or_else(|| Local::now().fixed_offset());
        sightings.push(isoformat(&now));
        std::fs::write(&path, serde_json::to_string(&sightings)?)?;
        debug!("Recorded sighting {} of {} at {}", previous + 1, target, path.display());

        Ok((previous, last_seen))
    }
}

/// Offset-less entries are read in the local zone
fn parse_sighting(raw: &str) -> Result<DateTime<FixedOffset>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp);
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| Anpr2MqttError::Tracker(format!("Invalid sighting '{}': {}", raw, e)))?;
    local_timestamp(&naive)
        .ok_or_else(|| Anpr2MqttError::Tracker(format!("Sighting '{}' does not exist locally", raw)))
}
