//! Per-file event pipeline
//!
//! Each closed image file runs through parse, normalise, extract, classify,
//! registry lookup and visit tracking before the results are published.
//! Events are processed one at a time; the visit history relies on that.

use crate::classifier::classify;
use crate::config::{EventSettings, ImageSettings, OcrSettings, Settings, TargetSettings};
use crate::error::Result;
use crate::filename;
use crate::imaging::{self, NormalizedImage};
use crate::ocr::{extract_fields, TextRecognizer};
use crate::publisher::{EventTopics, HomeAssistantPublisher, StateMessage};
use crate::registry::RegistryClient;
use crate::tracker::VisitTracker;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct EventHandler {
    event: EventSettings,
    topics: EventTopics,
    targets: Option<TargetSettings>,
    ocr: OcrSettings,
    image: ImageSettings,
    tracker: VisitTracker,
    publisher: Arc<HomeAssistantPublisher>,
    recognizer: Arc<dyn TextRecognizer>,
    registry: Option<Arc<dyn RegistryClient>>,
}

impl EventHandler {
    pub fn new(
        settings: &Settings,
        event: EventSettings,
        publisher: Arc<HomeAssistantPublisher>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        if let Some(base) = &event.image_url_base {
            info!("Images available from web server with prefix {}", base);
        }
        Self {
            topics: EventTopics::new(&settings.mqtt.topic_root, &event),
            targets: settings.targets.get(&event.target_type).cloned(),
            ocr: settings.ocr.clone(),
            image: settings.image.clone(),
            tracker: VisitTracker::new(&settings.tracker.data_dir),
            event,
            publisher,
            recognizer,
            registry: None,
        }
    }

    /// Attach a registry; ignored unless it serves this event's target type
    pub fn with_registry(mut self, registry: Option<Arc<dyn RegistryClient>>) -> Self {
        self.registry = registry.filter(|r| r.target_type() == self.event.target_type);
        if self.registry.is_some() {
            info!("Configured registry lookup for {} {}", self.event.event, self.event.camera);
        } else {
            info!("No registry lookup configured for {} {}", self.event.event, self.event.camera);
        }
        self
    }

    /// Replace the classification rules
    pub fn set_targets(&mut self, targets: Option<TargetSettings>) {
        self.targets = targets;
    }

    /// Publish Home Assistant discovery for this event
    pub async fn announce(&self) -> Result<()> {
        self.publisher.post_discovery_message(&self.topics, &self.event).await?;
        info!(
            "Publishing {} {} state to {}",
            self.event.event, self.event.camera, self.topics.state
        );
        Ok(())
    }

    pub fn on_created(&self, path: &Path) {
        info!("New file detected: {}", path.display());
    }

    /// Run the pipeline for a completely written file
    pub async fn on_closed(&self, path: &Path) {
        info!("New complete file detected: {}", path.display());

        let size = match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            Ok(_) => {
                warn!("Empty image file, ignoring, at {}", path.display());
                return;
            }
            Err(e) => {
                warn!("Unreadable image file, ignoring, at {}: {}", path.display(), e);
                return;
            }
        };

        if let Err(e) = self.process(path, size).await {
            error!("Failed to parse file event {}: {}", path.display(), e);
            let message = StateMessage {
                error: Some(e.to_string()),
                file_path: Some(path.to_path_buf()),
                ..StateMessage::default()
            };
            if let Err(e) = self
                .publisher
                .post_state_message(&self.topics.state, &message, &self.event)
                .await
            {
                error!("Failed to publish error state for {}: {}", path.display(), e);
            }
        }
    }

    async fn process(&self, path: &Path, size: u64) -> Result<()> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let url = self
            .event
            .image_url_base
            .as_ref()
            .map(|base| format!("{}/{}", base, file_name));

        let Some(mut image_info) = filename::parse(&file_name, size, &self.event.image_name_re) else {
            let message = StateMessage {
                ocr_fields: extract_fields(None, &self.event, &self.ocr, self.recognizer.as_ref()),
                url,
                file_path: Some(path.to_path_buf()),
                ..StateMessage::default()
            };
            return self
                .publisher
                .post_state_message(&self.topics.state, &message, &self.event)
                .await;
        };
        info!("Examining image for {} at {}", image_info.target, path.display());

        let normalized = imaging::normalize(
            path,
            &mut image_info,
            &self.image.jpeg_opts,
            &self.image.png_opts,
        );
        let ocr_fields = extract_fields(
            normalized.as_ref().map(|n| &n.image),
            &self.event,
            &self.ocr,
            self.recognizer.as_ref(),
        );

        let classification = classify(Some(&image_info.target), self.targets.as_ref());
        let target = classification
            .target
            .clone()
            .unwrap_or_else(|| image_info.target.clone());

        let reg_info = match &self.registry {
            Some(registry) if !classification.known && !image_info.target.is_empty() => {
                Some(registry.lookup(&target).await.to_json())
            }
            _ => None,
        };

        let (previous_sightings, last_sighting) =
            self.tracker
                .record_visit(&target, &self.event.target_type, Some(image_info.timestamp));

        if classification.ignore {
            info!("Skipping MQTT publication for ignored {}", target);
            return Ok(());
        }

        let output_format = image_info.extension.as_deref().and_then(imaging::output_format);
        let message = StateMessage {
            target: Some(target),
            image_info: Some(image_info),
            ocr_fields,
            classification: Some(classification),
            previous_sightings: Some(previous_sightings),
            last_sighting,
            url,
            error: None,
            file_path: Some(path.to_path_buf()),
            reg_info,
        };
        self.publisher
            .post_state_message(&self.topics.state, &message, &self.event)
            .await?;

        if let Some(normalized) = normalized {
            self.publish_image(path, &normalized, output_format).await;
        }
        Ok(())
    }

    async fn publish_image(&self, path: &Path, normalized: &NormalizedImage, format: Option<image::ImageFormat>) {
        let Some(format) = format else {
            warn!("Unknown image format for {}", path.display());
            return;
        };
        match normalized.payload(format) {
            Ok(bytes) => {
                if let Err(e) = self.publisher.post_image_message(&self.topics.image, bytes).await {
                    warn!("Image for {} not published: {}", path.display(), e);
                }
            }
            Err(e) => error!("Failed to encode image {} as {:?}: {}", path.display(), format, e),
        }
        debug!("Image handling complete for {}", path.display());
    }
}
