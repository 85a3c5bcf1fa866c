//! Home Assistant message publishing
//!
//! Formats state, image and discovery messages and hands them to a
//! [`MessageSink`]. Discovery payloads are remembered per topic so they can
//! be replayed when Home Assistant restarts or the broker connection returns.

use crate::classifier::Classification;
use crate::config::{EventSettings, HomeAssistantSettings, TARGET_TYPE_PLATE};
use crate::error::Result;
use crate::filename::{isoformat, ImageInfo};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Software version reported in discovery messages
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const ORIGIN_URL: &str = "https://anpt2mqtt.rhizomatics.org.uk";
const MANUFACTURER: &str = "rhizomatics";

/// Destination for outbound messages, normally an MQTT client
///
/// Messages are sent at most once; `retain` asks the broker to keep the
/// latest payload for late subscribers.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<()>;
}

/// State and image topics of one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTopics {
    pub state: String,
    pub image: String,
}

impl EventTopics {
    pub fn new(topic_root: &str, event: &EventSettings) -> Self {
        let base = format!("{}/{}/{}", topic_root, event.event, event.camera);
        Self {
            state: format!("{}/state", base),
            image: format!("{}/image", base),
        }
    }
}

/// Content of one state message
#[derive(Debug, Clone, Default)]
pub struct StateMessage {
    pub target: Option<String>,
    pub image_info: Option<ImageInfo>,
    pub ocr_fields: IndexMap<String, String>,
    pub classification: Option<Classification>,
    pub previous_sightings: Option<usize>,
    pub last_sighting: Option<DateTime<FixedOffset>>,
    pub url: Option<String>,
    pub error: Option<String>,
    pub file_path: Option<PathBuf>,
    pub reg_info: Option<Value>,
}

impl StateMessage {
    /// JSON payload, keys in publication order
    pub fn to_json(&self, event: &EventSettings) -> Value {
        let mut payload = Map::new();
        payload.insert("target".to_string(), json!(self.target));
        payload.insert("target_type".to_string(), json!(event.target_type));
        if event.target_type == TARGET_TYPE_PLATE {
            payload.insert("plate".to_string(), json!(self.target));
        }
        payload.insert("event".to_string(), json!(event.event));
        payload.insert("camera".to_string(), json!(event.camera));
        payload.insert("area".to_string(), json!(event.area));
        payload.insert("reg_info".to_string(), self.reg_info.clone().unwrap_or(Value::Null));
        for (label, value) in &self.ocr_fields {
            payload.insert(label.clone(), json!(value));
        }

        if let Some(error) = &self.error {
            payload.insert("error".to_string(), json!(error));
        }
        if let Some(url) = &self.url {
            payload.insert("event_image_url".to_string(), json!(url));
        }
        if let Some(file_path) = &self.file_path {
            payload.insert("file_path".to_string(), json!(file_path.display().to_string()));
        }
        if let Some(classification) = &self.classification {
            if let Ok(Value::Object(fields)) = serde_json::to_value(classification) {
                payload.extend(fields);
            }
        }
        if let Some(previous) = self.previous_sightings {
            payload.insert("previous_sightings".to_string(), json!(previous));
        }
        if let Some(last) = &self.last_sighting {
            payload.insert("last_sighting".to_string(), json!(isoformat(last)));
        }
        if let Some(info) = &self.image_info {
            payload.insert("event_time".to_string(), json!(isoformat(&info.timestamp)));
            payload.insert("image_event".to_string(), json!(info.sub_event));
            payload.insert("ext".to_string(), json!(info.extension));
            payload.insert("image_size".to_string(), json!(info.size_bytes));
        }
        Value::Object(payload)
    }
}

pub struct HomeAssistantPublisher {
    sink: Arc<dyn MessageSink>,
    discovery_topic_root: String,
    device_creation: bool,
    discovery_messages: RwLock<IndexMap<String, Vec<u8>>>,
}

impl HomeAssistantPublisher {
    pub fn new(sink: Arc<dyn MessageSink>, settings: &HomeAssistantSettings) -> Self {
        Self {
            sink,
            discovery_topic_root: settings.discovery_topic_root.clone(),
            device_creation: settings.device_creation,
            discovery_messages: RwLock::new(IndexMap::new()),
        }
    }

    /// Topic on which Home Assistant announces `online` / `offline`
    pub fn status_topic(&self) -> String {
        format!("{}/status", self.discovery_topic_root)
    }

    pub async fn post_state_message(&self, topic: &str, message: &StateMessage, event: &EventSettings) -> Result<()> {
        let payload = message.to_json(event);
        let bytes = serde_json::to_vec(&payload)?;
        match self.sink.publish(topic, bytes, true).await {
            Ok(()) => {
                debug!("Published HA MQTT State message to {}: {}", topic, payload);
                Ok(())
            }
            Err(e) => {
                error!("Failed to publish event {}: {}", payload, e);
                Err(e)
            }
        }
    }

    pub async fn post_image_message(&self, topic: &str, image: Vec<u8>) -> Result<()> {
        let size = image.len();
        match self.sink.publish(topic, image, true).await {
            Ok(()) => {
                debug!("Published HA MQTT Image message to {}: {} bytes", topic, size);
                Ok(())
            }
            Err(e) => {
                error!("Failed to publish image entity: {}", e);
                Err(e)
            }
        }
    }

    /// Announce the sensor and image entities of an event
    pub async fn post_discovery_message(&self, topics: &EventTopics, event: &EventSettings) -> Result<()> {
        let (sensor_topic, sensor) = self.sensor_discovery(topics, event);
        let (image_topic, image) = self.image_discovery(topics, event);
        for (topic, payload) in [(sensor_topic, sensor), (image_topic, image)] {
            let bytes = serde_json::to_vec(&payload)?;
            self.discovery_messages.write().insert(topic.clone(), bytes.clone());
            self.sink.publish(&topic, bytes, true).await?;
            info!("Published HA MQTT Discovery message to {}", topic);
        }
        Ok(())
    }

    /// Re-send every discovery payload; returns how many were sent
    pub async fn republish_discovery(&self) -> usize {
        let messages: Vec<(String, Vec<u8>)> = self
            .discovery_messages
            .read()
            .iter()
            .map(|(topic, payload)| (topic.clone(), payload.clone()))
            .collect();

        let mut sent = 0;
        for (topic, payload) in messages {
            match self.sink.publish(&topic, payload, true).await {
                Ok(()) => sent += 1,
                Err(e) => error!("Failed to republish discovery to {}: {}", topic, e),
            }
        }
        info!("Republished {} discovery messages", sent);
        sent
    }

    /// Handle a payload on the status topic
    pub async fn on_platform_status(&self, payload: &[u8]) -> usize {
        let status = String::from_utf8_lossy(payload);
        if status.trim() == "online" {
            info!("Home Assistant online, republishing discovery");
            self.republish_discovery().await
        } else {
            debug!("Home Assistant status {}", status.trim());
            0
        }
    }

    fn origin(&self) -> Value {
        json!({ "name": "anpr2mqtt", "sw": VERSION, "url": ORIGIN_URL })
    }

    fn decorate(&self, payload: &mut Map<String, Value>, event: &EventSettings) {
        if let Some(area) = &event.area {
            payload.insert("suggested_area".to_string(), json!(area));
        }
        if let Some(description) = &event.description {
            payload.insert("description".to_string(), json!(description));
        }
        if self.device_creation {
            payload.insert(
                "dev".to_string(),
                json!({
                    "name": format!("anpr2mqtt on {}", event.camera),
                    "sw_version": VERSION,
                    "manufacturer": MANUFACTURER,
                    "identifiers": [format!("{}.anpr2mqtt", event.camera)],
                }),
            );
        }
    }

    fn icon(event: &EventSettings) -> &'static str {
        if event.target_type == TARGET_TYPE_PLATE {
            "mdi:car-back"
        } else {
            "mdi:cctv"
        }
    }

    fn sensor_discovery(&self, topics: &EventTopics, event: &EventSettings) -> (String, Value) {
        let topic = format!("{}/sensor/{}/{}/config", self.discovery_topic_root, event.camera, event.event);
        let mut payload = Map::new();
        payload.insert("o".to_string(), self.origin());
        payload.insert("device_class".to_string(), Value::Null);
        payload.insert("value_template".to_string(), json!("{{ value_json.target }}"));
        payload.insert("unique_id".to_string(), json!(format!("{}_{}", event.event, event.camera)));
        payload.insert("state_topic".to_string(), json!(topics.state));
        payload.insert("json_attributes_topic".to_string(), json!(topics.state));
        payload.insert("icon".to_string(), json!(Self::icon(event)));
        payload.insert("name".to_string(), json!(entity_name(event, &capitalize(&event.target_type))));
        self.decorate(&mut payload, event);
        (topic, Value::Object(payload))
    }

    fn image_discovery(&self, topics: &EventTopics, event: &EventSettings) -> (String, Value) {
        let topic = format!("{}/image/{}/{}/config", self.discovery_topic_root, event.camera, event.event);
        let mut payload = Map::new();
        payload.insert("o".to_string(), self.origin());
        payload.insert("device_class".to_string(), Value::Null);
        payload.insert("unique_id".to_string(), json!(format!("{}_{}_image", event.event, event.camera)));
        payload.insert("image_topic".to_string(), json!(topics.image));
        payload.insert("json_attributes_topic".to_string(), json!(topics.state));
        payload.insert("icon".to_string(), json!(Self::icon(event)));
        payload.insert("name".to_string(), json!(entity_name(event, "Snapshot")));
        self.decorate(&mut payload, event);
        (topic, Value::Object(payload))
    }
}

/// e.g. `ANPR driveway Plate`
fn entity_name(event: &EventSettings, suffix: &str) -> String {
    format!("{} {} {}", event.event.to_uppercase(), event.camera, suffix)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
