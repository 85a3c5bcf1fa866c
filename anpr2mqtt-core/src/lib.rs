//! anpr2mqtt-core: ANPR camera event pipeline
//!
//! Turns images dropped by an automatic number plate recognition camera into
//! Home Assistant MQTT messages: file name parsing, image size reduction,
//! OCR of burned-in fields, target classification, registry lookup and a
//! persisted visit history.

pub mod classifier;
pub mod config;
pub mod error;
pub mod filename;
pub mod handler;
pub mod imaging;
pub mod ocr;
pub mod publisher;
pub mod registry;
pub mod tracker;

pub use classifier::{classify, Classification, Priority};
pub use config::{EventSettings, Settings, SettingsSources, TargetSettings};
pub use error::{Anpr2MqttError, Result};
pub use filename::ImageInfo;
pub use handler::EventHandler;
pub use ocr::{TesseractRecognizer, TextRecognizer};
pub use publisher::{EventTopics, HomeAssistantPublisher, MessageSink, StateMessage};
pub use registry::{DvlaClient, LookupError, RegistryClient, RegistryLookup};
pub use tracker::VisitTracker;
