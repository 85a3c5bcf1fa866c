//! Error types for anpr2mqtt

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Anpr2MqttError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pattern error: {0}")]
    Pattern(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Publish error: {0}")]
    Publish(String),
}

pub type Result<T> = std::result::Result<T, Anpr2MqttError>;
