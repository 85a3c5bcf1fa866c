//! Configuration for anpr2mqtt
//!
//! Settings are resolved once at startup from layered sources (YAML file,
//! secrets directory, environment, command-line overrides) and then shared
//! read-only with every pipeline component.

use crate::error::{Anpr2MqttError, Result};
use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Target type of number plate events
pub const TARGET_TYPE_PLATE: &str = "plate";

/// Default location of the YAML configuration file
pub const DEFAULT_CONFIG_FILE: &str = "/config/anpr2mqtt.yaml";

/// Default location of mounted secrets
pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";

/// Prefix of environment variables carrying settings
pub const ENV_PREFIX: &str = "ANPR2MQTT";

/// Nesting delimiter used by environment variables and secret file names
pub const NESTED_DELIMITER: &str = "__";

/// A user supplied regular expression, matched at the start of the input
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})", source))
            .map_err(|e| Anpr2MqttError::Pattern(format!("'{}': {}", source, e)))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// True if the pattern matches at the start of `text`
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.source)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(serde::de::Error::custom)
    }
}

/// Image file name pattern with the named groups the parser relies on
///
/// `dt` and `target` are mandatory, `event` and `ext` optional.
#[derive(Clone)]
pub struct FilenamePattern {
    pattern: Pattern,
}

impl FilenamePattern {
    pub const DEFAULT: &'static str =
        r"(?P<dt>[0-9]{17})_(?P<target>[A-Z0-9]+)_(?P<event>VEHICLE_DETECTION)\.(?P<ext>jpg|png|gif|jpeg)";

    /// Compile and check the mandatory capture groups
    pub fn new(source: &str) -> Result<Self> {
        let pattern = Pattern::new(source)?;
        for group in ["dt", "target"] {
            if !pattern.regex.capture_names().flatten().any(|name| name == group) {
                return Err(Anpr2MqttError::Pattern(format!(
                    "'{}' has no named group '{}'",
                    source, group
                )));
            }
        }
        Ok(Self { pattern })
    }

    /// Capture groups for a file name, if it matches
    pub fn captures<'t>(&self, file_name: &'t str) -> Option<Captures<'t>> {
        self.pattern.regex.captures(file_name)
    }

    pub fn is_match(&self, file_name: &str) -> bool {
        self.pattern.is_match(file_name)
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Default for FilenamePattern {
    fn default() -> Self {
        // The built-in pattern always compiles and carries both groups
        let regex = Regex::new(&format!("^(?:{})", Self::DEFAULT))
            .unwrap_or_else(|_| unreachable!("default filename pattern is valid"));
        Self {
            pattern: Pattern {
                source: Self::DEFAULT.to_string(),
                regex,
            },
        }
    }
}

impl fmt::Debug for FilenamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FilenamePattern({:?})", self.pattern.source)
    }
}

impl Serialize for FilenamePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.pattern.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilenamePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        FilenamePattern::new(&source).map_err(serde::de::Error::custom)
    }
}

/// Accept plain scalars (numbers, booleans) where a string is expected
///
/// Passwords and API keys are often all digits, which YAML and the
/// environment overlay would otherwise type as integers.
fn de_opt_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string, got {:?}",
            other
        ))),
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Equivalent `tracing` filter directive
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Anpr2MqttError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            _ => Err(Anpr2MqttError::Config(format!("Unknown log level '{}'", s))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// MQTT broker connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub topic_root: String,
    pub host: String,
    pub port: u16,
    #[serde(deserialize_with = "de_opt_string")]
    pub user: Option<String>,
    #[serde(rename = "pass", alias = "password", deserialize_with = "de_opt_string")]
    pub password: Option<String>,
    pub client_id: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            topic_root: "anpr2mqtt".to_string(),
            host: "localhost".to_string(),
            port: 1883,
            user: None,
            password: None,
            client_id: "anpr2mqtt".to_string(),
        }
    }
}

/// One watched camera event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Camera identifier, used to build topic names
    pub camera: String,
    /// Event identifier, used to build topic names
    pub event: String,
    /// Home Assistant area
    pub area: Option<String>,
    /// Free text description of the event
    pub description: Option<String>,
    /// Type of target for this event, `plate` for ANPR
    pub target_type: String,
    /// Directory to watch
    pub watch_path: PathBuf,
    /// Pattern extracting date, target, event and extension from image names
    pub image_name_re: FilenamePattern,
    /// Base URL turning a file name into a web link
    pub image_url_base: Option<String>,
    /// OCR field definitions to read from each image
    pub ocr_field_ids: Vec<String>,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            camera: "driveway".to_string(),
            event: "anpr".to_string(),
            area: None,
            description: None,
            target_type: TARGET_TYPE_PLATE.to_string(),
            watch_path: PathBuf::from("."),
            image_name_re: FilenamePattern::default(),
            image_url_base: None,
            ocr_field_ids: vec!["hik_direction".to_string()],
        }
    }
}

/// Home Assistant discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantSettings {
    pub discovery_topic_root: String,
    pub device_creation: bool,
}

impl Default for HomeAssistantSettings {
    fn default() -> Self {
        Self {
            discovery_topic_root: "homeassistant".to_string(),
            device_creation: true,
        }
    }
}

/// UK vehicle registry (DVLA vehicle enquiry API)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DvlaSettings {
    #[serde(deserialize_with = "de_opt_string")]
    pub api_key: Option<String>,
    /// Seconds a successful lookup is served from cache
    pub cache_ttl: u64,
    pub base_url: String,
}

impl Default for DvlaSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            cache_ttl: 86400,
            base_url: "https://driver-vehicle-licensing.api.gov.uk".to_string(),
        }
    }
}

/// Visit history storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    pub data_dir: PathBuf,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data"),
        }
    }
}

/// JPEG re-encoding options; empty means "leave the image alone"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JpegOptions {
    pub quality: Option<u8>,
}

impl JpegOptions {
    pub fn is_empty(&self) -> bool {
        self.quality.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Default,
    Fast,
    Best,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PngFilter {
    None,
    Sub,
    Up,
    Avg,
    Paeth,
    Adaptive,
}

/// PNG re-encoding options; empty means "leave the image alone"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PngOptions {
    pub compression: Option<PngCompression>,
    pub filter: Option<PngFilter>,
}

impl PngOptions {
    pub fn is_empty(&self) -> bool {
        self.compression.is_none() && self.filter.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub jpeg_opts: JpegOptions,
    pub png_opts: PngOptions,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            jpeg_opts: JpegOptions { quality: Some(30) },
            png_opts: PngOptions {
                compression: Some(PngCompression::Best),
                filter: None,
            },
        }
    }
}

/// OCR crop box, anchored to the bottom-left corner of the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSettings {
    /// Horizontal position, measured from the image left side
    pub x: u32,
    /// Vertical position, measured from the image bottom side
    pub y: u32,
    /// Height in pixels
    pub h: u32,
    /// Width in pixels
    pub w: u32,
}

/// One OCR region of interest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrFieldSettings {
    pub label: String,
    pub crop: Option<DimensionSettings>,
    pub invert: bool,
    /// Canonical value -> patterns that should be corrected to it
    pub correction: IndexMap<String, Vec<Pattern>>,
    /// Allow-list of valid values
    pub values: Option<Vec<String>>,
}

impl Default for OcrFieldSettings {
    fn default() -> Self {
        Self {
            label: "ocr_field".to_string(),
            crop: None,
            invert: true,
            correction: IndexMap::new(),
            values: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub fields: IndexMap<String, OcrFieldSettings>,
    /// Tesseract executable
    pub tesseract_cmd: String,
    /// Extra arguments passed to tesseract after `stdout`
    pub tesseract_args: Vec<String>,
}

impl Default for OcrSettings {
    /// Reads `direction` for the Hikvision DS-2CD4A25FWD-IZS
    fn default() -> Self {
        let mut correction = IndexMap::new();
        correction.insert("Forward".to_string(), patterns(&[r"Fo.*rd"]));
        correction.insert("Reverse".to_string(), patterns(&[r"Re.*rse", r"Bac.*rd"]));

        let mut fields = IndexMap::new();
        fields.insert(
            "hik_direction".to_string(),
            OcrFieldSettings {
                label: "vehicle_direction".to_string(),
                crop: Some(DimensionSettings { x: 850, y: 0, h: 30, w: 650 }),
                invert: true,
                correction,
                values: Some(vec!["Forward".to_string(), "Reverse".to_string()]),
            },
        );
        Self {
            fields,
            tesseract_cmd: "tesseract".to_string(),
            tesseract_args: Vec::new(),
        }
    }
}

fn patterns(sources: &[&str]) -> Vec<Pattern> {
    sources.iter().filter_map(|s| Pattern::new(s).ok()).collect()
}

/// Classification lists for one target type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub known: IndexMap<String, Option<String>>,
    pub dangerous: IndexMap<String, Option<String>>,
    pub ignore: Vec<Pattern>,
    pub correction: IndexMap<String, Vec<Pattern>>,
}

/// Fully resolved application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: LogLevel,
    pub events: Vec<EventSettings>,
    pub image: ImageSettings,
    pub targets: IndexMap<String, TargetSettings>,
    pub tracker: TrackerSettings,
    pub mqtt: MqttSettings,
    pub dvla: DvlaSettings,
    pub homeassistant: HomeAssistantSettings,
    pub ocr: OcrSettings,
}

/// Where settings are read from, lowest precedence first
#[derive(Debug, Clone)]
pub struct SettingsSources {
    pub config_file: Option<PathBuf>,
    /// Fail if the config file is missing
    pub require_config_file: bool,
    pub secrets_dir: Option<PathBuf>,
    pub env_prefix: Option<String>,
    /// `dotted.key=value` overrides from the command line
    pub overrides: Vec<String>,
}

impl Default for SettingsSources {
    fn default() -> Self {
        Self {
            config_file: Some(PathBuf::from(DEFAULT_CONFIG_FILE)),
            require_config_file: false,
            secrets_dir: Some(PathBuf::from(DEFAULT_SECRETS_DIR)),
            env_prefix: Some(ENV_PREFIX.to_string()),
            overrides: Vec::new(),
        }
    }
}

impl Settings {
    /// Resolve settings from all configured sources and validate them
    pub fn load(sources: &SettingsSources) -> Result<Self> {
        let mut root = Value::Mapping(Mapping::new());

        if let Some(path) = &sources.config_file {
            if path.exists() {
                info!("Loading configuration from {}", path.display());
                let content = std::fs::read_to_string(path)?;
                root = parse_yaml_document(&content)?;
            } else if sources.require_config_file {
                return Err(Anpr2MqttError::Config(format!(
                    "Configuration file {} not found",
                    path.display()
                )));
            } else {
                debug!("No configuration file at {}", path.display());
            }
        }

        if let Some(dir) = &sources.secrets_dir {
            overlay_secrets(&mut root, dir)?;
        }

        if let Some(prefix) = &sources.env_prefix {
            overlay_env(&mut root, prefix, std::env::vars());
        }

        for entry in &sources.overrides {
            let (key, raw) = entry.split_once('=').ok_or_else(|| {
                Anpr2MqttError::Config(format!("Override '{}' is not key=value", entry))
            })?;
            let path: Vec<String> = key.split('.').map(|s| s.trim().to_string()).collect();
            set_path(&mut root, &path, parse_scalar(raw))?;
        }

        let settings: Settings = serde_yaml::from_value(root)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_value(parse_yaml_document(content)?)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.port == 0 {
            return Err(Anpr2MqttError::Config("MQTT port must be non-zero".to_string()));
        }
        if let Some(quality) = self.image.jpeg_opts.quality {
            if quality == 0 || quality > 100 {
                return Err(Anpr2MqttError::Config(
                    "JPEG quality must be between 1 and 100".to_string(),
                ));
            }
        }
        for event in &self.events {
            for (name, value) in [
                ("camera", &event.camera),
                ("event", &event.event),
                ("target_type", &event.target_type),
            ] {
                if value.is_empty() {
                    return Err(Anpr2MqttError::Config(format!("Event {} must not be empty", name)));
                }
                // Topic segments and history directories are built from these
                if value.contains(&['/', '+', '#'][..]) || value.contains("..") {
                    return Err(Anpr2MqttError::Config(format!(
                        "Event {} '{}' contains a reserved character",
                        name, value
                    )));
                }
            }
            for field_id in &event.ocr_field_ids {
                if !self.ocr.fields.contains_key(field_id) {
                    warn!(
                        "Event {} {} references unknown OCR field {}",
                        event.event, event.camera, field_id
                    );
                }
            }
        }
        Ok(())
    }
}

fn parse_yaml_document(content: &str) -> Result<Value> {
    let value: Value = serde_yaml::from_str(content)?;
    match value {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        Value::Mapping(_) => Ok(value),
        _ => Err(Anpr2MqttError::Config(
            "Configuration document must be a mapping".to_string(),
        )),
    }
}

/// Type a raw string the way YAML would, falling back to a plain string
fn parse_scalar(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Null) if !raw.trim().is_empty() && raw.trim() != "null" && raw.trim() != "~" => {
            Value::String(raw.to_string())
        }
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}

/// Set `path` inside `root`, creating intermediate mappings
fn set_path(root: &mut Value, path: &[String], value: Value) -> Result<()> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| Anpr2MqttError::Config("Empty settings key".to_string()))?;
    if path.iter().any(|segment| segment.is_empty()) {
        return Err(Anpr2MqttError::Config(format!(
            "Invalid settings key '{}'",
            path.join(".")
        )));
    }

    let mut node = root;
    for segment in parents {
        let mapping = match node {
            Value::Mapping(m) => m,
            _ => {
                return Err(Anpr2MqttError::Config(format!(
                    "Settings key '{}' crosses a non-mapping value",
                    path.join(".")
                )))
            }
        };
        let key = Value::String(segment.clone());
        if !matches!(mapping.get(&key), Some(Value::Mapping(_))) {
            mapping.insert(key.clone(), Value::Mapping(Mapping::new()));
        }
        node = mapping
            .get_mut(&key)
            .ok_or_else(|| Anpr2MqttError::Config(format!("Cannot descend into '{}'", segment)))?;
    }

    match node {
        Value::Mapping(m) => {
            m.insert(Value::String(last.clone()), value);
            Ok(())
        }
        _ => Err(Anpr2MqttError::Config(format!(
            "Settings key '{}' crosses a non-mapping value",
            path.join(".")
        ))),
    }
}

/// Secret files are named `section__key` and hold the raw value
fn overlay_secrets(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        debug!("No secrets directory at {}", dir.display());
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !name.contains(NESTED_DELIMITER) {
            debug!("Skipping secret file {}", name);
            continue;
        }
        let path = key_path(&name);
        let content = std::fs::read_to_string(entry.path())?;
        debug!("Applying secret {}", name);
        set_path(root, &path, Value::String(content.trim().to_string()))?;
    }
    Ok(())
}

/// Environment variables are named `PREFIX_SECTION__KEY`
fn overlay_env<I>(root: &mut Value, prefix: &str, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    let prefix = format!("{}_", prefix.to_uppercase());
    for (name, raw) in vars {
        let Some(key) = name.strip_prefix(&prefix) else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }
        if let Err(e) = set_path(root, &key_path(key), parse_scalar(&raw)) {
            warn!("Ignoring environment variable {}: {}", name, e);
        }
    }
}

/// Split a `__` delimited name into a settings path
///
/// Section and field names are lowercased. Segments naming user keys keep
/// their case: targets below `targets.<type>.<list>` and canonical values
/// below `ocr.fields.<id>.correction`.
fn key_path(name: &str) -> Vec<String> {
    let mut path: Vec<String> = Vec::new();
    for segment in name.split(NESTED_DELIMITER) {
        let keep_case = match path.as_slice() {
            [section, _, _, ..] if section == "targets" => true,
            [section, fields, _, correction, ..] => {
                section == "ocr" && fields == "fields" && correction == "correction"
            }
            _ => false,
        };
        path.push(if keep_case {
            segment.to_string()
        } else {
            segment.to_lowercase()
        });
    }
    path
}
