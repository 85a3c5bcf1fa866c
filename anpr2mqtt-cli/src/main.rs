// anpr2mqtt command line
// Watches camera upload directories and publishes ANPR events to Home Assistant

mod mqtt;
mod tools;
mod watcher;

use anpr2mqtt_core::config::{EventSettings, LogLevel, Settings, SettingsSources, DEFAULT_CONFIG_FILE};
use anpr2mqtt_core::publisher::{HomeAssistantPublisher, VERSION};
use anpr2mqtt_core::registry::build_registry;
use anpr2mqtt_core::{EventHandler, TesseractRecognizer, TextRecognizer};
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use watcher::{DirectoryWatcher, FileEventKind};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "anpr2mqtt")]
#[command(about = "ANPR camera images to Home Assistant over MQTT", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (required when given)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Directory of `section__key` secret files
    #[arg(long, global = true, default_value = "/run/secrets")]
    secrets_dir: PathBuf,

    /// Override a setting, e.g. `--set mqtt.host=broker.local`
    #[arg(long = "set", global = true, value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// DEBUG, INFO, WARNING, ERROR or CRITICAL
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch directories and publish events (default)
    Run,

    /// Run OCR field extraction on one image and print the results
    OcrFile {
        /// Image to read
        path: PathBuf,

        /// Use the event configured for this camera
        #[arg(long)]
        camera: Option<String>,

        /// Field ids to extract instead of the event's
        #[arg(long = "field", value_name = "FIELD_ID")]
        fields: Vec<String>,
    },

    /// Parse the names of files in a watch directory
    ListDir {
        /// Directory to list instead of the event's watch path
        path: Option<PathBuf>,

        /// Use the event configured for this camera
        #[arg(long)]
        camera: Option<String>,
    },
}

impl Cli {
    fn sources(&self) -> SettingsSources {
        let mut overrides = Vec::new();
        if let Some(level) = &self.log_level {
            let level = match level.parse::<LogLevel>() {
                Ok(parsed) => parsed.to_string(),
                Err(_) => level.to_uppercase(),
            };
            overrides.push(format!("log_level={}", level));
        }
        overrides.extend(self.overrides.iter().cloned());

        SettingsSources {
            config_file: Some(
                self.config
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            ),
            require_config_file: self.config.is_some(),
            secrets_dir: Some(self.secrets_dir.clone()),
            overrides,
            ..SettingsSources::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Loader warnings go to a subscriber at the command-line level
    let bootstrap = cli
        .log_level
        .as_deref()
        .and_then(|level| level.parse::<LogLevel>().ok())
        .unwrap_or_default();
    let settings = tracing::subscriber::with_default(subscriber(bootstrap, cli.log_json), || {
        Settings::load(&cli.sources())
    })
    .context("Failed to load settings")?;
    subscriber(settings.log_level, cli.log_json)
        .try_init()
        .context("Failed to initialise logging")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(settings).await,
        Commands::OcrFile { path, camera, fields } => {
            let mut event = select_event(&settings, camera.as_deref())?;
            if !fields.is_empty() {
                event.ocr_field_ids = fields;
            }
            let recognizer = TesseractRecognizer::from_settings(&settings.ocr);
            let results = tools::ocr_file(&path, &event, &settings.ocr, &recognizer)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Commands::ListDir { path, camera } => {
            let event = select_event(&settings, camera.as_deref())?;
            let dir = path.unwrap_or_else(|| event.watch_path.clone());
            for line in tools::list_dir(&dir, &event.image_name_re)? {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

/// `RUST_LOG` wins over the configured level
fn subscriber(level: LogLevel, json: bool) -> Box<dyn tracing::Subscriber + Send + Sync> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        Box::new(builder.json().finish())
    } else {
        Box::new(builder.finish())
    }
}

/// Pick the event for a camera, or the first configured event
fn select_event(settings: &Settings, camera: Option<&str>) -> anyhow::Result<EventSettings> {
    match camera {
        Some(camera) => settings
            .events
            .iter()
            .find(|event| event.camera == camera)
            .cloned()
            .ok_or_else(|| anyhow!("No event configured for camera {}", camera)),
        None => Ok(settings.events.first().cloned().unwrap_or_default()),
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    info!("anpr2mqtt {} starting", VERSION);
    for (target_type, rules) in &settings.targets {
        info!(
            "{}: {} known, {} dangerous, {} ignore patterns, {} corrections",
            target_type,
            rules.known.len(),
            rules.dangerous.len(),
            rules.ignore.len(),
            rules.correction.len()
        );
    }
    if settings.events.is_empty() {
        warn!("No events configured, nothing to watch");
    }

    let (sink, eventloop) = mqtt::connect(&settings.mqtt, CONNECT_TIMEOUT).await?;
    let publisher = Arc::new(HomeAssistantPublisher::new(
        Arc::new(sink.clone()),
        &settings.homeassistant,
    ));
    let network = mqtt::spawn_event_loop(eventloop, sink.clone(), publisher.clone());
    let status_topic = publisher.status_topic();
    if let Err(e) = sink.subscribe(&status_topic).await {
        error!("Failed to subscribe to {}: {}", status_topic, e);
    }

    let registry = build_registry(&settings.dvla)?;
    let recognizer: Arc<dyn TextRecognizer> = Arc::new(TesseractRecognizer::from_settings(&settings.ocr));

    let mut watcher = DirectoryWatcher::new();
    let mut handlers = Vec::new();
    for event in &settings.events {
        let handler = EventHandler::new(&settings, event.clone(), publisher.clone(), recognizer.clone())
            .with_registry(registry.clone());
        if let Err(e) = handler.announce().await {
            error!("Failed to publish discovery for {} {}: {}", event.event, event.camera, e);
        }
        watcher.watch(&event.watch_path, event.image_name_re.clone())?;
        handlers.push(handler);
    }

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            received = watcher.recv() => {
                let Some(file_event) = received else {
                    warn!("File watcher stopped");
                    break;
                };
                let Some(handler) = handlers.get(file_event.watch) else {
                    continue;
                };
                match file_event.kind {
                    FileEventKind::Created => handler.on_created(&file_event.path),
                    FileEventKind::Closed => handler.on_closed(&file_event.path).await,
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down anpr2mqtt");
                break;
            }
        }
    }

    network.abort();
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_sources() {
        let cli = Cli::parse_from(["anpr2mqtt"]);
        assert!(cli.command.is_none());
        let sources = cli.sources();
        assert_eq!(sources.config_file, Some(PathBuf::from(DEFAULT_CONFIG_FILE)));
        assert!(!sources.require_config_file);
        assert!(sources.overrides.is_empty());
    }

    #[test]
    fn test_explicit_config_is_required() {
        let cli = Cli::parse_from([
            "anpr2mqtt",
            "--config",
            "/etc/anpr.yaml",
            "--log-level",
            "debug",
            "--set",
            "mqtt.host=broker",
            "list-dir",
        ]);
        let sources = cli.sources();
        assert!(sources.require_config_file);
        assert_eq!(sources.overrides, vec!["log_level=DEBUG", "mqtt.host=broker"]);
        assert!(matches!(cli.command, Some(Commands::ListDir { path: None, .. })));
    }

    #[test]
    fn test_log_level_alias_loads() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("anpr2mqtt.yaml");
        std::fs::write(&config, "mqtt:\n  host: broker\n").unwrap();
        let cli = Cli::parse_from([
            "anpr2mqtt",
            "--config",
            config.to_str().unwrap(),
            "--secrets-dir",
            dir.path().join("secrets").to_str().unwrap(),
            "--log-level",
            "warn",
        ]);
        let sources = cli.sources();
        assert_eq!(sources.overrides, vec!["log_level=WARNING"]);

        let settings = tracing::subscriber::with_default(subscriber(LogLevel::Debug, false), || {
            Settings::load(&sources)
        })
        .unwrap();
        assert_eq!(settings.log_level, LogLevel::Warning);
        assert_eq!(settings.mqtt.host, "broker");
    }

    #[test]
    fn test_select_event() {
        let settings = Settings::from_yaml_str(
            "events:\n  - camera: driveway\n  - camera: gate\n    event: gate_anpr\n",
        )
        .unwrap();
        assert_eq!(select_event(&settings, None).unwrap().camera, "driveway");
        assert_eq!(select_event(&settings, Some("gate")).unwrap().event, "gate_anpr");
        assert!(select_event(&settings, Some("garden")).is_err());
    }
}
