//! dyson-mqtt - command line client for Dyson devices

use clap::{Parser, Subcommand, ValueEnum};
use dyson_mqtt::observability::init_default_logging;
use dyson_mqtt::{DysonMqttClient, MqttMessage, Settings};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Duration};
use tracing::{error, info, warn};

type ConnectionEvent = (bool, Option<String>);

/// Talk to a Dyson device over its local MQTT broker
#[derive(Parser)]
#[command(name = "dyson-mqtt")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "DYSON_MQTT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every message received on the configured topics
    Monitor {
        /// Output format
        #[arg(short, long, value_enum, default_value = "pretty")]
        format: OutputFormat,

        /// How often to drain the message queue, in milliseconds
        #[arg(long, default_value_t = 250)]
        poll_ms: u64,
    },
    /// Publish one message once connected
    Publish {
        #[arg(short, long)]
        topic: String,

        #[arg(short, long)]
        payload: String,

        /// How long to wait for the device to accept the connection
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },
    /// Validate the configuration file
    Config {
        /// Print the configuration with the password masked
        #[arg(long)]
        show: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_default_logging() {
        eprintln!("Failed to initialise logging: {e}");
    }

    info!("Loading configuration from: {}", cli.config.display());
    let settings = match Settings::load_from_file(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Monitor { format, poll_ms } => monitor(&settings, format, poll_ms).await,
        Commands::Publish {
            topic,
            payload,
            wait_secs,
        } => publish(&settings, &topic, &payload, wait_secs).await,
        Commands::Config { show } => handle_config_command(&settings, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn build_client(
    settings: &Settings,
) -> Result<(DysonMqttClient, mpsc::UnboundedReceiver<ConnectionEvent>), Box<dyn std::error::Error>>
{
    let client =
        DysonMqttClient::with_options(settings.connection_config()?, settings.client_options()?);

    let (tx, rx) = mpsc::unbounded_channel();
    client.set_connection_callback(Some(Arc::new(move |connected, error| {
        let _ = tx.send((connected, error));
    })));
    Ok((client, rx))
}

async fn monitor(
    settings: &Settings,
    format: OutputFormat,
    poll_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (client, mut connection_rx) = build_client(settings)?;
    let session = client.session()?;
    let mut ticker = interval(Duration::from_millis(poll_ms.max(1)));

    println!("Monitoring {} (Ctrl+C to stop)", session.config().host());
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting");
                break;
            }
            Some((connected, error)) = connection_rx.recv() => {
                match (connected, error) {
                    (true, _) => println!("* connected"),
                    (false, Some(error)) => println!("* disconnected: {error}"),
                    (false, None) => println!("* disconnected"),
                }
            }
            _ = ticker.tick() => {
                for message in session.get_messages() {
                    println!("{}", format_message(&message, format));
                }
            }
        }
    }

    for message in session.get_messages() {
        println!("{}", format_message(&message, format));
    }
    session.close()?;
    wait_for_disconnect(&mut connection_rx).await;
    Ok(())
}

async fn publish(
    settings: &Settings,
    topic: &str,
    payload: &str,
    wait_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (client, mut connection_rx) = build_client(settings)?;
    let session = client.session()?;

    let wait = timeout(Duration::from_secs(wait_secs), async {
        while let Some((connected, error)) = connection_rx.recv().await {
            if connected {
                return Ok(());
            }
            if let Some(error) = error {
                return Err(error);
            }
        }
        Err("connection callback closed".to_string())
    })
    .await;

    match wait {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(format!("not connected after {wait_secs}s").into()),
    }

    session.publish(topic, payload)?;
    info!(topic, "Message sent");

    session.close()?;
    wait_for_disconnect(&mut connection_rx).await;
    Ok(())
}

/// Give the event loop a moment to flush our DISCONNECT
async fn wait_for_disconnect(connection_rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) {
    let flushed = timeout(Duration::from_secs(2), async {
        while let Some((connected, _)) = connection_rx.recv().await {
            if !connected {
                return;
            }
        }
    })
    .await;

    if flushed.is_err() {
        warn!("Timed out waiting for disconnect confirmation");
    }
}

fn handle_config_command(settings: &Settings, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = settings.connection_config()?;
    settings.client_options()?;

    if show {
        println!("{}", toml::to_string_pretty(&settings.redacted())?);
    }

    info!(host = %config.host(), topics = config.mqtt_topics().len(), "Configuration is valid");
    Ok(())
}

fn format_message(message: &MqttMessage, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => message.to_json().to_string(),
        OutputFormat::Pretty => {
            let payload = message.payload_str();
            let body = serde_json::from_str::<serde_json::Value>(&payload)
                .ok()
                .and_then(|json| serde_json::to_string_pretty(&json).ok())
                .unwrap_or_else(|| payload.into_owned());
            format!(
                "[{}] {} (QoS {})\n{}",
                message.timestamp().format("%H:%M:%S"),
                message.topic(),
                message.qos(),
                body
            )
        }
    }
}
