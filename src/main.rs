// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use alertme_xbee_bridge::{
    Addr64, ApiMode, AttributeValue, BridgeConfig, BridgeEvent, DeviceStore, JsonStatusStore,
    MessageParams, XBeeBridge,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "iris2mqtt")]
#[command(about = "Bridge between AlertMe/Iris Zigbee devices on an XBee radio and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    xbee: XBeeToml,
    mqtt: MqttToml,
    /// Display names keyed by 16-hex-digit remote64
    #[serde(default)]
    node_names: HashMap<Addr64, String>,
    /// Temperature corrections keyed by 16-hex-digit remote64
    #[serde(default)]
    temperature_offset: HashMap<Addr64, f64>,
    #[serde(default = "default_status_file")]
    status_file: String,
}

#[derive(Debug, Deserialize)]
struct XBeeToml {
    port: String,
    #[serde(default = "default_baud_rate")]
    baud_rate: u32,
    /// XBee AP register: 1 (unescaped) or 2 (escaped)
    #[serde(default = "default_api_mode")]
    api_mode: u8,
    #[serde(default = "default_watchdog_interval")]
    watchdog_interval_ms: u64,
    #[serde(default = "default_offline_after")]
    offline_after_secs: u64,
    #[serde(default = "default_motion_debounce")]
    motion_debounce_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_ms: u64,
}

fn default_status_file() -> String {
    "status.json".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_api_mode() -> u8 {
    2
}
fn default_watchdog_interval() -> u64 {
    5000
}
fn default_offline_after() -> u64 {
    600
}
fn default_motion_debounce() -> u64 {
    180
}
fn default_reconnect_delay() -> u64 {
    1000
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
}

fn default_client_id() -> String {
    "iris2mqtt".to_string()
}

fn build_bridge_config(config: &Config) -> Result<BridgeConfig> {
    let api_mode = ApiMode::from_ap(config.xbee.api_mode).context("Invalid xbee.api_mode")?;
    Ok(BridgeConfig::builder()
        .serial_port(&config.xbee.port)
        .baud_rate(config.xbee.baud_rate)
        .api_mode(api_mode)
        .watchdog_interval_ms(config.xbee.watchdog_interval_ms)
        .offline_after_secs(config.xbee.offline_after_secs)
        .motion_debounce_secs(config.xbee.motion_debounce_secs)
        .reconnect_delay_ms(config.xbee.reconnect_delay_ms)
        .node_names(config.node_names.clone())
        .temperature_offsets(config.temperature_offset.clone())
        .build())
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    toml::from_str(&text).context("Failed to parse config file")
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// MQTT payload text for an attribute value. Booleans become `ON`/`OFF`.
fn render_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Bool(true) => "ON".to_string(),
        AttributeValue::Bool(false) => "OFF".to_string(),
        other => other.to_string(),
    }
}

async fn publish(client: &AsyncClient, topic: &str, payload: String, retain: bool) {
    if let Err(e) = client.publish(topic, QoS::AtMostOnce, retain, payload).await {
        error!("Failed to publish to {topic}: {e}");
    }
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => publish(client, topic, json, retain).await,
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

fn lwt_topic(client_id: &str) -> String {
    format!("tele/{client_id}/LWT")
}

// ---------------------------------------------------------------------------
// Bridge event → MQTT
// ---------------------------------------------------------------------------

async fn handle_bridge_event(event: BridgeEvent, client: &AsyncClient) {
    match event {
        BridgeEvent::Publication(p) => {
            publish(client, &p.topic, render_value(&p.value), p.retain).await;
        }
        BridgeEvent::Keypad { remote64, entry } => {
            info!("Keypad {remote64}: {entry:?}");
            publish_json(client, &format!("stat/{remote64}/keypad"), &entry, false).await;
        }
        BridgeEvent::DeviceDiscovered { remote64 } => {
            info!("Discovered device {remote64}");
        }
        BridgeEvent::DeviceJoined { remote64, model } => {
            info!("Device {remote64} joined ({})", model.as_deref().unwrap_or("unknown model"));
        }
        BridgeEvent::OwnIdentity(own) => {
            debug!("Own identity: {own:?}");
        }
        BridgeEvent::Connected => {
            info!("XBee connected");
        }
        BridgeEvent::Disconnected => {
            warn!("XBee disconnected");
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

/// Split `cmnd/<target>/<command>` into (target, command).
fn parse_command_topic(topic: &str) -> Option<(&str, &str)> {
    let mut parts = topic.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("cmnd"), Some(target), Some(command)) if !target.is_empty() && !command.is_empty() => {
            Some((target, command))
        }
        _ => None,
    }
}

async fn handle_command(bridge: &XBeeBridge, client_id: &str, target: &str, command: &str, payload: &str) {
    info!("MQTT command received: {target}/{command} {payload}");

    if target == client_id {
        match command {
            "permitJoin" => {
                if let Err(e) = bridge.permit_join().await {
                    error!("permitJoin failed: {e}");
                }
            }
            "readAddresses" => {
                if let Err(e) = bridge.read_addresses().await {
                    error!("readAddresses failed: {e}");
                }
            }
            other => warn!("Unknown bridge command: {other}"),
        }
        return;
    }

    let remote64: Addr64 = match target.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Ignoring command for {target}: {e}");
            return;
        }
    };
    let (name, params) = match command {
        "switchState" => ("switchStateRequest", MessageParams::switch_state(payload)),
        "mode" => ("modeChangeRequest", MessageParams::mode(payload)),
        "versionInfo" => ("versionInfoRequest", MessageParams::default()),
        other => {
            warn!("Unknown device command: {other}");
            return;
        }
    };
    if let Err(e) = bridge.send_message(name, params, remote64).await {
        error!("{name} to {remote64} failed: {e}");
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=alertme_xbee_bridge=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    let mut bridge_config = build_bridge_config(&config)?;
    let mut mqtt_client_id = config.mqtt.client_id;
    let mut status_file = config.status_file;
    let (mut mqtt_host, mut mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        let store: Arc<dyn DeviceStore> = Arc::new(JsonStatusStore::new(&status_file));
        let bridge = Arc::new(
            XBeeBridge::connect(bridge_config.clone(), Some(store))
                .await
                .context("Failed to open XBee serial port")?,
        );
        info!("XBee bridge running on {}", bridge_config.serial_port);

        // Set up MQTT
        let lwt = lwt_topic(&mqtt_client_id);
        let mut mqtt_opts = MqttOptions::new(&mqtt_client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        mqtt_opts.set_last_will(LastWill::new(&lwt, "offline", QoS::AtLeastOnce, true));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        // Task 1: bridge events → MQTT
        let client_events = client.clone();
        let mut event_rx = bridge.subscribe();
        let event_handle = tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => handle_bridge_event(event, &client_events).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 2: MQTT event loop (receives messages, handles commands)
        let bridge_cmds = Arc::clone(&bridge);
        let client_cmds = client.clone();
        let client_id = mqtt_client_id.clone();
        let lwt_cmds = lwt.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a reconnect
                        info!("MQTT: connected, subscribing to cmnd/+/#");
                        if let Err(e) = client_cmds.subscribe("cmnd/+/#", QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to cmnd/+/#: {e}");
                        }
                        publish(&client_cmds, &lwt_cmds, "online".to_string(), true).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        let payload = String::from_utf8_lossy(&msg.payload);
                        match parse_command_topic(&msg.topic) {
                            Some((target, command)) => {
                                handle_command(&bridge_cmds, &client_id, target, command, payload.trim()).await;
                            }
                            None => debug!("Ignoring message on {}", msg.topic),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting connections...");
                true
            }
        };

        publish(&client, &lwt, "offline".to_string(), true).await;

        // Abort tasks and wait for them to release the bridge
        event_handle.abort();
        mqtt_handle.abort();
        let _ = event_handle.await;
        let _ = mqtt_handle.await;
        if let Err(e) = client.disconnect().await {
            debug!("MQTT disconnect: {e}");
        }

        match Arc::try_unwrap(bridge) {
            Ok(mut bridge) => {
                if let Err(e) = bridge.disconnect().await {
                    warn!("Error disconnecting bridge: {e}");
                }
            }
            Err(_arc) => {
                warn!("Could not unwrap bridge Arc for clean disconnect (tasks still hold references)");
            }
        }

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => match build_bridge_config(&new_config) {
                Ok(new_bridge_config) => match parse_mqtt_url(&new_config.mqtt.url) {
                    Ok((new_host, new_port)) => {
                        bridge_config = new_bridge_config;
                        mqtt_host = new_host;
                        mqtt_port = new_port;
                        mqtt_client_id = new_config.mqtt.client_id;
                        status_file = new_config.status_file;
                        info!("Config reloaded successfully");
                    }
                    Err(e) => warn!("Invalid MQTT URL in new config, keeping previous: {e}"),
                },
                Err(e) => warn!("Invalid xbee config in new config, keeping previous: {e}"),
            },
            Err(e) => warn!("Failed to reload config, keeping previous: {e}"),
        }

        info!("Reconnecting...");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
///
/// A bare host (as in `mqtt://broker`) uses port 1883.
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let Some((host, port_str)) = stripped.rsplit_once(':') else {
        anyhow::ensure!(!stripped.is_empty(), "MQTT URL must be in format mqtt://host:port");
        return Ok((stripped.to_string(), 1883));
    };

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mqtt_url() {
        assert_eq!(parse_mqtt_url("mqtt://broker:1884").unwrap(), ("broker".to_string(), 1884));
        assert_eq!(parse_mqtt_url("broker").unwrap(), ("broker".to_string(), 1883));
        assert!(parse_mqtt_url("mqtt://broker:x").is_err());
        assert!(parse_mqtt_url("mqtt://").is_err());
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&AttributeValue::Bool(true)), "ON");
        assert_eq!(render_value(&AttributeValue::Bool(false)), "OFF");
        assert_eq!(render_value(&AttributeValue::Number(21.5)), "21.5");
        assert_eq!(render_value(&AttributeValue::from("online")), "online");
    }

    #[test]
    fn test_parse_command_topic() {
        assert_eq!(
            parse_command_topic("cmnd/000d6f00027395a2/switchState"),
            Some(("000d6f00027395a2", "switchState"))
        );
        assert_eq!(parse_command_topic("cmnd/iris2mqtt/permitJoin"), Some(("iris2mqtt", "permitJoin")));
        assert_eq!(parse_command_topic("stat/000d6f00027395a2/switchState"), None);
        assert_eq!(parse_command_topic("cmnd/x"), None);
    }

    #[test]
    fn test_config_toml() {
        let config: Config = toml::from_str(
            r#"
            [xbee]
            port = "/dev/ttyUSB1"

            [mqtt]
            url = "mqtt://localhost:1883"

            [node_names]
            000d6f00027395a2 = "Kitchen plug"

            [temperature_offset]
            000d6f000354cbad = -1.5
            "#,
        )
        .unwrap();
        assert_eq!(config.mqtt.client_id, "iris2mqtt");
        assert_eq!(config.status_file, "status.json");

        let bridge_config = build_bridge_config(&config).unwrap();
        assert_eq!(bridge_config.baud_rate, 115_200);
        assert_eq!(bridge_config.api_mode, ApiMode::Escaped);
        assert_eq!(
            bridge_config.node_name(Addr64::new(0x000D_6F00_0273_95A2)),
            Some("Kitchen plug")
        );
        assert_eq!(bridge_config.temperature_offset(Addr64::new(0x000D_6F00_0354_CBAD)), Some(-1.5));
    }
}
