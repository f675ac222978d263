// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use std::collections::HashMap;
use std::time::Duration;

use crate::address::Addr64;
use crate::error::{BridgeError, Result};

/// XBee API operating mode (`AP` register).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    /// AP=1: frames are sent as-is
    Unescaped,
    /// AP=2: control bytes are escaped
    Escaped,
}

impl ApiMode {
    pub fn from_ap(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Unescaped),
            2 => Ok(Self::Escaped),
            other => Err(BridgeError::MalformedFrame {
                details: format!("unsupported API mode {other}"),
            }),
        }
    }

    pub fn escaped(&self) -> bool {
        matches!(self, Self::Escaped)
    }
}

/// Configuration for the XBee bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Serial device the XBee is attached to
    pub serial_port: String,
    /// Serial baud rate (default: 115200)
    pub baud_rate: u32,
    /// API mode the radio is configured for
    pub api_mode: ApiMode,
    /// Liveness check interval in milliseconds (default: 5000)
    pub watchdog_interval_ms: u64,
    /// Seconds without a frame before a device is offline (default: 600)
    pub offline_after_secs: u64,
    /// Cooldown before a cleared motion state is published (default: 180)
    pub motion_debounce_secs: u64,
    /// Display names by 64-bit address
    pub node_names: HashMap<Addr64, String>,
    /// Temperature corrections by 64-bit address
    pub temperature_offsets: HashMap<Addr64, f64>,
    /// Ask the radio for its own addresses after opening the port
    pub read_addresses_on_connect: bool,
    /// Event broadcast channel capacity
    pub event_capacity: usize,
    /// Retries when opening the serial port fails (default: 5)
    pub max_connect_retries: u32,
    /// Base delay between open attempts in milliseconds, doubled per attempt (default: 1000)
    pub reconnect_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            api_mode: ApiMode::Escaped,
            watchdog_interval_ms: 5000,
            offline_after_secs: 600,
            motion_debounce_secs: 180,
            node_names: HashMap::new(),
            temperature_offsets: HashMap::new(),
            read_addresses_on_connect: true,
            event_capacity: 256,
            max_connect_retries: 5,
            reconnect_delay_ms: 1000,
        }
    }
}

impl BridgeConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn offline_after(&self) -> Duration {
        Duration::from_secs(self.offline_after_secs)
    }

    pub fn motion_debounce(&self) -> Duration {
        Duration::from_secs(self.motion_debounce_secs)
    }

    pub fn node_name(&self, remote64: Addr64) -> Option<&str> {
        self.node_names.get(&remote64).map(String::as_str)
    }

    pub fn temperature_offset(&self, remote64: Addr64) -> Option<f64> {
        self.temperature_offsets.get(&remote64).copied()
    }
}

/// Builder for BridgeConfig.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn serial_port(mut self, port: impl Into<String>) -> Self {
        self.config.serial_port = port.into();
        self
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.baud_rate = baud_rate;
        self
    }

    pub fn api_mode(mut self, api_mode: ApiMode) -> Self {
        self.config.api_mode = api_mode;
        self
    }

    pub fn watchdog_interval_ms(mut self, ms: u64) -> Self {
        self.config.watchdog_interval_ms = ms;
        self
    }

    pub fn offline_after_secs(mut self, secs: u64) -> Self {
        self.config.offline_after_secs = secs;
        self
    }

    pub fn motion_debounce_secs(mut self, secs: u64) -> Self {
        self.config.motion_debounce_secs = secs;
        self
    }

    pub fn node_name(mut self, remote64: Addr64, name: impl Into<String>) -> Self {
        self.config.node_names.insert(remote64, name.into());
        self
    }

    pub fn node_names(mut self, names: HashMap<Addr64, String>) -> Self {
        self.config.node_names = names;
        self
    }

    pub fn temperature_offset(mut self, remote64: Addr64, offset: f64) -> Self {
        self.config.temperature_offsets.insert(remote64, offset);
        self
    }

    pub fn temperature_offsets(mut self, offsets: HashMap<Addr64, f64>) -> Self {
        self.config.temperature_offsets = offsets;
        self
    }

    pub fn read_addresses_on_connect(mut self, read: bool) -> Self {
        self.config.read_addresses_on_connect = read;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn max_connect_retries(mut self, retries: u32) -> Self {
        self.config.max_connect_retries = retries;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}
