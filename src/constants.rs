// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use std::time::Duration;

/// XBee API framing bytes.
pub const START_DELIMITER: u8 = 0x7E;
pub const ESCAPE: u8 = 0x7D;
pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;
pub const ESCAPE_XOR: u8 = 0x20;

/// Bytes that must be escaped in API mode 2.
pub const ESCAPED_BYTES: [u8; 4] = [START_DELIMITER, ESCAPE, XON, XOFF];

/// XBee API frame types.
pub const FRAME_AT_COMMAND: u8 = 0x08;
pub const FRAME_EXPLICIT_TX: u8 = 0x11; // Explicit addressing command
pub const FRAME_AT_RESPONSE: u8 = 0x88;
pub const FRAME_TX_STATUS: u8 = 0x8B;
pub const FRAME_EXPLICIT_RX: u8 = 0x91; // Explicit RX indicator

/// Application profiles.
pub const PROFILE_ZDP: u16 = 0x0000;
pub const PROFILE_HA: u16 = 0x0104;
pub const PROFILE_ALERTME: u16 = 0xC216;
pub const PROFILE_LL: u16 = 0xC05E;

/// Endpoints.
pub const ENDPOINT_ZDO: u8 = 0x00;
pub const ENDPOINT_ALERTME: u8 = 0x02;

/// AlertMe cluster IDs.
pub mod cluster {
    pub const ATTRIBUTE: u16 = 0x00C0; // Keypad
    pub const BUTTON: u16 = 0x00F3;
    pub const DISCOVERY: u16 = 0x00F6; // Maintenance: range test, version info
    pub const POWER: u16 = 0x00EF;
    pub const SECURITY: u16 = 0x0500;
    pub const STATUS: u16 = 0x00F0; // General: lifesign, mode change
    pub const SWITCH: u16 = 0x00EE; // Power control (SmartPlug relay)
    pub const TAMPER: u16 = 0x00F2;
}

/// ZDO cluster IDs.
pub mod zdo {
    pub const NETWORK_ADDRESS_REQUEST: u16 = 0x0000;
    pub const NETWORK_ADDRESS_RESPONSE: u16 = 0x8000;
    pub const SIMPLE_DESCRIPTOR_REQUEST: u16 = 0x0004;
    pub const ACTIVE_ENDPOINT_REQUEST: u16 = 0x0005;
    pub const ACTIVE_ENDPOINT_RESPONSE: u16 = 0x8005;
    pub const MATCH_DESCRIPTOR_REQUEST: u16 = 0x0006;
    pub const MATCH_DESCRIPTOR_RESPONSE: u16 = 0x8006;
    pub const END_DEVICE_ANNOUNCE: u16 = 0x0013;
    pub const MANAGEMENT_ROUTING_REQUEST: u16 = 0x0032;
    pub const MANAGEMENT_ROUTING_RESPONSE: u16 = 0x8032;
    pub const PERMIT_JOINING_REQUEST: u16 = 0x0036;
    pub const PERMIT_JOINING_RESPONSE: u16 = 0x8036;

    /// ZDP response status
    pub const STATUS_OK: u8 = 0x00;
}

/// AlertMe cluster commands (byte at [`COMMAND_OFFSET`] of the payload).
pub mod command {
    // Attribute (keypad)
    pub const ATTRIBUTE_REPORT: u8 = 0x0A;

    // Discovery
    pub const RSSI: u8 = 0xFD;
    pub const VERSION_REQ: u8 = 0xFC;
    pub const VERSION_RESP: u8 = 0xFE;

    // Power
    pub const POWER_DEMAND: u8 = 0x81;
    pub const POWER_CONSUMPTION: u8 = 0x82;
    pub const POWER_UNKNOWN: u8 = 0x86;

    // Security
    pub const SECURITY_STATUS_CHANGE: u8 = 0x00;

    // Status
    pub const MODE_REQ: u8 = 0xFA;
    pub const STATUS: u8 = 0xFB;

    // Switch
    pub const STATE_REQ: u8 = 0x01;
    pub const STATE_CHANGE: u8 = 0x02;
    pub const STATE_RESP: u8 = 0x80;
}

/// Offset of the cluster command byte in AlertMe payloads.
pub const COMMAND_OFFSET: usize = 2;

/// Fixed two-byte preamble on hub-originated AlertMe commands.
pub const HUB_PREAMBLE: [u8; 2] = [0x11, 0x00];

/// Payload bytes 3..6 of a security frame sent by a device that needs initialisation.
pub const SECURITY_COLD_START_SIGNATURE: [u8; 3] = [0x15, 0x00, 0x39];

/// Reference voltages for battery percentage.
pub const BATTERY_MIN_VOLTAGE: f64 = 2.0;
pub const BATTERY_MAX_VOLTAGE: f64 = 3.28;

/// Lifesign temperature resolution (degrees per LSB).
pub const TEMPERATURE_RESOLUTION: f64 = 0.0625;

/// Default timings.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_OFFLINE_AFTER: Duration = Duration::from_secs(600);
pub const DEFAULT_MOTION_DEBOUNCE: Duration = Duration::from_secs(180);

/// Join handshake delays, measured from the triggering frame.
pub const JOIN_MATCH_DESCRIPTOR_RESPONSE_DELAY: Duration = Duration::from_secs(1);
pub const JOIN_ACTIVE_ENDPOINT_REQUEST_DELAY: Duration = Duration::from_secs(3);
pub const JOIN_MODE_CHANGE_DELAY: Duration = Duration::from_secs(5);
pub const JOIN_VERSION_INFO_DELAY: Duration = Duration::from_secs(7);

/// Human-readable profile name for log lines.
pub fn profile_name(profile_id: u16) -> &'static str {
    match profile_id {
        PROFILE_ZDP => "ZDP",
        PROFILE_HA => "HA",
        PROFILE_ALERTME => "AlertMe",
        PROFILE_LL => "LL",
        _ => "unknown",
    }
}
