// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use bitflags::bitflags;
use tracing::warn;

use crate::clusters::{percent_of_byte, round_to, Attributes, AttributeValue, ByteReader, DecodeContext};
use crate::constants::{BATTERY_MAX_VOLTAGE, BATTERY_MIN_VOLTAGE, TEMPERATURE_RESOLUTION};
use crate::error::DecodeError;
use crate::protocol::DeviceMode;

bitflags! {
    /// Lifesign capability flags: which optional readings the frame carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LifesignFlags: u8 {
        const VOLTAGE       = 0b0000_0001;
        const TEMPERATURE   = 0b0000_0010;
        const SWITCH_STATUS = 0b0000_0100;
        const LQI           = 0b0000_1000;
        const RSSI          = 0b0001_0000;
    }
}

/// Lifesign field offsets.
const OFFSET_VOLTAGE: usize = 8;
const OFFSET_TEMPERATURE: usize = 10;
const OFFSET_RSSI: usize = 12;
const OFFSET_LQI: usize = 13;
const OFFSET_FLAGS: usize = 14;

/// Voltages at or above this are not battery readings.
const MAX_BATTERY_READING: f64 = 5.0;

/// Battery percentage between the reference voltages, two decimals. Not clamped.
pub fn battery_level(voltage: f64) -> f64 {
    round_to(
        (voltage - BATTERY_MIN_VOLTAGE) / (BATTERY_MAX_VOLTAGE - BATTERY_MIN_VOLTAGE) * 100.0,
        2,
    )
}

/// Decode a lifesign (status update) frame.
///
/// ```text
/// 0      2    3     4         8        10     12    13   14     15
/// | pre | FB | type | timer   | volts  | temp | rssi | lqi | flags | ...
/// ```
pub fn decode_lifesign(payload: &[u8], ctx: &DecodeContext) -> Result<Attributes, DecodeError> {
    let flags = LifesignFlags::from_bits_truncate(ByteReader::at(payload, OFFSET_FLAGS)?.u8()?);
    let mut attributes = Attributes::new();

    let mut reader = ByteReader::at(payload, OFFSET_VOLTAGE)?;
    let raw_voltage = reader.bytes(2)?;
    if raw_voltage.contains(&0xFF) {
        warn!(
            "Lifesign from {} carries 0xFF voltage bytes {:02x?}, skipping battery",
            device_label(ctx),
            raw_voltage
        );
    } else if flags.contains(LifesignFlags::VOLTAGE) {
        let voltage = u16::from_le_bytes([raw_voltage[0], raw_voltage[1]]) as f64 / 1000.0;
        if voltage < MAX_BATTERY_READING {
            attributes.insert("batteryVoltage", voltage.into());
            attributes.insert("batteryLevel", battery_level(voltage).into());
        }
    }

    if flags.contains(LifesignFlags::TEMPERATURE) {
        let raw = ByteReader::at(payload, OFFSET_TEMPERATURE)?.i16_le()?;
        if raw != 0 {
            let temperature = raw as f64 * TEMPERATURE_RESOLUTION;
            let temperature = match ctx.temperature_offset {
                Some(offset) => round_to(temperature + offset, 3),
                None => temperature,
            };
            attributes.insert("temperature", temperature.into());
        }
    }

    if flags.contains(LifesignFlags::LQI) {
        let lqi = ByteReader::at(payload, OFFSET_LQI)?.u8()?;
        attributes.insert("lqi", percent_of_byte(lqi).into());
    }

    let rssi = ByteReader::at(payload, OFFSET_RSSI)?.i8()?;
    attributes.insert("rssi", rssi.into());

    Ok(attributes)
}

/// Decode a mode change request (`[pre, FA, mode, 0x01]`).
pub fn decode_mode_change(payload: &[u8]) -> Result<Attributes, DecodeError> {
    let code = ByteReader::at(payload, 3)?.u8()?;
    let mut attributes = Attributes::new();
    match DeviceMode::from_code(code) {
        Some(mode) => {
            attributes.insert("mode", mode.as_str().into());
        }
        None => warn!("Mode change request with unknown mode code 0x{code:02x}"),
    }
    Ok(attributes)
}

fn device_label(ctx: &DecodeContext) -> String {
    ctx.remote64
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown device".to_string())
}
