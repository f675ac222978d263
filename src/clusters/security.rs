// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use bitflags::bitflags;
use tracing::debug;

use crate::clusters::{percent_of_byte, Attributes, AttributeValue, ByteReader, DecodeContext, DeviceModel};
use crate::constants::SECURITY_COLD_START_SIGNATURE;
use crate::error::DecodeError;

bitflags! {
    /// Security state byte (payload byte 3) of contact sensors, buttons and keyfobs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SecurityStateFlags: u8 {
        /// Main sensor triggered (contact open)
        const TRIGGERED   = 0b0000_0001;
        /// Set while the tamper switch is closed (case on)
        const TAMPER_OK   = 0b0000_0100;
    }
}

/// First payload byte of a valid security report.
const SECURITY_REPORT: u8 = 0x09;

/// PIR intensity bytes that do not carry a motion reading.
const PIR_IGNORED: [u8; 2] = [0x01, 0x6E];

/// Whether bytes 3..6 match the cold-start pattern of a device that needs a security init.
pub fn has_cold_start_signature(payload: &[u8]) -> bool {
    payload.get(3..6) == Some(&SECURITY_COLD_START_SIGNATURE[..])
}

/// Decode a security cluster report. The layout depends on the device model.
///
/// `securityStateId` is always reported; model-specific attributes need a known
/// model and a `0x09` report marker.
pub fn decode(payload: &[u8], ctx: &DecodeContext) -> Result<Attributes, DecodeError> {
    let mut reader = ByteReader::new(payload);
    let marker = reader.u8()?;
    let intensity = reader.u8()?;
    reader.skip(1)?;
    let state_byte = reader.u8()?;

    let mut attributes = Attributes::from([("securityStateId", AttributeValue::from(state_byte))]);

    let Some(model) = &ctx.model else {
        debug!("Security report without a known model, only the state id is decoded");
        return Ok(attributes);
    };
    if marker != SECURITY_REPORT {
        debug!("Security report with marker 0x{marker:02x}, ignoring state");
        return Ok(attributes);
    }

    let state = SecurityStateFlags::from_bits_retain(state_byte);
    match model {
        DeviceModel::Button | DeviceModel::Keyfob => {
            attributes.insert("tamperState", (!state.contains(SecurityStateFlags::TAMPER_OK)).into());
        }
        DeviceModel::ContactSensor => {
            attributes.insert("contactState", state.contains(SecurityStateFlags::TRIGGERED).into());
            attributes.insert("tamperState", (!state.contains(SecurityStateFlags::TAMPER_OK)).into());
        }
        DeviceModel::Pir => {
            if PIR_IGNORED.contains(&intensity) {
                debug!("PIR intensity byte 0x{intensity:02x} ignored");
            } else {
                let motion = percent_of_byte(intensity);
                attributes.insert("motionValue", motion.into());
                attributes.insert("motionState", (motion > 0.0).into());
            }
        }
        DeviceModel::SmartPlug | DeviceModel::Other(_) => {}
    }
    Ok(attributes)
}
