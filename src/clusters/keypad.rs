// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use crate::clusters::{Attributes, AttributeValue, ByteReader};
use crate::constants::{command, COMMAND_OFFSET};
use crate::error::DecodeError;

/// Keypad attribute ids (payload byte 3).
pub const ATTR_PIN: u8 = 0x21;
pub const ATTR_ACTION_KEY_PRESS: u8 = 0x22;
pub const ATTR_ACTION_KEY_RELEASE: u8 = 0x23;

/// PINs longer than this are truncated.
pub const MAX_PIN_LENGTH: usize = 15;

/// Semantic name of an action key byte.
pub fn key_name(key: u8) -> &'static str {
    match key {
        0x2A => "*",
        0x23 => "#",
        0x48 => "on",      // 'H' home
        0x41 => "off",     // 'A' away
        0x4E => "partial", // 'N' night
        0x50 => "panic",   // 'P'
        _ => "unknown",
    }
}

/// Decode a keypad attribute report.
///
/// Layout: `[preamble(2), 0x0A, attribute, ?, ?, length, data...]`. Reports
/// that are not attribute reports, or carry other attributes, decode to nothing.
pub fn decode(payload: &[u8]) -> Result<Attributes, DecodeError> {
    let mut attributes = Attributes::new();
    let mut reader = ByteReader::at(payload, COMMAND_OFFSET)?;
    if reader.u8()? != command::ATTRIBUTE_REPORT {
        return Ok(attributes);
    }

    match reader.u8()? {
        ATTR_PIN => {
            reader.skip(2)?;
            let len = (reader.u8()? as usize).min(MAX_PIN_LENGTH);
            let pin = String::from_utf8_lossy(reader.bytes_up_to(len)).into_owned();
            attributes.insert("pinEntry", AttributeValue::Text(pin));
        }
        ATTR_ACTION_KEY_PRESS => {
            reader.skip(3)?;
            attributes.insert("actionKeyPress", key_name(reader.u8()?).into());
        }
        ATTR_ACTION_KEY_RELEASE => {
            reader.skip(3)?;
            attributes.insert("actionKeyRelease", key_name(reader.u8()?).into());
        }
        _ => {}
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_entry() {
        let payload = [0x09, 0x30, 0x0A, 0x21, 0x00, 0x42, 0x04, b'1', b'2', b'3', b'4'];
        let attrs = decode(&payload).unwrap();
        assert_eq!(attrs.get("pinEntry"), Some(&AttributeValue::from("1234")));
    }

    #[test]
    fn test_pin_entry_capped_at_fifteen() {
        let mut payload = vec![0x09, 0x30, 0x0A, 0x21, 0x00, 0x42, 20];
        payload.extend(std::iter::repeat_n(b'7', 20));
        let attrs = decode(&payload).unwrap();
        let pin = attrs.get("pinEntry").and_then(|v| v.as_str()).unwrap();
        assert_eq!(pin.len(), 15);
    }

    #[test]
    fn test_action_keys() {
        let press = [0x09, 0x31, 0x0A, 0x22, 0x00, 0x20, 0x01, 0x50];
        assert_eq!(
            decode(&press).unwrap().get("actionKeyPress"),
            Some(&AttributeValue::from("panic"))
        );
        let release = [0x09, 0x32, 0x0A, 0x23, 0x00, 0x20, 0x01, 0x2A];
        assert_eq!(
            decode(&release).unwrap().get("actionKeyRelease"),
            Some(&AttributeValue::from("*"))
        );
        let odd = [0x09, 0x33, 0x0A, 0x22, 0x00, 0x20, 0x01, 0x99];
        assert_eq!(
            decode(&odd).unwrap().get("actionKeyPress"),
            Some(&AttributeValue::from("unknown"))
        );
    }

    #[test]
    fn test_non_report_yields_nothing() {
        assert!(decode(&[0x09, 0x30, 0x0B, 0x21]).unwrap().is_empty());
        assert!(decode(&[0x09, 0x30, 0x0A, 0x20, 0x00]).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_key_press() {
        assert!(decode(&[0x09, 0x30, 0x0A, 0x22, 0x00]).is_err());
    }
}
