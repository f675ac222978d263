// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use crate::clusters::{Attributes, AttributeValue, ByteReader};
use crate::error::DecodeError;

/// Energy report: cumulative kWh and uptime (seconds), both u32 LE from offset 3.
pub fn decode_consumption(payload: &[u8]) -> Result<Attributes, DecodeError> {
    let mut reader = ByteReader::at(payload, 3)?;
    let kwh = reader.u32_le()?;
    let uptime = reader.u32_le()?;
    Ok(Attributes::from([
        ("kWh", AttributeValue::from(kwh)),
        ("uptime", AttributeValue::from(uptime)),
    ]))
}

/// Instantaneous demand in watts, u16 LE at offset 3.
pub fn decode_demand(payload: &[u8]) -> Result<Attributes, DecodeError> {
    let watts = ByteReader::at(payload, 3)?.u16_le()?;
    Ok(Attributes::from([("activePower", AttributeValue::from(watts))]))
}

/// Power/energy report variant whose layout is not known. Deliberately not decoded.
pub fn decode_unknown(_payload: &[u8]) -> Result<Attributes, DecodeError> {
    Ok(Attributes::from([("activePower", AttributeValue::Null)]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumption_and_uptime() {
        let payload = [0x09, 0x6A, 0x82, 0x10, 0x27, 0x00, 0x00, 0x80, 0x51, 0x01, 0x00];
        let attrs = decode_consumption(&payload).unwrap();
        assert_eq!(attrs.get("kWh"), Some(&AttributeValue::Integer(10_000)));
        assert_eq!(attrs.get("uptime"), Some(&AttributeValue::Integer(86_400)));
    }

    #[test]
    fn test_demand() {
        let attrs = decode_demand(&[0x09, 0x6A, 0x81, 0x64, 0x00]).unwrap();
        assert_eq!(attrs.get("activePower"), Some(&AttributeValue::Integer(100)));
        assert!(decode_demand(&[0x09, 0x6A, 0x81, 0x64]).is_err());
    }

    #[test]
    fn test_unknown_is_null() {
        let attrs = decode_unknown(&[0x09, 0x6A, 0x86, 0x01, 0x02, 0x03]).unwrap();
        assert_eq!(attrs.get("activePower"), Some(&AttributeValue::Null));
    }
}
