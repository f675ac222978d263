// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use crate::clusters::{Attributes, AttributeValue, ByteReader};
use crate::error::DecodeError;

/// Fixed header before the version strings: preamble and command (3), node id (2),
/// EUI64 (8), manufacturer id (2), device type (2), application and hardware
/// versions (4).
const VERSION_HEADER_LEN: usize = 21;

/// Range test update: RSSI byte at offset 3.
pub fn decode_range_info(payload: &[u8]) -> Result<Attributes, DecodeError> {
    let rssi = ByteReader::at(payload, 3)?.u8()?;
    Ok(Attributes::from([("rssi", AttributeValue::from(rssi))]))
}

/// Version info response: three chained length-prefixed strings.
pub fn decode_version_info(payload: &[u8]) -> Result<Attributes, DecodeError> {
    let mut reader = ByteReader::at(payload, VERSION_HEADER_LEN)?;
    let make = reader.length_prefixed_str()?;
    let model = reader.length_prefixed_str()?;
    let build_date = reader.length_prefixed_str()?;
    Ok(Attributes::from([
        ("make", AttributeValue::Text(make)),
        ("model", AttributeValue::Text(model)),
        ("buildDate", AttributeValue::Text(build_date)),
    ]))
}
