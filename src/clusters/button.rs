// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use crate::clusters::{Attributes, AttributeValue, ByteReader};
use crate::error::DecodeError;

/// Button press/release: byte 2 non-zero means pressed.
pub fn decode(payload: &[u8]) -> Result<Attributes, DecodeError> {
    let state = ByteReader::at(payload, 2)?.u8()?;
    Ok(Attributes::from([("buttonState", AttributeValue::Bool(state != 0))]))
}
