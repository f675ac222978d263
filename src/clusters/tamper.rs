// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use crate::clusters::{Attributes, AttributeValue, ByteReader};
use crate::error::DecodeError;

const TAMPER_BIT: u8 = 0b0000_0010;

/// Tamper switch report: bit 1 of byte 3.
pub fn decode(payload: &[u8]) -> Result<Attributes, DecodeError> {
    let state = ByteReader::at(payload, 3)?.u8()?;
    Ok(Attributes::from([(
        "tamperState",
        AttributeValue::Bool(state & TAMPER_BIT != 0),
    )]))
}
