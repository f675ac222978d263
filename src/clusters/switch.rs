// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use crate::clusters::{Attributes, AttributeValue, ByteReader};
use crate::error::DecodeError;

/// Relay state change request (`[pre, 02, state, 0x01]`), as sent by a hub.
pub fn decode_state_change(payload: &[u8]) -> Result<Attributes, DecodeError> {
    let state = ByteReader::at(payload, 3)?.u8()?;
    Ok(Attributes::from([("switchState", AttributeValue::Bool(state != 0))]))
}

/// Relay state report (`[pre, 80, ?, state, ...]`).
pub fn decode_state_response(payload: &[u8]) -> Result<Attributes, DecodeError> {
    let state = ByteReader::at(payload, 4)?.u8()?;
    Ok(Attributes::from([("switchState", AttributeValue::Bool(state != 0))]))
}
