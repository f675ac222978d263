// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

//! XBee API frame data (the part between the length and the checksum).

use crate::address::{Addr16, Addr64};
use crate::clusters::ByteReader;
use crate::constants::{
    FRAME_AT_COMMAND, FRAME_AT_RESPONSE, FRAME_EXPLICIT_RX, FRAME_EXPLICIT_TX, FRAME_TX_STATUS,
};
use crate::error::{BridgeError, DecodeError, Result};
use crate::protocol::ExplicitMessage;

/// Explicit RX indicator (0x91).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitRx {
    pub remote64: Option<Addr64>,
    /// `None` when the radio reports 0xFFFE (unknown)
    pub remote16: Option<Addr16>,
    pub source_endpoint: u8,
    pub destination_endpoint: u8,
    pub cluster_id: u16,
    pub profile_id: u16,
    pub receive_options: u8,
    pub payload: Vec<u8>,
}

/// An inbound API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// AT command response (0x88)
    AtResponse {
        frame_id: u8,
        command: String,
        status: u8,
        data: Vec<u8>,
    },
    /// Transmit status (0x8B)
    TxStatus {
        frame_id: u8,
        remote16: Addr16,
        retries: u8,
        delivery_status: u8,
        discovery_status: u8,
    },
    ExplicitRx(ExplicitRx),
    /// Any other frame type, kept for logging
    Other { frame_type: u8, data: Vec<u8> },
}

impl RawFrame {
    /// Parse unescaped frame data (frame type first).
    pub fn parse(frame_data: &[u8]) -> Result<Self> {
        let Some((&frame_type, body)) = frame_data.split_first() else {
            return Err(BridgeError::MalformedFrame {
                details: "empty frame".to_string(),
            });
        };
        let frame = match frame_type {
            FRAME_AT_RESPONSE => parse_at_response(body),
            FRAME_TX_STATUS => parse_tx_status(body),
            FRAME_EXPLICIT_RX => parse_explicit_rx(body),
            _ => Ok(RawFrame::Other {
                frame_type,
                data: body.to_vec(),
            }),
        };
        frame.map_err(|e| BridgeError::MalformedFrame {
            details: format!("frame type 0x{frame_type:02x}: {e}"),
        })
    }

    pub fn frame_type(&self) -> u8 {
        match self {
            Self::AtResponse { .. } => FRAME_AT_RESPONSE,
            Self::TxStatus { .. } => FRAME_TX_STATUS,
            Self::ExplicitRx(_) => FRAME_EXPLICIT_RX,
            Self::Other { frame_type, .. } => *frame_type,
        }
    }
}

fn parse_at_response(body: &[u8]) -> std::result::Result<RawFrame, DecodeError> {
    let mut reader = ByteReader::new(body);
    let frame_id = reader.u8()?;
    let command = String::from_utf8_lossy(reader.bytes(2)?).into_owned();
    let status = reader.u8()?;
    let data = reader.bytes_up_to(reader.remaining()).to_vec();
    Ok(RawFrame::AtResponse {
        frame_id,
        command,
        status,
        data,
    })
}

fn parse_tx_status(body: &[u8]) -> std::result::Result<RawFrame, DecodeError> {
    let mut reader = ByteReader::new(body);
    let frame_id = reader.u8()?;
    let remote16 = read_addr16(&mut reader)?;
    Ok(RawFrame::TxStatus {
        frame_id,
        remote16,
        retries: reader.u8()?,
        delivery_status: reader.u8()?,
        discovery_status: reader.u8()?,
    })
}

fn parse_explicit_rx(body: &[u8]) -> std::result::Result<RawFrame, DecodeError> {
    let mut reader = ByteReader::new(body);
    let remote64 = read_addr64(&mut reader)?;
    let remote16 = read_addr16(&mut reader)?;
    let source_endpoint = reader.u8()?;
    let destination_endpoint = reader.u8()?;
    let cluster_id = read_u16_be(&mut reader)?;
    let profile_id = read_u16_be(&mut reader)?;
    let receive_options = reader.u8()?;
    let payload = reader.bytes_up_to(reader.remaining()).to_vec();
    Ok(RawFrame::ExplicitRx(ExplicitRx {
        remote64: Some(remote64),
        remote16: (remote16 != Addr16::UNKNOWN).then_some(remote16),
        source_endpoint,
        destination_endpoint,
        cluster_id,
        profile_id,
        receive_options,
        payload,
    }))
}

fn read_addr64(reader: &mut ByteReader<'_>) -> std::result::Result<Addr64, DecodeError> {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(reader.bytes(8)?);
    Ok(Addr64::from_be_bytes(bytes))
}

fn read_addr16(reader: &mut ByteReader<'_>) -> std::result::Result<Addr16, DecodeError> {
    Ok(Addr16::new(read_u16_be(reader)?))
}

fn read_u16_be(reader: &mut ByteReader<'_>) -> std::result::Result<u16, DecodeError> {
    let bytes = reader.bytes(2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// An outbound API frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Local AT command (0x08)
    AtCommand {
        frame_id: u8,
        command: [u8; 2],
        parameter: Vec<u8>,
    },
    /// Explicit addressing command (0x11)
    ExplicitTx {
        frame_id: u8,
        destination64: Addr64,
        destination16: Addr16,
        message: ExplicitMessage,
    },
}

impl OutboundFrame {
    /// AT command query with no parameter. The frame id is assigned by the writer.
    pub fn at_command(command: &str) -> Result<Self> {
        let command: [u8; 2] = command
            .as_bytes()
            .try_into()
            .map_err(|_| BridgeError::MalformedFrame {
                details: format!("AT command must be two characters: {command:?}"),
            })?;
        Ok(Self::AtCommand {
            frame_id: 0,
            command,
            parameter: Vec::new(),
        })
    }

    pub fn explicit(destination64: Addr64, destination16: Addr16, message: ExplicitMessage) -> Self {
        Self::ExplicitTx {
            frame_id: 0,
            destination64,
            destination16,
            message,
        }
    }

    pub fn frame_id(&self) -> u8 {
        match self {
            Self::AtCommand { frame_id, .. } | Self::ExplicitTx { frame_id, .. } => *frame_id,
        }
    }

    pub fn set_frame_id(&mut self, id: u8) {
        match self {
            Self::AtCommand { frame_id, .. } | Self::ExplicitTx { frame_id, .. } => *frame_id = id,
        }
    }

    /// Serialise to frame data (frame type first, no framing or escaping).
    pub fn to_frame_data(&self) -> Vec<u8> {
        match self {
            Self::AtCommand {
                frame_id,
                command,
                parameter,
            } => {
                let mut data = vec![FRAME_AT_COMMAND, *frame_id, command[0], command[1]];
                data.extend_from_slice(parameter);
                data
            }
            Self::ExplicitTx {
                frame_id,
                destination64,
                destination16,
                message,
            } => {
                let mut data = Vec::with_capacity(20 + message.data.len());
                data.push(FRAME_EXPLICIT_TX);
                data.push(*frame_id);
                data.extend_from_slice(&destination64.to_be_bytes());
                data.extend_from_slice(&destination16.to_be_bytes());
                data.push(message.source_endpoint);
                data.push(message.destination_endpoint);
                data.extend_from_slice(&message.cluster_id.to_be_bytes());
                data.extend_from_slice(&message.profile_id.to_be_bytes());
                data.push(0x00); // broadcast radius: maximum hops
                data.push(0x00); // transmit options
                data.extend_from_slice(&message.data);
                data
            }
        }
    }
}
