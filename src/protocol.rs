// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::address::Addr16;
use crate::constants::{
    cluster, command, zdo, ENDPOINT_ALERTME, ENDPOINT_ZDO, HUB_PREAMBLE, PROFILE_ALERTME,
    PROFILE_ZDP,
};
use crate::error::{BridgeError, Result};

/// Named outbound message templates.
///
/// # Join handshake
///
/// A freshly joined device is brought into service with:
///
/// ```text
/// device → hub   match descriptor request (ZDP 0006)
/// hub → device   matchDescriptorResponse   (+1s, sequence echoed)
/// hub → device   activeEndpointRequest     (+3s, sequence echoed)
/// device → hub   active endpoint response  (ZDP 8005)
/// hub → device   modeChangeRequest normal  (+5s)
/// hub → device   versionInfoRequest        (+7s)
/// ```
///
/// ZDP sequence numbers are always supplied by the caller; the generator
/// never allocates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `activeEndpointRequest`: `[seq, addr16 LE]` on ZDP 0005.
    ActiveEndpointRequest,
    /// `matchDescriptorRequest`: ZDP 0006. Only the first output cluster is encoded.
    MatchDescriptorRequest,
    /// `matchDescriptorResponse`: ZDP 8006, fixed match list (ZDO, AlertMe).
    MatchDescriptorResponse,
    /// `modeChangeRequest`: status cluster command 0xFA with a mode code.
    ModeChangeRequest,
    /// `permitJoinRequest`: ZDP 0036, open joining for 255 seconds.
    PermitJoinRequest,
    /// `routingTableRequest`: ZDP 0032, management routing table from index 1.
    RoutingTableRequest,
    /// `securityInit`: wakes a security device that came up uninitialised.
    SecurityInit,
    /// `switchStateRequest`: relay on/off, or a state check.
    SwitchStateRequest,
    /// `versionInfoRequest`: discovery cluster command 0xFC.
    VersionInfoRequest,
}

impl MessageKind {
    pub const ALL: [MessageKind; 9] = [
        MessageKind::ActiveEndpointRequest,
        MessageKind::MatchDescriptorRequest,
        MessageKind::MatchDescriptorResponse,
        MessageKind::ModeChangeRequest,
        MessageKind::PermitJoinRequest,
        MessageKind::RoutingTableRequest,
        MessageKind::SecurityInit,
        MessageKind::SwitchStateRequest,
        MessageKind::VersionInfoRequest,
    ];

    /// Catalog name of the template.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ActiveEndpointRequest => "activeEndpointRequest",
            Self::MatchDescriptorRequest => "matchDescriptorRequest",
            Self::MatchDescriptorResponse => "matchDescriptorResponse",
            Self::ModeChangeRequest => "modeChangeRequest",
            Self::PermitJoinRequest => "permitJoinRequest",
            Self::RoutingTableRequest => "routingTableRequest",
            Self::SecurityInit => "securityInit",
            Self::SwitchStateRequest => "switchStateRequest",
            Self::VersionInfoRequest => "versionInfoRequest",
        }
    }

    /// Look up a template by catalog name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Fixed addressing of the template.
    pub fn template(&self) -> MessageTemplate {
        let (profile_id, cluster_id, source_endpoint, destination_endpoint) = match self {
            Self::ActiveEndpointRequest => {
                (PROFILE_ZDP, zdo::ACTIVE_ENDPOINT_REQUEST, ENDPOINT_ZDO, ENDPOINT_ZDO)
            }
            Self::MatchDescriptorRequest => {
                (PROFILE_ZDP, zdo::MATCH_DESCRIPTOR_REQUEST, ENDPOINT_ZDO, ENDPOINT_ZDO)
            }
            Self::MatchDescriptorResponse => {
                (PROFILE_ZDP, zdo::MATCH_DESCRIPTOR_RESPONSE, ENDPOINT_ZDO, ENDPOINT_ZDO)
            }
            Self::ModeChangeRequest => {
                (PROFILE_ALERTME, cluster::STATUS, ENDPOINT_ALERTME, ENDPOINT_ALERTME)
            }
            Self::PermitJoinRequest => {
                (PROFILE_ZDP, zdo::PERMIT_JOINING_REQUEST, ENDPOINT_ZDO, ENDPOINT_ZDO)
            }
            Self::RoutingTableRequest => {
                (PROFILE_ZDP, zdo::MANAGEMENT_ROUTING_REQUEST, ENDPOINT_ZDO, ENDPOINT_ZDO)
            }
            Self::SecurityInit => {
                (PROFILE_ALERTME, cluster::SECURITY, ENDPOINT_ALERTME, ENDPOINT_ALERTME)
            }
            Self::SwitchStateRequest => {
                (PROFILE_ALERTME, cluster::SWITCH, ENDPOINT_ZDO, ENDPOINT_ALERTME)
            }
            Self::VersionInfoRequest => {
                (PROFILE_ALERTME, cluster::DISCOVERY, ENDPOINT_ZDO, ENDPOINT_ALERTME)
            }
        };
        MessageTemplate {
            kind: *self,
            profile_id,
            cluster_id,
            source_endpoint,
            destination_endpoint,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MessageKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| BridgeError::UnknownMessageName { name: s.to_string() })
    }
}

/// Fixed addressing half of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTemplate {
    pub kind: MessageKind,
    pub profile_id: u16,
    pub cluster_id: u16,
    pub source_endpoint: u8,
    pub destination_endpoint: u8,
}

/// A fully generated application message, ready to be addressed and transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitMessage {
    pub kind: MessageKind,
    pub profile_id: u16,
    pub cluster_id: u16,
    pub source_endpoint: u8,
    pub destination_endpoint: u8,
    pub data: Vec<u8>,
}

/// Caller-supplied template parameters.
///
/// Deserialises from the same camelCase JSON shape the command surface accepts,
/// e.g. `{"switchState": "on"}` or `{"remote16": "478e", "zdoSequenceNumber": 3}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageParams {
    pub remote16: Option<Addr16>,
    pub zdo_sequence_number: Option<u8>,
    pub mode: Option<String>,
    pub switch_state: Option<String>,
    pub profile_id: Option<u16>,
    pub in_clusters: Vec<u16>,
    pub out_clusters: Vec<u16>,
}

impl MessageParams {
    /// Parameters for a ZDP request/response echoing `sequence`.
    pub fn zdo(remote16: Addr16, sequence: u8) -> Self {
        Self {
            remote16: Some(remote16),
            zdo_sequence_number: Some(sequence),
            ..Self::default()
        }
    }

    pub fn mode(mode: impl Into<String>) -> Self {
        Self {
            mode: Some(mode.into()),
            ..Self::default()
        }
    }

    pub fn switch_state(state: impl Into<String>) -> Self {
        Self {
            switch_state: Some(state.into()),
            ..Self::default()
        }
    }
}

/// AlertMe device operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceMode {
    Normal,
    RangeTest,
    Locked,
    Silent,
    Idle,
}

impl DeviceMode {
    pub const ALL: [DeviceMode; 5] = [
        DeviceMode::Normal,
        DeviceMode::RangeTest,
        DeviceMode::Locked,
        DeviceMode::Silent,
        DeviceMode::Idle,
    ];

    /// Mode code carried in the mode change request.
    pub fn code(&self) -> u8 {
        match self {
            Self::Normal => 0x00,
            Self::RangeTest => 0x01,
            Self::Locked => 0x02,
            Self::Silent => 0x03,
            Self::Idle => 0x04,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::RangeTest => "rangeTest",
            Self::Locked => "locked",
            Self::Silent => "silent",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| BridgeError::InvalidMode { mode: s.to_string() })
    }
}

/// Requested relay state for a switch state request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchRequest {
    On,
    Off,
    /// Ask the device to report its relay state without changing it.
    Check,
}

impl SwitchRequest {
    /// Normalise free-form user input, case-insensitively.
    ///
    /// Absent, empty or unrecognised input means [`SwitchRequest::Check`].
    pub fn normalize(input: Option<&str>) -> Self {
        let Some(input) = input else {
            return Self::Check;
        };
        match input.trim().to_lowercase().as_str() {
            "1" | "active" | "activate" | "on" | "poweron" | "switchon" | "true" => Self::On,
            "0" | "inactive" | "deactivate" | "off" | "poweroff" | "switchoff" | "false" => {
                Self::Off
            }
            _ => Self::Check,
        }
    }

    /// Cluster command byte followed by the request payload.
    fn encode(&self) -> Vec<u8> {
        match self {
            Self::On => vec![command::STATE_CHANGE, 0x01, 0x01],
            Self::Off => vec![command::STATE_CHANGE, 0x00, 0x01],
            Self::Check => vec![command::STATE_REQ, 0x01],
        }
    }
}

impl From<bool> for SwitchRequest {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

/// Build the outbound message for a catalog name.
///
/// Unknown names, unknown modes and missing required parameters are errors;
/// nothing is emitted in that case.
pub fn generate(name: &str, params: &MessageParams) -> Result<ExplicitMessage> {
    let kind: MessageKind = name.parse()?;
    generate_kind(kind, params)
}

/// Build the outbound message for a known template.
pub fn generate_kind(kind: MessageKind, params: &MessageParams) -> Result<ExplicitMessage> {
    let data = match kind {
        MessageKind::ActiveEndpointRequest => {
            let (remote16, sequence) = zdo_params(kind, params)?;
            let addr = remote16.to_le_bytes();
            vec![sequence, addr[0], addr[1]]
        }
        MessageKind::MatchDescriptorRequest => match_descriptor_request(params)?,
        MessageKind::MatchDescriptorResponse => {
            let sequence = sequence_param(kind, params)?;
            vec![
                sequence,
                zdo::STATUS_OK,
                0x00,
                0x00,
                0x01,
                ENDPOINT_ZDO,
                ENDPOINT_ALERTME,
            ]
        }
        MessageKind::ModeChangeRequest => {
            let mode = match params.mode.as_deref() {
                Some(mode) => mode.parse::<DeviceMode>()?,
                None => DeviceMode::Normal,
            };
            let mut data = HUB_PREAMBLE.to_vec();
            data.extend_from_slice(&[command::MODE_REQ, mode.code(), 0x01]);
            data
        }
        MessageKind::PermitJoinRequest => vec![0xFF, 0x00],
        MessageKind::RoutingTableRequest => vec![0x12, 0x01],
        MessageKind::SecurityInit => vec![0x11, 0x80, command::SECURITY_STATUS_CHANGE, 0x00, 0x05],
        MessageKind::SwitchStateRequest => {
            let request = SwitchRequest::normalize(params.switch_state.as_deref());
            let mut data = HUB_PREAMBLE.to_vec();
            data.extend(request.encode());
            data
        }
        MessageKind::VersionInfoRequest => {
            let mut data = HUB_PREAMBLE.to_vec();
            data.push(command::VERSION_REQ);
            data
        }
    };

    debug!("Generated {}: {:02x?}", kind, data);

    let template = kind.template();
    Ok(ExplicitMessage {
        kind,
        profile_id: template.profile_id,
        cluster_id: template.cluster_id,
        source_endpoint: template.source_endpoint,
        destination_endpoint: template.destination_endpoint,
        data,
    })
}

fn sequence_param(kind: MessageKind, params: &MessageParams) -> Result<u8> {
    params.zdo_sequence_number.ok_or(BridgeError::MissingParameter {
        message: kind.name(),
        parameter: "zdoSequenceNumber",
    })
}

fn zdo_params(kind: MessageKind, params: &MessageParams) -> Result<(Addr16, u8)> {
    let remote16 = params.remote16.ok_or(BridgeError::MissingParameter {
        message: kind.name(),
        parameter: "remote16",
    })?;
    Ok((remote16, sequence_param(kind, params)?))
}

fn match_descriptor_request(params: &MessageParams) -> Result<Vec<u8>> {
    let kind = MessageKind::MatchDescriptorRequest;
    let (remote16, sequence) = zdo_params(kind, params)?;
    let profile_id = params.profile_id.unwrap_or(PROFILE_ALERTME);

    let mut data = vec![sequence];
    data.extend_from_slice(&remote16.to_le_bytes());
    data.extend_from_slice(&profile_id.to_le_bytes());

    data.push(params.in_clusters.len() as u8);
    for cluster_id in &params.in_clusters {
        data.extend_from_slice(&cluster_id.to_le_bytes());
    }

    // Single output cluster only
    if params.out_clusters.len() > 1 {
        warn!(
            "{}: {} output clusters given, encoding only the first",
            kind,
            params.out_clusters.len()
        );
    }
    match params.out_clusters.first() {
        Some(cluster_id) => {
            data.push(0x01);
            data.extend_from_slice(&cluster_id.to_le_bytes());
        }
        None => data.push(0x00),
    }
    Ok(data)
}
