// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

//! Routing of explicit RX payloads to cluster decoders.
//!
//! Routes are keyed by `(profile, cluster, command)`. AlertMe clusters with
//! several commands key on the byte at [`COMMAND_OFFSET`]; clusters with a
//! single layout, and all ZDP clusters, use `None` as the command.

use std::collections::HashMap;
use std::fmt;

use crate::clusters::{
    button, discovery, keypad, power, security, status, switch, tamper, Attributes, DecodeContext,
};
use crate::constants::{cluster, command, zdo, COMMAND_OFFSET, PROFILE_ALERTME, PROFILE_ZDP};
use crate::error::{BridgeError, DecodeError, Result};

/// Everything an inbound payload can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decoder {
    Keypad,
    Button,
    RangeInfo,
    VersionRequest,
    VersionResponse,
    PowerDemand,
    PowerConsumption,
    PowerUnknown,
    Security,
    Lifesign,
    ModeChange,
    SwitchCheck,
    SwitchChange,
    SwitchResponse,
    Tamper,
    MatchDescriptorRequest,
    ActiveEndpointResponse,
}

impl Decoder {
    pub const ALL: [Decoder; 17] = [
        Decoder::Keypad,
        Decoder::Button,
        Decoder::RangeInfo,
        Decoder::VersionRequest,
        Decoder::VersionResponse,
        Decoder::PowerDemand,
        Decoder::PowerConsumption,
        Decoder::PowerUnknown,
        Decoder::Security,
        Decoder::Lifesign,
        Decoder::ModeChange,
        Decoder::SwitchCheck,
        Decoder::SwitchChange,
        Decoder::SwitchResponse,
        Decoder::Tamper,
        Decoder::MatchDescriptorRequest,
        Decoder::ActiveEndpointResponse,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Keypad => "keypad attribute",
            Self::Button => "button",
            Self::RangeInfo => "range info update",
            Self::VersionRequest => "version info request",
            Self::VersionResponse => "version info response",
            Self::PowerDemand => "power demand",
            Self::PowerConsumption => "power consumption",
            Self::PowerUnknown => "power unknown",
            Self::Security => "security state",
            Self::Lifesign => "lifesign",
            Self::ModeChange => "mode change request",
            Self::SwitchCheck => "switch state check",
            Self::SwitchChange => "switch state change",
            Self::SwitchResponse => "switch state response",
            Self::Tamper => "tamper state",
            Self::MatchDescriptorRequest => "match descriptor request",
            Self::ActiveEndpointResponse => "active endpoint response",
        }
    }

    /// Decode the payload. Decoders without attributes return an empty map.
    pub fn decode(&self, payload: &[u8], ctx: &DecodeContext) -> std::result::Result<Attributes, DecodeError> {
        match self {
            Self::Keypad => keypad::decode(payload),
            Self::Button => button::decode(payload),
            Self::RangeInfo => discovery::decode_range_info(payload),
            Self::VersionResponse => discovery::decode_version_info(payload),
            Self::PowerDemand => power::decode_demand(payload),
            Self::PowerConsumption => power::decode_consumption(payload),
            Self::PowerUnknown => power::decode_unknown(payload),
            Self::Security => security::decode(payload, ctx),
            Self::Lifesign => status::decode_lifesign(payload, ctx),
            Self::ModeChange => status::decode_mode_change(payload),
            Self::SwitchChange => switch::decode_state_change(payload),
            Self::SwitchResponse => switch::decode_state_response(payload),
            Self::Tamper => tamper::decode(payload),
            Self::VersionRequest
            | Self::SwitchCheck
            | Self::MatchDescriptorRequest
            | Self::ActiveEndpointResponse => Ok(Attributes::new()),
        }
    }
}

impl fmt::Display for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Composite dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub profile_id: u16,
    pub cluster_id: u16,
    pub command: Option<u8>,
}

impl RouteKey {
    pub const fn new(profile_id: u16, cluster_id: u16, command: Option<u8>) -> Self {
        Self {
            profile_id,
            cluster_id,
            command,
        }
    }
}

/// Default routes.
const ROUTES: [(RouteKey, Decoder); 17] = [
    (RouteKey::new(PROFILE_ALERTME, cluster::ATTRIBUTE, Some(command::ATTRIBUTE_REPORT)), Decoder::Keypad),
    (RouteKey::new(PROFILE_ALERTME, cluster::BUTTON, None), Decoder::Button),
    (RouteKey::new(PROFILE_ALERTME, cluster::DISCOVERY, Some(command::RSSI)), Decoder::RangeInfo),
    (RouteKey::new(PROFILE_ALERTME, cluster::DISCOVERY, Some(command::VERSION_REQ)), Decoder::VersionRequest),
    (RouteKey::new(PROFILE_ALERTME, cluster::DISCOVERY, Some(command::VERSION_RESP)), Decoder::VersionResponse),
    (RouteKey::new(PROFILE_ALERTME, cluster::POWER, Some(command::POWER_DEMAND)), Decoder::PowerDemand),
    (RouteKey::new(PROFILE_ALERTME, cluster::POWER, Some(command::POWER_CONSUMPTION)), Decoder::PowerConsumption),
    (RouteKey::new(PROFILE_ALERTME, cluster::POWER, Some(command::POWER_UNKNOWN)), Decoder::PowerUnknown),
    (RouteKey::new(PROFILE_ALERTME, cluster::SECURITY, None), Decoder::Security),
    (RouteKey::new(PROFILE_ALERTME, cluster::STATUS, Some(command::STATUS)), Decoder::Lifesign),
    (RouteKey::new(PROFILE_ALERTME, cluster::STATUS, Some(command::MODE_REQ)), Decoder::ModeChange),
    (RouteKey::new(PROFILE_ALERTME, cluster::SWITCH, Some(command::STATE_REQ)), Decoder::SwitchCheck),
    (RouteKey::new(PROFILE_ALERTME, cluster::SWITCH, Some(command::STATE_CHANGE)), Decoder::SwitchChange),
    (RouteKey::new(PROFILE_ALERTME, cluster::SWITCH, Some(command::STATE_RESP)), Decoder::SwitchResponse),
    (RouteKey::new(PROFILE_ALERTME, cluster::TAMPER, None), Decoder::Tamper),
    (RouteKey::new(PROFILE_ZDP, zdo::MATCH_DESCRIPTOR_REQUEST, None), Decoder::MatchDescriptorRequest),
    (RouteKey::new(PROFILE_ZDP, zdo::ACTIVE_ENDPOINT_RESPONSE, None), Decoder::ActiveEndpointResponse),
];

/// Validated lookup table from [`RouteKey`] to [`Decoder`].
#[derive(Debug, Clone)]
pub struct DispatchTable {
    routes: HashMap<RouteKey, Decoder>,
}

impl DispatchTable {
    /// Build the default table.
    pub fn new() -> Result<Self> {
        Self::from_routes(ROUTES)
    }

    /// Build a table, rejecting duplicate keys and decoders without a route.
    pub fn from_routes(routes: impl IntoIterator<Item = (RouteKey, Decoder)>) -> Result<Self> {
        let mut table = HashMap::new();
        for (key, decoder) in routes {
            if table.insert(key, decoder).is_some() {
                return Err(BridgeError::DuplicateRoute {
                    profile_id: key.profile_id,
                    cluster_id: key.cluster_id,
                    command: key.command,
                });
            }
        }
        if let Some(missing) = Decoder::ALL
            .iter()
            .find(|decoder| !table.values().any(|routed| routed == *decoder))
        {
            return Err(BridgeError::UnroutedDecoder {
                decoder: missing.name(),
            });
        }
        Ok(Self { routes: table })
    }

    /// Find the decoder for a payload.
    ///
    /// AlertMe payloads try the command-specific route first, then the
    /// cluster-wide one. Unmodelled combinations return `None`.
    pub fn route(&self, profile_id: u16, cluster_id: u16, payload: &[u8]) -> Option<Decoder> {
        if profile_id == PROFILE_ALERTME
            && let Some(&command) = payload.get(COMMAND_OFFSET)
            && let Some(decoder) = self
                .routes
                .get(&RouteKey::new(profile_id, cluster_id, Some(command)))
        {
            return Some(*decoder);
        }
        self.routes
            .get(&RouteKey::new(profile_id, cluster_id, None))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
