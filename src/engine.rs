// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

//! The protocol core.
//!
//! [`Engine`] is synchronous and owns all device state. Every inbound frame,
//! watchdog tick and outbound request goes through `&mut Engine`, which makes
//! it the single writer of the registry. Side effects are returned as
//! [`Effect`]s for the caller to carry out (publish, send, schedule, persist).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::address::{Addr16, Addr64, OwnIdentity};
use crate::clusters::{security, Attributes, AttributeValue, DecodeContext};
use crate::config::BridgeConfig;
use crate::constants::profile_name;
use crate::debounce::{DebouncePolicy, Decision};
use crate::devices::{Device, DeviceRegistry};
use crate::dispatch::{Decoder, DispatchTable};
use crate::error::Result;
use crate::event::{BridgeEvent, Publication};
use crate::join::{JoinState, JoinTracker, ScheduledSend};
use crate::protocol::{generate_kind, MessageKind, MessageParams};
use crate::store::StatusSnapshot;
use crate::transport::frame::{ExplicitRx, OutboundFrame, RawFrame};
use crate::watchdog::Watchdog;

/// Something the engine wants done outside of itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Emit on the event channel
    Event(BridgeEvent),
    /// Send a catalog message to a device now
    Send {
        remote64: Addr64,
        kind: MessageKind,
        params: MessageParams,
    },
    /// Send a catalog message after a delay
    Schedule(ScheduledSend),
    /// Drop pending scheduled sends for a device
    CancelScheduled { remote64: Addr64 },
    /// Save the status snapshot
    Persist,
}

impl Effect {
    fn publish(publication: Publication) -> Self {
        Self::Event(BridgeEvent::Publication(publication))
    }
}

/// Single-writer protocol engine.
#[derive(Debug)]
pub struct Engine {
    registry: DeviceRegistry,
    own: OwnIdentity,
    dispatch: DispatchTable,
    debounce: DebouncePolicy,
    join: JoinTracker,
    watchdog: Watchdog,
    node_names: HashMap<Addr64, String>,
    temperature_offsets: HashMap<Addr64, f64>,
}

impl Engine {
    /// Build an engine. Fails if the dispatch table is inconsistent.
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        Ok(Self {
            registry: DeviceRegistry::new(),
            own: OwnIdentity::new(),
            dispatch: DispatchTable::new()?,
            debounce: DebouncePolicy::new(config.motion_debounce()),
            join: JoinTracker::new(),
            watchdog: Watchdog::new(config.offline_after()),
            node_names: config.node_names.clone(),
            temperature_offsets: config.temperature_offsets.clone(),
        })
    }

    /// Restore devices and own identity from a saved snapshot.
    pub fn restore(&mut self, snapshot: StatusSnapshot) {
        info!("Restoring {} device(s) from status", snapshot.nodes.len());
        self.registry = DeviceRegistry::from_devices(snapshot.nodes.into_values());
        self.own = snapshot.own;
        for device in self.registry.iter_mut() {
            if let Some(name) = self.node_names.get(&device.remote64) {
                device.display_name = Some(name.clone());
            }
        }
    }

    /// Replace per-device configuration (after a config reload).
    pub fn reconfigure(&mut self, config: &BridgeConfig) {
        self.debounce = DebouncePolicy::new(config.motion_debounce());
        self.watchdog = Watchdog::new(config.offline_after());
        self.node_names = config.node_names.clone();
        self.temperature_offsets = config.temperature_offsets.clone();
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn own_identity(&self) -> &OwnIdentity {
        &self.own
    }

    pub fn join_state(&self, remote64: Addr64) -> Option<JoinState> {
        self.join.state(remote64)
    }

    pub fn devices(&self) -> Vec<Device> {
        self.registry.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            own: self.own.clone(),
            nodes: self.registry.snapshot(),
        }
    }

    /// Handle one inbound frame.
    pub fn handle_frame(&mut self, frame: &RawFrame, now: DateTime<Utc>) -> Vec<Effect> {
        match frame {
            RawFrame::AtResponse {
                frame_id,
                command,
                status,
                data,
            } => self.handle_at_response(*frame_id, command, *status, data),
            RawFrame::TxStatus {
                frame_id,
                remote16,
                retries,
                delivery_status,
                ..
            } => {
                if *delivery_status == 0 {
                    debug!("TX status frame {} to {}: delivered ({} retries)", frame_id, remote16, retries);
                } else {
                    warn!(
                        "TX status frame {} to {}: delivery failed 0x{:02x} ({} retries)",
                        frame_id, remote16, delivery_status, retries
                    );
                }
                Vec::new()
            }
            RawFrame::ExplicitRx(rx) => self.handle_explicit_rx(rx, now),
            RawFrame::Other { frame_type, data } => {
                debug!("Ignoring frame type 0x{:02x} ({} bytes)", frame_type, data.len());
                Vec::new()
            }
        }
    }

    fn handle_at_response(&mut self, frame_id: u8, command: &str, status: u8, data: &[u8]) -> Vec<Effect> {
        if status != 0 {
            warn!("AT {} (frame {}) returned status {}", command, frame_id, status);
            return Vec::new();
        }
        debug!("AT {} response: {:02x?}", command, data);
        if !self.own.apply_at_response(command, data) {
            return Vec::new();
        }
        info!(
            "Own address: {}/{}",
            self.own.addr64.map(|a| a.to_string()).unwrap_or_else(|| "?".into()),
            self.own.addr16.map(|a| a.to_string()).unwrap_or_else(|| "?".into())
        );
        vec![Effect::Event(BridgeEvent::OwnIdentity(self.own.clone())), Effect::Persist]
    }

    fn handle_explicit_rx(&mut self, rx: &ExplicitRx, now: DateTime<Utc>) -> Vec<Effect> {
        let remote64 = match self.registry.resolve(rx.remote64, rx.remote16) {
            Ok(remote64) => remote64,
            Err(e) => {
                warn!("Dropping frame from {:?}/{:?}: {}", rx.remote64, rx.remote16, e);
                return Vec::new();
            }
        };

        let mut effects = Vec::new();
        let observation = self.registry.observe(remote64, rx.remote16, now);
        let name = self.node_names.get(&remote64).cloned();
        if let Ok(device) = self.registry.get_mut(remote64) {
            device.display_name = name.clone();
        }

        if observation.is_new {
            self.join.discovered(remote64);
            effects.push(Effect::Event(BridgeEvent::DeviceDiscovered { remote64 }));
            effects.push(Effect::Persist);
        }

        if let Some(remote16) = rx.remote16 {
            effects.push(Effect::publish(Publication::stat(remote64, "remote16", remote16.to_string(), false)));
        }
        effects.push(Effect::publish(Publication::stat(remote64, "remote64", remote64.to_string(), true)));
        if let Some(name) = &name {
            effects.push(Effect::publish(Publication::stat(remote64, "name", name.as_str(), true)));
        }
        if observation.first_seen {
            effects.push(Effect::publish(Publication::stat(remote64, "firstSeen", now, true)));
        }
        effects.push(Effect::publish(Publication::stat(remote64, "lastSeen", now, true)));

        let decoder = self.dispatch.route(rx.profile_id, rx.cluster_id, &rx.payload);
        debug!(
            "Received from {}/{} {}{}/{} explicit rx > {} > {:04x} > {}",
            remote64,
            rx.remote16.map(|a| a.to_string()).unwrap_or_else(|| "????".into()),
            name.as_deref().map(|n| format!("({n}) ")).unwrap_or_default(),
            rx.source_endpoint,
            rx.destination_endpoint,
            profile_name(rx.profile_id),
            rx.cluster_id,
            decoder.map(|d| d.name()).unwrap_or("unmodelled"),
        );
        let Some(decoder) = decoder else {
            return effects;
        };

        let ctx = DecodeContext {
            remote64: Some(remote64),
            model: self.registry.get(remote64).and_then(Device::device_model),
            temperature_offset: self.temperature_offsets.get(&remote64).copied(),
        };
        let attributes = match decoder.decode(&rx.payload, &ctx) {
            Ok(attributes) => attributes,
            Err(e) => {
                warn!("Failed to decode {} from {}: {}", decoder, remote64, e);
                Attributes::new()
            }
        };

        self.react(decoder, remote64, rx, &attributes, &mut effects);

        if self.own.is_self(remote64) {
            debug!("Not publishing attributes of own radio");
            return effects;
        }
        self.apply_attributes(remote64, attributes, now, &mut effects);
        effects
    }

    /// Dispatcher-level reactions to decoded frames.
    fn react(
        &mut self,
        decoder: Decoder,
        remote64: Addr64,
        rx: &ExplicitRx,
        attributes: &Attributes,
        effects: &mut Vec<Effect>,
    ) {
        match decoder {
            Decoder::MatchDescriptorRequest => {
                let remote16 = rx.remote16.or_else(|| self.registry.remote16_of(remote64).ok());
                let (Some(&sequence), Some(remote16)) = (rx.payload.first(), remote16) else {
                    warn!("Match descriptor request from {} without sequence or remote16", remote64);
                    return;
                };
                effects.push(Effect::CancelScheduled { remote64 });
                let sends = self.join.on_match_descriptor_request(remote64, remote16, sequence);
                effects.extend(sends.into_iter().map(Effect::Schedule));
            }
            Decoder::ActiveEndpointResponse => {
                let sends = self.join.on_active_endpoint_response(remote64);
                effects.extend(sends.into_iter().map(Effect::Schedule));
            }
            Decoder::PowerConsumption => effects.push(Effect::Send {
                remote64,
                kind: MessageKind::SwitchStateRequest,
                params: MessageParams::default(),
            }),
            Decoder::Security => {
                let Ok(device) = self.registry.get_mut(remote64) else {
                    return;
                };
                if !security::has_cold_start_signature(&rx.payload) {
                    device.security_init_sent = false;
                } else if !device.security_init_sent {
                    info!("Device {} cold started, sending security init", device.label());
                    device.security_init_sent = true;
                    effects.push(Effect::Send {
                        remote64,
                        kind: MessageKind::SecurityInit,
                        params: MessageParams::default(),
                    });
                }
            }
            Decoder::Keypad if !attributes.is_empty() => {
                let entry: BTreeMap<String, AttributeValue> = attributes
                    .iter()
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect();
                effects.push(Effect::Event(BridgeEvent::Keypad { remote64, entry }));
            }
            Decoder::VersionResponse if !attributes.is_empty() => {
                let text = |name: &str| attributes.get(name).and_then(AttributeValue::as_str).map(str::to_string);
                let Ok(device) = self.registry.get_mut(remote64) else {
                    return;
                };
                device.make = text("make");
                device.model = text("model");
                device.build_date = text("buildDate");
                let model = device.model.clone();
                self.join.on_version_info(remote64);
                effects.push(Effect::Event(BridgeEvent::DeviceJoined { remote64, model }));
                effects.push(Effect::Persist);
            }
            _ => {}
        }
    }

    fn apply_attributes(
        &mut self,
        remote64: Addr64,
        attributes: Attributes,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        for (name, value) in attributes {
            let previous = self
                .registry
                .get(remote64)
                .and_then(|device| device.attribute(name));
            if self.debounce.decide(name, &value, previous, now) == Decision::Suppress {
                debug!("Debounced {} = {} from {}", name, value, remote64);
                continue;
            }
            if let Err(e) = self.registry.apply_attribute(remote64, name, value.clone(), now) {
                warn!("Failed to store {} for {}: {}", name, remote64, e);
                continue;
            }
            effects.push(Effect::publish(Publication::stat(remote64, name, value, true)));
        }
    }

    /// Classify every device and republish its liveness.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<Effect> {
        self.watchdog
            .sweep(&self.registry, now)
            .into_iter()
            .map(|(remote64, liveness)| Effect::publish(Publication::liveness(remote64, liveness)))
            .collect()
    }

    /// Generate a catalog message and address it to a device.
    ///
    /// Devices are addressed by their last known remote16.
    /// [`Addr64::BROADCAST_TX`] addresses all routers.
    pub fn outbound(&self, remote64: Addr64, kind: MessageKind, params: &MessageParams) -> Result<OutboundFrame> {
        let remote16 = if remote64 == Addr64::BROADCAST_TX {
            Addr16::BROADCAST_ROUTERS
        } else {
            self.registry.remote16_of(remote64)?
        };
        let message = generate_kind(kind, params)?;
        Ok(OutboundFrame::explicit(remote64, remote16, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{cluster, zdo, PROFILE_ALERTME, PROFILE_ZDP};
    use chrono::TimeZone;

    const PIR: Addr64 = Addr64::new(0x000D_6F00_0354_CBAD);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn rx(remote64: Addr64, remote16: u16, profile_id: u16, cluster_id: u16, payload: &[u8]) -> RawFrame {
        RawFrame::ExplicitRx(ExplicitRx {
            remote64: Some(remote64),
            remote16: Some(Addr16::new(remote16)),
            source_endpoint: 0x02,
            destination_endpoint: 0x02,
            cluster_id,
            profile_id,
            receive_options: 0x01,
            payload: payload.to_vec(),
        })
    }

    fn publications(effects: &[Effect]) -> Vec<&Publication> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Event(BridgeEvent::Publication(p)) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn published<'a>(effects: &'a [Effect], suffix: &str) -> Option<&'a AttributeValue> {
        publications(effects)
            .into_iter()
            .find(|p| p.topic.ends_with(&format!("/{suffix}")))
            .map(|p| &p.value)
    }

    fn engine() -> Engine {
        Engine::new(&BridgeConfig::default()).unwrap()
    }

    #[test]
    fn test_first_frame_creates_and_persists() {
        let mut engine = engine();
        let frame = rx(PIR, 0x478E, PROFILE_ALERTME, cluster::BUTTON, &[0x09, 0x00, 0x01, 0x00]);
        let effects = engine.handle_frame(&frame, at(0));
        assert!(effects.contains(&Effect::Persist));
        assert!(effects.contains(&Effect::Event(BridgeEvent::DeviceDiscovered { remote64: PIR })));
        assert_eq!(published(&effects, "buttonState"), Some(&AttributeValue::Bool(true)));
        assert!(published(&effects, "firstSeen").is_some());

        let again = engine.handle_frame(&frame, at(1));
        assert!(!again.contains(&Effect::Persist));
        assert!(published(&again, "firstSeen").is_none());
        assert_eq!(engine.registry().len(), 1);
        assert_eq!(engine.join_state(PIR), Some(JoinState::Discovered));
    }

    #[test]
    fn test_remote16_not_retained() {
        let mut engine = engine();
        let effects = engine.handle_frame(&rx(PIR, 0x478E, PROFILE_ALERTME, cluster::TAMPER, &[0x09, 0x00, 0x00, 0x02]), at(0));
        let remote16 = publications(&effects)
            .into_iter()
            .find(|p| p.topic == "stat/000d6f000354cbad/remote16")
            .unwrap();
        assert!(!remote16.retain);
        assert_eq!(remote16.value, AttributeValue::from("478e"));
    }

    #[test]
    fn test_unroutable_frame_dropped() {
        let mut engine = engine();
        let frame = RawFrame::ExplicitRx(ExplicitRx {
            remote64: Some(Addr64::BROADCAST),
            remote16: Some(Addr16::new(0x1234)),
            source_endpoint: 0,
            destination_endpoint: 0,
            cluster_id: zdo::END_DEVICE_ANNOUNCE,
            profile_id: PROFILE_ZDP,
            receive_options: 0,
            payload: vec![0x01],
        });
        assert!(engine.handle_frame(&frame, at(0)).is_empty());
        assert!(engine.registry().is_empty());
    }

    #[test]
    fn test_power_consumption_triggers_switch_check() {
        let mut engine = engine();
        let payload = [0x09, 0x6A, 0x82, 0x10, 0x27, 0x00, 0x00, 0x80, 0x51, 0x01, 0x00];
        let effects = engine.handle_frame(&rx(PIR, 0x478E, PROFILE_ALERTME, cluster::POWER, &payload), at(0));
        assert!(effects.contains(&Effect::Send {
            remote64: PIR,
            kind: MessageKind::SwitchStateRequest,
            params: MessageParams::default(),
        }));
        assert_eq!(published(&effects, "kWh"), Some(&AttributeValue::Integer(10_000)));
    }

    #[test]
    fn test_security_init_once_per_cold_start() {
        let mut engine = engine();
        let cold = [0x09, 0x00, 0x00, 0x15, 0x00, 0x39, 0x10];
        let is_init = |effects: &[Effect]| {
            effects.iter().any(|e| matches!(e, Effect::Send { kind: MessageKind::SecurityInit, .. }))
        };
        let frame = rx(PIR, 0x478E, PROFILE_ALERTME, cluster::SECURITY, &cold);
        assert!(is_init(&engine.handle_frame(&frame, at(0))));
        assert!(!is_init(&engine.handle_frame(&frame, at(1))));

        let normal = rx(PIR, 0x478E, PROFILE_ALERTME, cluster::SECURITY, &[0x09, 0x00, 0x00, 0x04, 0x00, 0x00]);
        engine.handle_frame(&normal, at(2));
        assert!(is_init(&engine.handle_frame(&frame, at(3))));
    }

    #[test]
    fn test_own_address_from_at_responses() {
        let mut engine = engine();
        let sh = RawFrame::AtResponse { frame_id: 2, command: "SH".into(), status: 0, data: vec![0x00, 0x13, 0xA2, 0x00] };
        let sl = RawFrame::AtResponse { frame_id: 3, command: "SL".into(), status: 0, data: vec![0x40, 0xA1, 0xB2, 0xC3] };
        assert!(engine.handle_frame(&sh, at(0)).is_empty());
        let effects = engine.handle_frame(&sl, at(0));
        assert!(effects.contains(&Effect::Persist));
        assert_eq!(engine.own_identity().addr64, Some(Addr64::new(0x0013_A200_40A1_B2C3)));

        // Attributes from our own radio are not published
        let own = Addr64::new(0x0013_A200_40A1_B2C3);
        let effects = engine.handle_frame(&rx(own, 0x0000, PROFILE_ALERTME, cluster::BUTTON, &[0x09, 0x00, 0x01]), at(1));
        assert!(published(&effects, "buttonState").is_none());
        assert!(published(&effects, "lastSeen").is_some());
    }

    #[test]
    fn test_outbound_uses_stored_remote16() {
        let mut engine = engine();
        assert!(engine.outbound(PIR, MessageKind::VersionInfoRequest, &MessageParams::default()).is_err());
        engine.handle_frame(&rx(PIR, 0x478E, PROFILE_ALERTME, cluster::BUTTON, &[0x09, 0x00, 0x00]), at(0));
        let frame = engine.outbound(PIR, MessageKind::VersionInfoRequest, &MessageParams::default()).unwrap();
        assert!(matches!(frame, OutboundFrame::ExplicitTx { destination16, .. } if destination16 == Addr16::new(0x478E)));

        let broadcast = engine
            .outbound(Addr64::BROADCAST_TX, MessageKind::PermitJoinRequest, &MessageParams::default())
            .unwrap();
        assert!(matches!(
            broadcast,
            OutboundFrame::ExplicitTx { destination16: Addr16::BROADCAST_ROUTERS, .. }
        ));
    }

    #[test]
    fn test_tick_publishes_liveness() {
        let mut engine = engine();
        engine.handle_frame(&rx(PIR, 0x478E, PROFILE_ALERTME, cluster::BUTTON, &[0x09, 0x00, 0x00]), at(0));
        let effects = engine.tick(at(599));
        assert_eq!(published(&effects, "LWT"), Some(&AttributeValue::from("online")));
        let effects = engine.tick(at(600));
        assert_eq!(published(&effects, "LWT"), Some(&AttributeValue::from("offline")));
    }
}
