// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::address::{Addr16, Addr64};
use crate::clusters::AttributeValue;
use crate::devices::device::{AttributeRecord, Device};
use crate::error::{BridgeError, Result};

/// Reverse mapping remote16 → remote64.
///
/// Derived from the registry and refreshed whenever a device's 16-bit
/// address changes. A 16-bit address maps to at most one device.
#[derive(Debug, Clone, Default)]
pub struct AddressIndex {
    by_remote16: HashMap<Addr16, Addr64>,
}

impl AddressIndex {
    pub fn lookup(&self, remote16: Addr16) -> Option<Addr64> {
        self.by_remote16.get(&remote16).copied()
    }

    /// Point `remote16` at `remote64`, dropping the device's previous mapping.
    fn update(&mut self, remote64: Addr64, previous: Option<Addr16>, remote16: Addr16) {
        if let Some(previous) = previous
            && previous != remote16
            && self.by_remote16.get(&previous) == Some(&remote64)
        {
            self.by_remote16.remove(&previous);
        }
        if let Some(other) = self.by_remote16.insert(remote16, remote64)
            && other != remote64
        {
            debug!("remote16 {} moved from {} to {}", remote16, other, remote64);
        }
    }

    pub fn len(&self) -> usize {
        self.by_remote16.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_remote16.is_empty()
    }
}

/// Outcome of [`DeviceRegistry::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub remote64: Addr64,
    /// First frame ever seen from this device.
    pub is_new: bool,
    /// `first_seen_at` was stamped by this observation.
    pub first_seen: bool,
    pub remote16_changed: bool,
}

/// All known devices plus the derived [`AddressIndex`].
///
/// Devices are created on first sighting and never removed.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<Addr64, Device>,
    index: AddressIndex,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from persisted devices, rebuilding the address index.
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut registry = Self::new();
        for device in devices {
            if device.remote64.is_broadcast() {
                continue;
            }
            if let Some(remote16) = device.remote16 {
                registry.index.update(device.remote64, None, remote16);
            }
            registry.devices.insert(device.remote64, device);
        }
        registry
    }

    /// Resolve the durable identity of a frame's sender.
    ///
    /// A missing or broadcast 64-bit address falls back to the address index.
    pub fn resolve(&self, remote64: Option<Addr64>, remote16: Option<Addr16>) -> Result<Addr64> {
        if let Some(remote64) = remote64
            && !remote64.is_broadcast()
        {
            return Ok(remote64);
        }
        let Some(remote16) = remote16 else {
            return Err(BridgeError::AddressResolution {
                remote16: "none".to_string(),
            });
        };
        self.index
            .lookup(remote16)
            .ok_or_else(|| BridgeError::AddressResolution {
                remote16: remote16.to_string(),
            })
    }

    /// Record a frame from `remote64`: create the device if unseen, refresh
    /// its 16-bit address and the index, and stamp `last_seen_at`.
    pub fn observe(
        &mut self,
        remote64: Addr64,
        remote16: Option<Addr16>,
        now: DateTime<Utc>,
    ) -> Observation {
        let mut is_new = false;
        let device = self.devices.entry(remote64).or_insert_with(|| {
            is_new = true;
            Device::new(remote64)
        });
        if is_new {
            info!("New device {}", remote64);
        }

        let mut remote16_changed = false;
        if let Some(remote16) = remote16 {
            let previous = device.remote16;
            if previous != Some(remote16) {
                remote16_changed = true;
                if previous.is_some() {
                    info!("Device {} changed remote16 {:?} -> {}", remote64, previous, remote16);
                }
                device.remote16 = Some(remote16);
            }
            self.index.update(remote64, previous, remote16);
        }

        let first_seen = device.first_seen_at.is_none();
        if first_seen {
            device.first_seen_at = Some(now);
        }
        device.last_seen_at = Some(now);

        Observation {
            remote64,
            is_new,
            first_seen,
            remote16_changed,
        }
    }

    /// Store an accepted attribute value.
    pub fn apply_attribute(
        &mut self,
        remote64: Addr64,
        name: &str,
        value: AttributeValue,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let device = self.get_mut(remote64)?;
        device.attributes.insert(
            name.to_string(),
            AttributeRecord {
                value,
                last_seen_at: now,
            },
        );
        Ok(())
    }

    pub fn get(&self, remote64: Addr64) -> Option<&Device> {
        self.devices.get(&remote64)
    }

    pub fn get_mut(&mut self, remote64: Addr64) -> Result<&mut Device> {
        self.devices
            .get_mut(&remote64)
            .ok_or_else(|| BridgeError::UnknownDevice {
                remote64: remote64.to_string(),
            })
    }

    /// Current 16-bit address of a known device.
    pub fn remote16_of(&self, remote64: Addr64) -> Result<Addr16> {
        self.get(remote64)
            .and_then(|device| device.remote16)
            .ok_or_else(|| BridgeError::UnknownDevice {
                remote64: remote64.to_string(),
            })
    }

    pub fn index(&self) -> &AddressIndex {
        &self.index
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.values_mut()
    }

    pub fn snapshot(&self) -> BTreeMap<Addr64, Device> {
        self.devices.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    const PIR: Addr64 = Addr64::new(0x000D_6F00_0354_CBAD);
    const PLUG: Addr64 = Addr64::new(0x000D_6F00_0273_95A2);

    #[test]
    fn test_observe_creates_once() {
        let mut registry = DeviceRegistry::new();
        let first = registry.observe(PIR, Some(Addr16::new(0x478E)), at(0));
        let second = registry.observe(PIR, Some(Addr16::new(0x478E)), at(1));
        assert!(first.is_new);
        assert!(first.first_seen);
        assert!(!second.is_new);
        assert!(!second.first_seen);
        assert!(!second.remote16_changed);
        assert_eq!(registry.len(), 1);

        let device = registry.get(PIR).unwrap();
        assert_eq!(device.first_seen_at, Some(at(0)));
        assert_eq!(device.last_seen_at, Some(at(1)));
    }

    #[test]
    fn test_resolve_via_index() {
        let mut registry = DeviceRegistry::new();
        registry.observe(PIR, Some(Addr16::new(0x478E)), at(0));

        assert_eq!(registry.resolve(None, Some(Addr16::new(0x478E))).unwrap(), PIR);
        assert_eq!(
            registry
                .resolve(Some(Addr64::BROADCAST), Some(Addr16::new(0x478E)))
                .unwrap(),
            PIR
        );
        assert_eq!(registry.resolve(Some(PLUG), None).unwrap(), PLUG);

        let err = registry.resolve(Some(Addr64::BROADCAST), Some(Addr16::new(0x1234)));
        assert!(matches!(err, Err(BridgeError::AddressResolution { .. })));
        assert!(registry.resolve(None, None).is_err());
    }

    #[test]
    fn test_rejoin_moves_index() {
        let mut registry = DeviceRegistry::new();
        registry.observe(PIR, Some(Addr16::new(0x478E)), at(0));
        let obs = registry.observe(PIR, Some(Addr16::new(0x9A01)), at(5));
        assert!(obs.remote16_changed);
        assert_eq!(registry.index().lookup(Addr16::new(0x478E)), None);
        assert_eq!(registry.index().lookup(Addr16::new(0x9A01)), Some(PIR));

        // Another device takes over the old address
        registry.observe(PLUG, Some(Addr16::new(0x9A01)), at(6));
        assert_eq!(registry.index().lookup(Addr16::new(0x9A01)), Some(PLUG));
        assert_eq!(registry.index().len(), 1);
    }

    #[test]
    fn test_apply_attribute() {
        let mut registry = DeviceRegistry::new();
        assert!(registry
            .apply_attribute(PIR, "motionState", true.into(), at(0))
            .is_err());
        registry.observe(PIR, None, at(0));
        registry
            .apply_attribute(PIR, "motionState", true.into(), at(3))
            .unwrap();
        let record = registry.get(PIR).unwrap().attribute("motionState").unwrap();
        assert_eq!(record.value, AttributeValue::Bool(true));
        assert_eq!(record.last_seen_at, at(3));
    }

    #[test]
    fn test_from_devices_rebuilds_index() {
        let mut device = Device::new(PLUG);
        device.remote16 = Some(Addr16::new(0x0B2C));
        let registry = DeviceRegistry::from_devices([device, Device::new(Addr64::BROADCAST)]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.remote16_of(PLUG).unwrap(), Addr16::new(0x0B2C));
        assert_eq!(registry.resolve(None, Some(Addr16::new(0x0B2C))).unwrap(), PLUG);
    }
}
