// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Addr64;
use crate::constants::DEFAULT_OFFLINE_AFTER;
use crate::devices::DeviceRegistry;

/// Liveness classification of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Online,
    Offline,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies devices as online or offline from their `last_seen_at`.
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    offline_after: Duration,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(DEFAULT_OFFLINE_AFTER)
    }
}

impl Watchdog {
    pub fn new(offline_after: Duration) -> Self {
        Self { offline_after }
    }

    /// Online strictly below the threshold, offline at or above it.
    pub fn classify(&self, last_seen_at: DateTime<Utc>, now: DateTime<Utc>) -> Liveness {
        match now.signed_duration_since(last_seen_at).to_std() {
            Ok(elapsed) if elapsed >= self.offline_after => Liveness::Offline,
            // Negative elapsed time means the clock stepped back
            _ => Liveness::Online,
        }
    }

    /// Classify every device that has been seen at least once.
    pub fn sweep(&self, registry: &DeviceRegistry, now: DateTime<Utc>) -> Vec<(Addr64, Liveness)> {
        registry
            .iter()
            .filter_map(|device| {
                device
                    .last_seen_at
                    .map(|last_seen| (device.remote64, self.classify(last_seen, now)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Addr16;
    use crate::devices::Device;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_threshold_boundary() {
        let watchdog = Watchdog::default();
        assert_eq!(watchdog.classify(at(0), at(599)), Liveness::Online);
        assert_eq!(watchdog.classify(at(0), at(600)), Liveness::Offline);
        assert_eq!(watchdog.classify(at(10), at(0)), Liveness::Online);
    }

    #[test]
    fn test_sweep_skips_never_seen() {
        let mut registry = DeviceRegistry::from_devices([Device::new(Addr64::new(7))]);
        registry.observe(Addr64::new(1), Some(Addr16::new(0x0001)), at(0));
        registry.observe(Addr64::new(2), Some(Addr16::new(0x0002)), at(500));

        let sweep = Watchdog::default().sweep(&registry, at(700));
        assert_eq!(
            sweep,
            vec![
                (Addr64::new(1), Liveness::Offline),
                (Addr64::new(2), Liveness::Online),
            ]
        );
    }
}
