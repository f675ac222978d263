// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use std::collections::BTreeMap;

use crate::address::{Addr64, OwnIdentity};
use crate::clusters::AttributeValue;
use crate::watchdog::Liveness;

/// A value for the publication sink: (topic, value, retain).
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub value: AttributeValue,
    pub retain: bool,
}

impl Publication {
    /// `stat/<remote64>/<name>`
    pub fn stat(remote64: Addr64, name: &str, value: impl Into<AttributeValue>, retain: bool) -> Self {
        Self {
            topic: format!("stat/{remote64}/{name}"),
            value: value.into(),
            retain,
        }
    }

    /// `tele/<remote64>/LWT`, always retained.
    pub fn liveness(remote64: Addr64, liveness: Liveness) -> Self {
        Self {
            topic: format!("tele/{remote64}/LWT"),
            value: liveness.as_str().into(),
            retain: true,
        }
    }
}

/// All events that can be emitted by the bridge.
///
/// Users subscribe via `bridge.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<BridgeEvent>`.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Serial port opened, engine running
    Connected,
    /// Transport closed
    Disconnected,
    /// Decoded value for the publication sink
    Publication(Publication),
    /// First frame from a device never seen before
    DeviceDiscovered { remote64: Addr64 },
    /// Version info received, join handshake complete
    DeviceJoined {
        remote64: Addr64,
        model: Option<String>,
    },
    /// Keypad PIN entry or action key
    Keypad {
        remote64: Addr64,
        entry: BTreeMap<String, AttributeValue>,
    },
    /// Own radio addresses changed
    OwnIdentity(OwnIdentity),
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<BridgeEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<BridgeEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let pir = Addr64::new(0x000D_6F00_0354_CBAD);
        let publication = Publication::stat(pir, "motionState", true, true);
        assert_eq!(publication.topic, "stat/000d6f000354cbad/motionState");
        assert_eq!(publication.value, AttributeValue::Bool(true));

        let lwt = Publication::liveness(pir, Liveness::Offline);
        assert_eq!(lwt.topic, "tele/000d6f000354cbad/LWT");
        assert_eq!(lwt.value, AttributeValue::from("offline"));
        assert!(lwt.retain);
    }
}
