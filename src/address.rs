// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Stable 64-bit hardware address of a Zigbee node. The durable device identity.
///
/// Displays and parses as 16 lowercase hex digits (`000d6f000354cbad`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Addr64(u64);

impl Addr64 {
    /// All-ones broadcast address. Never a valid device identity.
    pub const BROADCAST: Addr64 = Addr64(u64::MAX);
    /// Destination for network-wide transmissions.
    pub const BROADCAST_TX: Addr64 = Addr64(0xFFFF);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for Addr64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Addr64 {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 16 {
            return Err(BridgeError::InvalidAddress { value: s.to_string() });
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| BridgeError::InvalidAddress { value: s.to_string() })
    }
}

impl TryFrom<String> for Addr64 {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Addr64> for String {
    fn from(addr: Addr64) -> Self {
        addr.to_string()
    }
}

/// Volatile 16-bit network address. May change whenever a device rejoins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Addr16(u16);

impl Addr16 {
    /// "Address unknown" marker used by the radio.
    pub const UNKNOWN: Addr16 = Addr16(0xFFFE);
    /// Broadcast to all routers and the coordinator.
    pub const BROADCAST_ROUTERS: Addr16 = Addr16(0xFFFC);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }

    pub fn to_be_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Wire order used inside ZDP payloads.
    pub fn to_le_bytes(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Addr16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl FromStr for Addr16 {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 4 {
            return Err(BridgeError::InvalidAddress { value: s.to_string() });
        }
        u16::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| BridgeError::InvalidAddress { value: s.to_string() })
    }
}

impl TryFrom<String> for Addr16 {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Addr16> for String {
    fn from(addr: Addr16) -> Self {
        addr.to_string()
    }
}

/// The local radio's own addresses, learned from AT command responses.
///
/// The 64-bit address is split across `SH` (high word) and `SL` (low word);
/// it becomes known once both halves have arrived, in either order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnIdentity {
    pub addr16: Option<Addr16>,
    #[serde(skip)]
    serial_high: Option<[u8; 4]>,
    #[serde(skip)]
    serial_low: Option<[u8; 4]>,
    pub addr64: Option<Addr64>,
}

impl OwnIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an AT command response. Returns true if any address changed.
    ///
    /// Responses for other commands, or with the wrong data length, are ignored.
    pub fn apply_at_response(&mut self, command: &str, data: &[u8]) -> bool {
        let before = (self.addr16, self.addr64);
        match command {
            "MY" => {
                if let Ok(bytes) = <[u8; 2]>::try_from(data) {
                    self.addr16 = Some(Addr16::from_be_bytes(bytes));
                }
            }
            "SH" => {
                if let Ok(bytes) = <[u8; 4]>::try_from(data) {
                    self.serial_high = Some(bytes);
                }
            }
            "SL" => {
                if let Ok(bytes) = <[u8; 4]>::try_from(data) {
                    self.serial_low = Some(bytes);
                }
            }
            _ => {}
        }
        if let (Some(high), Some(low)) = (self.serial_high, self.serial_low) {
            let mut bytes = [0u8; 8];
            bytes[..4].copy_from_slice(&high);
            bytes[4..].copy_from_slice(&low);
            self.addr64 = Some(Addr64::from_be_bytes(bytes));
        }
        before != (self.addr16, self.addr64)
    }

    /// Whether a frame from `remote64` was sent by this radio.
    pub fn is_self(&self, remote64: Addr64) -> bool {
        self.addr64 == Some(remote64)
    }
}
