// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

//! Status file persistence.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::address::{Addr64, OwnIdentity};
use crate::devices::Device;
use crate::error::{BridgeError, Result};

/// Everything saved to the status file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(rename = "self", default)]
    pub own: OwnIdentity,
    #[serde(default)]
    pub nodes: BTreeMap<Addr64, Device>,
}

/// Somewhere to keep a [`StatusSnapshot`] between runs.
pub trait DeviceStore: Send + Sync + 'static {
    fn load(&self) -> Result<Option<StatusSnapshot>>;
    fn save(&self, snapshot: &StatusSnapshot) -> Result<()>;
}

/// Pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonStatusStore {
    path: PathBuf,
}

impl JsonStatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceStore for JsonStatusStore {
    /// A missing file is not an error; a corrupt one is.
    fn load(&self) -> Result<Option<StatusSnapshot>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No status file at {}, starting empty", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot = serde_json::from_str(&content).map_err(|e| BridgeError::Persistence {
            details: format!("{}: {}", self.path.display(), e),
        })?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &StatusSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot).map_err(|e| BridgeError::Persistence {
            details: e.to_string(),
        })?;
        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved status for {} device(s) to {}", snapshot.nodes.len(), self.path.display());
        Ok(())
    }
}

/// Save in the background. Failures are logged, never propagated.
pub fn save_detached<S: DeviceStore + ?Sized>(store: std::sync::Arc<S>, snapshot: StatusSnapshot) {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = store.save(&snapshot) {
            error!("Failed to save status: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Addr16;
    use crate::clusters::AttributeValue;
    use crate::devices::AttributeRecord;
    use chrono::{TimeZone, Utc};

    fn snapshot() -> StatusSnapshot {
        let remote64 = Addr64::new(0x000D_6F00_0273_95A2);
        let mut device = Device::new(remote64);
        device.remote16 = Some(Addr16::new(0x0B2C));
        device.model = Some("SmartPlug".into());
        device.last_seen_at = Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        device.attributes.insert(
            "switchState".into(),
            AttributeRecord {
                value: AttributeValue::Bool(true),
                last_seen_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            },
        );
        let mut own = OwnIdentity::new();
        own.apply_at_response("MY", &[0x00, 0x00]);
        StatusSnapshot {
            own,
            nodes: BTreeMap::from([(remote64, device)]),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStatusStore::new(dir.path().join("status.json"));
        assert_eq!(store.load().unwrap(), None);

        let saved = snapshot();
        store.save(&saved).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, saved);

        let raw = fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["self"]["addr16"], "0000");
        assert_eq!(json["nodes"]["000d6f00027395a2"]["remote16"], "0b2c");
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        fs::write(&path, "{ not json").unwrap();
        let err = JsonStatusStore::new(path).load().unwrap_err();
        assert!(matches!(err, BridgeError::Persistence { .. }));
    }
}
