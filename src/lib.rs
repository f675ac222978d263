// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge
//
//! # alertme-xbee-bridge
//!
//! Protocol engine for AlertMe / Iris Zigbee devices behind a Digi XBee radio
//! in API mode: smart plugs, PIRs, contact sensors, buttons, keyfobs and keypads.
//!
//! Inbound frames are parsed, attributed to a device by its 64-bit address,
//! routed to a cluster decoder and turned into publications
//! (`stat/<remote64>/<attribute>`). Outbound messages are generated from a
//! named catalog. New devices are walked through the AlertMe join handshake
//! and a watchdog republishes each device's liveness.
//!
//! ## Quick Start
//!
//! ```no_run
//! use alertme_xbee_bridge::{BridgeConfig, BridgeEvent, MessageParams, XBeeBridge};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig::builder()
//!         .serial_port("/dev/ttyUSB0")
//!         .build();
//!
//!     let mut bridge = XBeeBridge::connect(config, None).await?;
//!
//!     let mut events = bridge.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let plug = "000d6f00027395a2".parse()?;
//!     bridge
//!         .send_message("switchStateRequest", MessageParams::switch_state("on"), plug)
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     bridge.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod bridge;
pub mod clusters;
pub mod config;
pub mod constants;
pub mod debounce;
pub mod devices;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod join;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod watchdog;

// Re-exports for convenience
pub use address::{Addr16, Addr64, OwnIdentity};
pub use bridge::XBeeBridge;
pub use clusters::{AttributeValue, Attributes, DecodeContext, DeviceModel};
pub use config::{ApiMode, BridgeConfig, BridgeConfigBuilder};
pub use devices::{AttributeRecord, Device, DeviceRegistry};
pub use engine::{Effect, Engine};
pub use error::{BridgeError, DecodeError, Result};
pub use event::{BridgeEvent, EventReceiver, Publication};
pub use protocol::{generate, DeviceMode, ExplicitMessage, MessageKind, MessageParams, SwitchRequest};
pub use store::{DeviceStore, JsonStatusStore, StatusSnapshot};
pub use transport::frame::{ExplicitRx, OutboundFrame, RawFrame};
pub use transport::{FrameWriter, XBeeCodec};
pub use watchdog::Liveness;
