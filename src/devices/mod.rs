// MIT License - Copyright (c) 2021 TJForc
// AlertMe XBee bridge

pub mod device;
pub mod registry;

pub use device::{AttributeRecord, Device};
pub use registry::{AddressIndex, DeviceRegistry, Observation};
