//! Provisioning core for BLE environmental sensors.
//!
//! A provisioning attempt finds an unconfigured sensor over BLE, reads its
//! hardware UUID, registers it with the backend, and writes the issued
//! sensor id, the account id and optional Wi-Fi credentials back to the
//! device. [`provisioner::Provisioner`] drives the whole sequence.

pub mod acquisition;
pub mod ble;
pub mod config;
pub mod error;
pub mod gatt;
pub mod identity;
pub mod model;
pub mod permission;
pub mod provisioner;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod transport;
pub mod writer;

#[cfg(test)]
mod mock;

pub use config::Config;
pub use identity::Identity;
pub use model::{IssuedSensorIdentity, PlaceId, ProvisioningRequest, SensorKind, WifiCredentials};
pub use provisioner::{
    DeviceSelector, DiscoveryFeed, ProvisioningFailure, ProvisioningOutcome, ProvisioningUpdate,
    Provisioner, Stage,
};
pub use session::Cancellation;
