//! Radio transport abstraction.
//!
//! The provisioning core only talks to the radio through these two traits.
//! [`crate::ble::BtleplugTransport`] is the real implementation; tests use
//! an in-memory one.

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::TransportError;

/// Opaque local identifier of a peripheral, as reported by the OS stack
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discovered device that matched the product name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    pub id: PeripheralId,
    pub name: String,
}

impl PeripheralHandle {
    pub fn new(id: PeripheralId, name: String) -> Self {
        Self { id, name }
    }
}

/// One advertisement observed by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: PeripheralId,
    pub local_name: Option<String>,
}

/// Process-wide radio: scanning and opening links.
#[async_trait]
pub trait RadioTransport: Send + Sync + 'static {
    type Link: PeripheralLink;

    /// Starts an unfiltered, continuous scan.
    async fn start_scan(&self) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Everything seen since the scan started. May contain repeats.
    async fn advertisements(&self) -> Result<Vec<Advertisement>, TransportError>;

    /// Resolves once the link is established or has failed. If the caller
    /// drops the future first, a link that still comes up must be released.
    async fn connect(&self, id: &PeripheralId) -> Result<Self::Link, TransportError>;
}

/// An established link to one peripheral.
#[async_trait]
pub trait PeripheralLink: Send + Sync + 'static {
    async fn discover_services(&self) -> Result<(), TransportError>;

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, TransportError>;

    /// Write-with-response: resolves after the peripheral acknowledged.
    async fn write_with_response(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}
