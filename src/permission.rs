//! # Radio Permission Gate
//!
//! Some platforms (Android) require runtime grants before the app may scan
//! for or connect to BLE peripherals. Desktop stacks driven by btleplug have
//! no such gate, so [`AlwaysGranted`] is what the CLI uses.

use std::fmt;

use async_trait::async_trait;

use crate::error::PermissionDenied;

/// Runtime permissions involved in BLE access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioPermission {
    BluetoothScan,
    BluetoothConnect,
    FineLocation,
}

impl fmt::Display for RadioPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RadioPermission::BluetoothScan => "BLUETOOTH_SCAN",
            RadioPermission::BluetoothConnect => "BLUETOOTH_CONNECT",
            RadioPermission::FineLocation => "ACCESS_FINE_LOCATION",
        };
        f.write_str(name)
    }
}

/// Platform family, which decides the set of grants to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android { api_level: u32 },
    Other,
}

impl Platform {
    /// Grants to request, in order.
    ///
    /// Android below API 31 has no dedicated Bluetooth permissions and uses
    /// location as the proxy for scanning.
    pub fn required_permissions(&self) -> Vec<RadioPermission> {
        match self {
            Platform::Android { api_level } if *api_level < 31 => {
                vec![RadioPermission::FineLocation]
            }
            Platform::Android { .. } => vec![
                RadioPermission::BluetoothScan,
                RadioPermission::BluetoothConnect,
                RadioPermission::FineLocation,
            ],
            Platform::Other => Vec::new(),
        }
    }
}

/// Ensures radio access has been granted before any scan or connection.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// `Ok` only if every required grant succeeded.
    async fn ensure_permissions(&self) -> Result<(), PermissionDenied>;
}

/// Shows the native prompt for one permission and reports the answer.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    async fn request(&self, permission: RadioPermission) -> bool;
}

/// Gate for platforms without runtime grants
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGate for AlwaysGranted {
    async fn ensure_permissions(&self) -> Result<(), PermissionDenied> {
        Ok(())
    }
}

/// Gate that walks the platform's permission list through a prompt.
pub struct RuntimePermissionGate<P> {
    platform: Platform,
    prompt: P,
}

impl<P: PermissionPrompt> RuntimePermissionGate<P> {
    pub fn new(platform: Platform, prompt: P) -> Self {
        Self { platform, prompt }
    }
}

#[async_trait]
impl<P: PermissionPrompt> PermissionGate for RuntimePermissionGate<P> {
    async fn ensure_permissions(&self) -> Result<(), PermissionDenied> {
        let mut denied = None;
        // Keep prompting after a refusal; the first denial is reported
        for permission in self.platform.required_permissions() {
            let granted = self.prompt.request(permission).await;
            log::debug!("Permission {}: granted={}", permission, granted);
            if !granted && denied.is_none() {
                denied = Some(permission);
            }
        }

        match denied {
            Some(permission) => {
                log::warn!("Radio permission {} denied", permission);
                Err(PermissionDenied { permission })
            }
            None => Ok(()),
        }
    }
}
