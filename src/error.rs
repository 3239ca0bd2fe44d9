//! # Error Types Module
//!
//! Centralized error handling for the provisioning core.
//! Every component gets its own closed error enum so callers can match on
//! the exact failure instead of inspecting strings.
//!
//! ## Error Types
//! - `IdentityError`: malformed 20-byte identifiers (hex text or wire bytes)
//! - `PermissionDenied`: a runtime radio permission was refused
//! - `ScanError`: discovery problems, logged and never fatal to a scan
//! - `TransportError`: failures reported by the radio transport
//! - `SessionError`: device session lifecycle and characteristic I/O
//! - `BackendError`: the sensor-registration call
//! - `AcquisitionError`: hardware UUID read + registration
//! - `WriteError`: a provisioning write, tagged with the field that failed
//! - `WifiCredentialError`: front-end input checks on Wi-Fi credentials
//! - `ConfigError`: configuration file I/O and parsing

use std::fmt;

use uuid::Uuid;

use crate::gatt::ProvisioningField;
use crate::permission::RadioPermission;
use crate::session::SessionState;

/// Errors produced by the identity codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Hex text did not have exactly 40 characters
    InvalidLength { expected: usize, found: usize },
    /// A character outside `[0-9a-fA-F]`
    InvalidHexDigit { index: usize, found: char },
    /// Wire payload did not have exactly 20 bytes
    InvalidWireLength { expected: usize, found: usize },
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::InvalidLength { expected, found } => {
                write!(f, "Identity must be {} hex characters, got {}", expected, found)
            }
            IdentityError::InvalidHexDigit { index, found } => {
                write!(f, "Invalid hex digit {:?} at position {}", found, index)
            }
            IdentityError::InvalidWireLength { expected, found } => {
                write!(f, "Identity must be {} bytes on the wire, got {}", expected, found)
            }
        }
    }
}

impl std::error::Error for IdentityError {}

/// A required radio permission was not granted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDenied {
    pub permission: RadioPermission,
}

impl fmt::Display for PermissionDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permission {} was not granted", self.permission)
    }
}

impl std::error::Error for PermissionDenied {}

/// Errors that can occur during device scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Scan could not be started on the radio
    StartFailed(String),
    /// Polling the radio for advertisements failed
    PollFailed(String),
    /// Scan stopped without the caller picking a device
    NoDeviceSelected,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::StartFailed(msg) => {
                write!(f, "Failed to start scan: {}", msg)
            }
            ScanError::PollFailed(msg) => {
                write!(f, "Scan poll failed: {}", msg)
            }
            ScanError::NoDeviceSelected => {
                write!(f, "No device was selected")
            }
        }
    }
}

impl std::error::Error for ScanError {}

/// Errors reported by the radio transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Bluetooth adapter not found or not available
    NoAdapter,
    /// The peripheral is no longer known to the adapter
    PeripheralNotFound(String),
    /// Discovery finished without the requested characteristic
    CharacteristicNotFound { service: Uuid, characteristic: Uuid },
    /// Error raised by the BLE stack
    Ble(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            TransportError::PeripheralNotFound(id) => {
                write!(f, "Peripheral {} not found", id)
            }
            TransportError::CharacteristicNotFound { service, characteristic } => {
                write!(f, "Characteristic {} not found in service {}", characteristic, service)
            }
            TransportError::Ble(msg) => write!(f, "Bluetooth error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        TransportError::Ble(e.to_string())
    }
}

/// Errors raised by a device session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session was closed while the operation was in flight
    Cancelled,
    /// The operation did not complete in time
    TimedOut { operation: &'static str },
    /// Operation attempted on a closed or failed session
    NotOpen { state: SessionState },
    /// The transport reported a failure
    Transport(TransportError),
}

impl SessionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Cancelled => write!(f, "Operation cancelled"),
            SessionError::TimedOut { operation } => write!(f, "{} timed out", operation),
            SessionError::NotOpen { state } => {
                write!(f, "Session is not open (state: {:?})", state)
            }
            SessionError::Transport(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e)
    }
}

/// Errors returned by the sensor-registration backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend rejected the request body (400, 413)
    Validation { status: u16 },
    /// Credentials were refused even after a renewal
    Unauthorized,
    /// 5xx from the backend
    Server { status: u16 },
    /// Any other non-success status
    UnexpectedStatus(u16),
    /// The request never produced a response
    Transport(String),
    /// The response could not be understood
    InvalidResponse(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Validation { status } => {
                write!(f, "Backend rejected the registration ({})", status)
            }
            BackendError::Unauthorized => write!(f, "Backend refused the session credentials"),
            BackendError::Server { status } => write!(f, "Backend server error ({})", status),
            BackendError::UnexpectedStatus(status) => {
                write!(f, "Unexpected backend status {}", status)
            }
            BackendError::Transport(msg) => write!(f, "Could not reach backend: {}", msg),
            BackendError::InvalidResponse(msg) => write!(f, "Invalid backend response: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

/// Why the device's hardware UUID could not be obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareUuidCause {
    Read(SessionError),
    Decode(IdentityError),
}

/// Errors from sensor identity acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// Reading or decoding the device UUID failed; nothing reached the backend
    HardwareUuidUnavailable(HardwareUuidCause),
    /// The registration call failed
    Backend(BackendError),
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::HardwareUuidUnavailable(HardwareUuidCause::Read(e)) => {
                write!(f, "Hardware UUID unavailable: read failed: {}", e)
            }
            AcquisitionError::HardwareUuidUnavailable(HardwareUuidCause::Decode(e)) => {
                write!(f, "Hardware UUID unavailable: {}", e)
            }
            AcquisitionError::Backend(e) => write!(f, "Sensor registration failed: {}", e),
        }
    }
}

impl std::error::Error for AcquisitionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AcquisitionError::HardwareUuidUnavailable(HardwareUuidCause::Read(e)) => Some(e),
            AcquisitionError::HardwareUuidUnavailable(HardwareUuidCause::Decode(e)) => Some(e),
            AcquisitionError::Backend(e) => Some(e),
        }
    }
}

/// A provisioning write failed; later writes were not attempted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    pub field: ProvisioningField,
    pub source: SessionError,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to write {}: {}", self.field, self.source)
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Wi-Fi input rejected by `WifiCredentials::check`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiCredentialError {
    SsidTooShort,
    SsidTooLong,
    SsidNotAscii,
    PasswordTooShort,
    PasswordTooLong,
    PasswordNotAscii,
}

impl fmt::Display for WifiCredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            WifiCredentialError::SsidTooShort => "Wifi SSID too short",
            WifiCredentialError::SsidTooLong => "Wifi SSID too long, max 32 characters",
            WifiCredentialError::SsidNotAscii => "Wifi SSID contains non ASCII characters",
            WifiCredentialError::PasswordTooShort => "Wifi password too short",
            WifiCredentialError::PasswordTooLong => "Wifi password too long, max 63 characters",
            WifiCredentialError::PasswordNotAscii => "Wifi password contains non ASCII characters",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for WifiCredentialError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::NoAdapter;
        assert!(err.to_string().contains("Bluetooth"));
    }

    #[test]
    fn test_config_error_chain() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_write_error_names_field() {
        let err = WriteError {
            field: ProvisioningField::AccountId,
            source: SessionError::Cancelled,
        };
        assert!(err.to_string().contains("account"));
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_acquisition_error_chain() {
        use std::error::Error;
        let err = AcquisitionError::HardwareUuidUnavailable(HardwareUuidCause::Read(
            SessionError::Transport(TransportError::Ble("gatt 133".to_string())),
        ));
        let source = err.source().expect("read failure should chain");
        assert!(source.to_string().contains("gatt 133"));
    }
}
