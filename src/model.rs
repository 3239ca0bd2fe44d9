//! Data handed to a provisioning attempt and exchanged with the backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WifiCredentialError;
use crate::identity::Identity;

/// Kind of sensing hardware on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorKind {
    Aht10 = 1,
    Scd4x = 2,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Aht10 => "aht10",
            SensorKind::Scd4x => "scd4x",
        }
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aht10" => Ok(SensorKind::Aht10),
            "scd4x" => Ok(SensorKind::Scd4x),
            other => Err(format!("unknown sensor kind '{}'", other)),
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend id of the place the sensor is installed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaceId(pub i32);

impl fmt::Display for PlaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wi-Fi network the sensor should join.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl WifiCredentials {
    pub const SSID_MAX: usize = 32;
    pub const PASSWORD_MIN: usize = 8;
    pub const PASSWORD_MAX: usize = 63;

    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// Input rules a front-end applies before starting an attempt.
    /// The provisioning core sends whatever it is given.
    pub fn check(&self) -> Result<(), WifiCredentialError> {
        let printable = |s: &str| s.bytes().all(|b| (0x20..=0x7e).contains(&b));

        if self.ssid.is_empty() {
            return Err(WifiCredentialError::SsidTooShort);
        }
        if self.ssid.len() > Self::SSID_MAX {
            return Err(WifiCredentialError::SsidTooLong);
        }
        if !printable(&self.ssid) {
            return Err(WifiCredentialError::SsidNotAscii);
        }
        if self.password.len() < Self::PASSWORD_MIN {
            return Err(WifiCredentialError::PasswordTooShort);
        }
        if self.password.len() > Self::PASSWORD_MAX {
            return Err(WifiCredentialError::PasswordTooLong);
        }
        if !printable(&self.password) {
            return Err(WifiCredentialError::PasswordNotAscii);
        }
        Ok(())
    }
}

// Keep the password out of logs
impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything an attempt needs besides the device itself.
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub account: Identity,
    pub place: PlaceId,
    pub sensor_kind: SensorKind,
    pub wifi: Option<WifiCredentials>,
}

/// Body of the backend registration call. Built once the device UUID is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorRegistration {
    #[serde(rename = "user_api_id")]
    pub account: Identity,
    #[serde(rename = "user_place_id")]
    pub place: PlaceId,
    #[serde(rename = "device_id")]
    pub device: Identity,
    pub sensor_kind: SensorKind,
}

impl SensorRegistration {
    pub fn new(request: &ProvisioningRequest, device: Identity) -> Self {
        Self {
            account: request.account,
            place: request.place,
            device,
            sensor_kind: request.sensor_kind,
        }
    }
}

/// Sensor identity issued by the backend for a registration.
///
/// Only registry implementations construct this, from a backend response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedSensorIdentity(Identity);

impl IssuedSensorIdentity {
    pub fn from_backend(identity: Identity) -> Self {
        Self(identity)
    }

    pub fn identity(&self) -> &Identity {
        &self.0
    }
}

impl fmt::Display for IssuedSensorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
