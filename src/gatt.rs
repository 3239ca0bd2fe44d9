//! GATT layout of the sensor's configuration service.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Advertised local name of unprovisioned sensors
pub const PRODUCT_NAME: &str = "esp32-sensor";

pub const CFG_SERVICE_UUID: Uuid = Uuid::from_u128(0x4b80ba9d_64fd_4ffa_86fb_544e73d26ed1);
pub const DEVICE_UUID_CHAR_UUID: Uuid = Uuid::from_u128(0x333cad84_ceb5_4e18_bfcf_6147987c6733);
pub const SENSOR_API_ID_CHAR_UUID: Uuid = Uuid::from_u128(0x8c680060_22b7_45b8_b325_f7b1b102d80f);
pub const API_ACCOUNT_ID_CHAR_UUID: Uuid = Uuid::from_u128(0xe11ca181_20c9_4675_b6f3_3f9fb91d1dc1);
pub const WIFI_SSID_CHAR_UUID: Uuid = Uuid::from_u128(0x8c680061_22b7_45b8_b325_f7b1b102d80f);
pub const WIFI_PASS_CHAR_UUID: Uuid = Uuid::from_u128(0x8c680062_22b7_45b8_b325_f7b1b102d80f);

/// Service and characteristic UUIDs used during provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattProfile {
    pub service: Uuid,
    pub device_uuid: Uuid,
    pub sensor_api_id: Uuid,
    pub account_id: Uuid,
    pub wifi_ssid: Uuid,
    pub wifi_password: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: CFG_SERVICE_UUID,
            device_uuid: DEVICE_UUID_CHAR_UUID,
            sensor_api_id: SENSOR_API_ID_CHAR_UUID,
            account_id: API_ACCOUNT_ID_CHAR_UUID,
            wifi_ssid: WIFI_SSID_CHAR_UUID,
            wifi_password: WIFI_PASS_CHAR_UUID,
        }
    }
}

impl GattProfile {
    pub fn characteristic(&self, field: ProvisioningField) -> Uuid {
        match field {
            ProvisioningField::SensorApiId => self.sensor_api_id,
            ProvisioningField::AccountId => self.account_id,
            ProvisioningField::WifiSsid => self.wifi_ssid,
            ProvisioningField::WifiPassword => self.wifi_password,
        }
    }
}

/// Writable characteristics, in the order they are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisioningField {
    SensorApiId,
    AccountId,
    WifiSsid,
    WifiPassword,
}

impl fmt::Display for ProvisioningField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisioningField::SensorApiId => "sensor api id",
            ProvisioningField::AccountId => "account id",
            ProvisioningField::WifiSsid => "wifi ssid",
            ProvisioningField::WifiPassword => "wifi password",
        };
        f.write_str(name)
    }
}
