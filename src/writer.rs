//! # Provisioning Writer
//!
//! Pushes the issued sensor id, the account id and, optionally, Wi-Fi
//! credentials to the device, in that order. Identities go out in their
//! 20-byte wire form, Wi-Fi fields as raw ASCII.
//!
//! The first failed write stops the sequence. Nothing already written is
//! undone; the device has no way to clear a characteristic.

use crate::error::WriteError;
use crate::gatt::{GattProfile, ProvisioningField};
use crate::identity::Identity;
use crate::model::{IssuedSensorIdentity, WifiCredentials};
use crate::session::DeviceSession;
use crate::transport::PeripheralLink;

/// Fields and payloads in write order
fn plan<'a>(
    issued: &'a IssuedSensorIdentity,
    account: &'a Identity,
    wifi: Option<&'a WifiCredentials>,
) -> Vec<(ProvisioningField, &'a [u8])> {
    let mut fields = vec![
        (ProvisioningField::SensorApiId, &issued.identity().as_bytes()[..]),
        (ProvisioningField::AccountId, &account.as_bytes()[..]),
    ];
    if let Some(wifi) = wifi {
        fields.push((ProvisioningField::WifiSsid, wifi.ssid.as_bytes()));
        fields.push((ProvisioningField::WifiPassword, wifi.password.as_bytes()));
    }
    fields
}

pub async fn write<L: PeripheralLink>(
    session: &mut DeviceSession<L>,
    gatt: &GattProfile,
    issued: &IssuedSensorIdentity,
    account: &Identity,
    wifi: Option<&WifiCredentials>,
) -> Result<(), WriteError> {
    for (field, payload) in plan(issued, account, wifi) {
        log::debug!("Writing {} ({} bytes)", field, payload.len());
        session
            .write_characteristic(gatt.service, gatt.characteristic(field), payload)
            .await
            .map_err(|source| {
                log::error!("Write of {} failed, remaining fields skipped", field);
                WriteError { field, source }
            })?;
    }

    log::info!("Provisioned {}", session.peripheral().id);
    Ok(())
}
