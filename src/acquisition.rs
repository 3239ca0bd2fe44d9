//! # Sensor Identity Acquisition
//!
//! Reads the device's hardware UUID over the session, then registers it with
//! the backend to obtain the sensor id that will be written back.
//!
//! Acquisition is the barrier before any provisioning write: nothing is
//! written to the device unless [`acquire`] returned `Ok`, so the backend
//! always knows about a sensor before the sensor learns its credentials.

use crate::error::{AcquisitionError, HardwareUuidCause};
use crate::gatt::GattProfile;
use crate::identity::Identity;
use crate::model::{IssuedSensorIdentity, ProvisioningRequest, SensorRegistration};
use crate::registry::SensorRegistry;
use crate::session::DeviceSession;
use crate::transport::PeripheralLink;

/// Step 1: read and decode the hardware UUID characteristic.
pub async fn read_device_identity<L: PeripheralLink>(
    session: &mut DeviceSession<L>,
    gatt: &GattProfile,
) -> Result<Identity, AcquisitionError> {
    let payload = session
        .read_characteristic(gatt.service, gatt.device_uuid)
        .await
        .map_err(|e| AcquisitionError::HardwareUuidUnavailable(HardwareUuidCause::Read(e)))?;

    let device = Identity::from_wire(&payload)
        .map_err(|e| AcquisitionError::HardwareUuidUnavailable(HardwareUuidCause::Decode(e)))?;

    log::info!("Device {} reports hardware UUID {}", session.peripheral().id, device);
    Ok(device)
}

/// Step 2: one fallible registration call.
pub async fn register<R: SensorRegistry + ?Sized>(
    registry: &R,
    request: &ProvisioningRequest,
    device: Identity,
) -> Result<IssuedSensorIdentity, AcquisitionError> {
    let registration = SensorRegistration::new(request, device);
    let issued = registry
        .register_sensor(&registration)
        .await
        .map_err(AcquisitionError::Backend)?;

    log::info!("Backend issued sensor id {}", issued);
    Ok(issued)
}

pub async fn acquire<L, R>(
    session: &mut DeviceSession<L>,
    gatt: &GattProfile,
    registry: &R,
    request: &ProvisioningRequest,
) -> Result<IssuedSensorIdentity, AcquisitionError>
where
    L: PeripheralLink,
    R: SensorRegistry + ?Sized,
{
    let device = read_device_identity(session, gatt).await?;
    register(registry, request, device).await
}
