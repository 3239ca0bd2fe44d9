//! btleplug-backed radio transport.

use std::future::Future;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{Advertisement, PeripheralId, PeripheralLink, RadioTransport};

/// Radio transport on the first Bluetooth adapter of the host.
pub struct BtleplugTransport {
    adapter: Adapter,
}

impl BtleplugTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;

        let adapters = manager.adapters().await?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => log::info!("Using Bluetooth adapter {}", info),
            Err(e) => log::debug!("Could not query adapter info: {}", e),
        }

        Ok(Self { adapter })
    }

    async fn find_peripheral(&self, id: &PeripheralId) -> Result<Peripheral, TransportError> {
        let peripherals = self.adapter.peripherals().await?;
        peripherals
            .into_iter()
            .find(|p| p.id().to_string() == id.as_str())
            .ok_or_else(|| TransportError::PeripheralNotFound(id.to_string()))
    }
}

#[async_trait]
impl RadioTransport for BtleplugTransport {
    type Link = BtleplugLink;

    async fn start_scan(&self) -> Result<(), TransportError> {
        // No service filter: the firmware does not put its service UUID in the advertisement
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn advertisements(&self) -> Result<Vec<Advertisement>, TransportError> {
        let peripherals = self.adapter.peripherals().await?;

        let mut seen = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            // A peripheral can vanish between listing and querying
            let local_name = match peripheral.properties().await {
                Ok(Some(props)) => props.local_name,
                Ok(None) => None,
                Err(e) => {
                    log::trace!("Skipping {}: {}", peripheral.id(), e);
                    continue;
                }
            };
            seen.push(Advertisement {
                id: PeripheralId::new(peripheral.id().to_string()),
                local_name,
            });
        }

        Ok(seen)
    }

    async fn connect(&self, id: &PeripheralId) -> Result<BtleplugLink, TransportError> {
        let peripheral = self.find_peripheral(id).await?;
        if !peripheral.is_connected().await? {
            let connecting = peripheral.clone();
            let releasing = peripheral.clone();
            detached_connect(
                async move { connecting.connect().await.map_err(TransportError::from) },
                async move {
                    if let Err(e) = releasing.disconnect().await {
                        log::warn!("Failed to release late link to {}: {}", releasing.id(), e);
                    }
                },
            )
            .await?;
        }
        Ok(BtleplugLink { peripheral })
    }
}

/// Runs `connect` on its own task so it always finishes. If the caller gave
/// up waiting (timeout or cancel) and the link still came up, `release`
/// tears it down.
async fn detached_connect<C, R>(connect: C, release: R) -> Result<(), TransportError>
where
    C: Future<Output = Result<(), TransportError>> + Send + 'static,
    R: Future<Output = ()> + Send + 'static,
{
    let (sender, receiver) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let result = connect.await;
        if let Err(Ok(())) = sender.send(result) {
            log::info!("Link came up after the caller gave up, disconnecting");
            release.await;
        }
    });

    receiver
        .await
        .map_err(|_| TransportError::Ble("connect task ended unexpectedly".to_string()))?
}

/// Connected btleplug peripheral.
pub struct BtleplugLink {
    peripheral: Peripheral,
}

impl BtleplugLink {
    fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound {
                service,
                characteristic: uuid,
            })
    }
}

#[async_trait]
impl PeripheralLink for BtleplugLink {
    async fn discover_services(&self) -> Result<(), TransportError> {
        self.peripheral.discover_services().await?;
        log::debug!(
            "Discovered {} services on {}",
            self.peripheral.services().len(),
            self.peripheral.id()
        );
        Ok(())
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic(service, characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write_with_response(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic(service, characteristic)?;
        self.peripheral
            .write(&characteristic, value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_result_is_returned() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();

        let result = detached_connect(async { Ok::<(), TransportError>(()) }, async move {
            flag.store(true, Ordering::SeqCst);
        })
        .await;

        assert_eq!(result, Ok(()));
        assert!(!released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_connect_releases_nothing() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();

        let result = detached_connect(
            async { Err::<(), _>(TransportError::Ble("gatt 133".to_string())) },
            async move { flag.store(true, Ordering::SeqCst) },
        )
        .await;

        assert_eq!(result, Err(TransportError::Ble("gatt 133".to_string())));
        assert!(!released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_late_link_is_released_after_caller_gives_up() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();

        let slow_connect = async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok::<(), TransportError>(())
        };
        let waited = tokio::time::timeout(
            Duration::from_millis(5),
            detached_connect(slow_connect, async move { flag.store(true, Ordering::SeqCst) }),
        )
        .await;
        assert!(waited.is_err());

        for _ in 0..50 {
            if released.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(released.load(Ordering::SeqCst));
    }
}
