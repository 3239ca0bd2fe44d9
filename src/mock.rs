//! In-memory radio, backend and permission doubles that record every call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{BackendError, PermissionDenied, TransportError};
use crate::model::{IssuedSensorIdentity, SensorRegistration};
use crate::permission::{PermissionGate, RadioPermission};
use crate::provisioner::{DeviceSelector, DiscoveryFeed};
use crate::registry::SensorRegistry;
use crate::transport::{
    Advertisement, PeripheralHandle, PeripheralId, PeripheralLink, RadioTransport,
};

pub struct MockTransport {
    advertisements: Mutex<Vec<Advertisement>>,
    pub start_scans: AtomicUsize,
    pub stop_scans: AtomicUsize,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    /// Number of upcoming polls that fail
    pub failing_polls: AtomicUsize,
    pub polls: AtomicUsize,
    pub connect_error: Mutex<Option<TransportError>>,
    pub hang_connect: AtomicBool,
    pub connects: AtomicUsize,
    pub link: Arc<LinkState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            advertisements: Mutex::new(Vec::new()),
            start_scans: AtomicUsize::new(0),
            stop_scans: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            failing_polls: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            connect_error: Mutex::new(None),
            hang_connect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            link: Arc::new(LinkState::default()),
        }
    }

    pub fn advertise(&self, id: &str, name: Option<&str>) {
        self.advertisements.lock().unwrap().push(Advertisement {
            id: PeripheralId::new(id),
            local_name: name.map(str::to_string),
        });
    }
}

#[async_trait]
impl RadioTransport for MockTransport {
    type Link = MockLink;

    async fn start_scan(&self) -> Result<(), TransportError> {
        self.start_scans.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TransportError::Ble("scan already in progress".to_string()));
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.stop_scans.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(TransportError::Ble("no scan in progress".to_string()));
        }
        Ok(())
    }

    async fn advertisements(&self) -> Result<Vec<Advertisement>, TransportError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_polls.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_polls.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Ble("adapter busy".to_string()));
        }
        Ok(self.advertisements.lock().unwrap().clone())
    }

    async fn connect(&self, _id: &PeripheralId) -> Result<MockLink, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.hang_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(e) = self.connect_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(MockLink {
            state: self.link.clone(),
        })
    }
}

#[derive(Default)]
pub struct LinkState {
    reads: Mutex<HashMap<Uuid, Vec<u8>>>,
    write_failures: Mutex<HashMap<Uuid, TransportError>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    pub discover_error: Mutex<Option<TransportError>>,
    pub hang_discover: AtomicBool,
    pub hang_reads: AtomicBool,
    pub hang_writes: AtomicBool,
    pub discovers: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl LinkState {
    pub fn set_read(&self, characteristic: Uuid, value: Vec<u8>) {
        self.reads.lock().unwrap().insert(characteristic, value);
    }

    pub fn fail_write(&self, characteristic: Uuid, error: TransportError) {
        self.write_failures
            .lock()
            .unwrap()
            .insert(characteristic, error);
    }

    /// Every attempted write, including failed ones
    pub fn written(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }
}

pub struct MockLink {
    state: Arc<LinkState>,
}

#[async_trait]
impl PeripheralLink for MockLink {
    async fn discover_services(&self) -> Result<(), TransportError> {
        self.state.discovers.fetch_add(1, Ordering::SeqCst);
        if self.state.hang_discover.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        match self.state.discover_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        if self.state.hang_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.state
            .reads
            .lock()
            .unwrap()
            .get(&characteristic)
            .cloned()
            .ok_or(TransportError::CharacteristicNotFound {
                service,
                characteristic,
            })
    }

    async fn write_with_response(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        if self.state.hang_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.state
            .writes
            .lock()
            .unwrap()
            .push((characteristic, value.to_vec()));
        match self.state.write_failures.lock().unwrap().get(&characteristic) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockRegistry {
    response: Result<IssuedSensorIdentity, BackendError>,
    pub calls: Mutex<Vec<SensorRegistration>>,
}

impl MockRegistry {
    pub fn issuing(hex_id: &str) -> Self {
        let identity = hex_id.parse().expect("valid test identity");
        Self {
            response: Ok(IssuedSensorIdentity::from_backend(identity)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: BackendError) -> Self {
        Self {
            response: Err(error),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SensorRegistry for MockRegistry {
    async fn register_sensor(
        &self,
        registration: &SensorRegistration,
    ) -> Result<IssuedSensorIdentity, BackendError> {
        self.calls.lock().unwrap().push(registration.clone());
        self.response.clone()
    }
}

pub struct MockGate {
    pub deny: Option<RadioPermission>,
}

#[async_trait]
impl PermissionGate for MockGate {
    async fn ensure_permissions(&self) -> Result<(), PermissionDenied> {
        match self.deny {
            Some(permission) => Err(PermissionDenied { permission }),
            None => Ok(()),
        }
    }
}

/// Takes the first device the scanner reports
pub struct FirstDiscovered;

#[async_trait]
impl DeviceSelector for FirstDiscovered {
    async fn select(&mut self, feed: &mut DiscoveryFeed) -> Option<PeripheralHandle> {
        feed.next().await
    }
}
