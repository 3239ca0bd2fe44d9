//! # Provisioning Orchestrator
//!
//! Runs one provisioning attempt end to end:
//!
//! ```text
//! Idle -> RequestingPermission -> Scanning -> AwaitingSelection -> Connecting
//!      -> Discovering -> ReadingIdentity -> AcquiringIdentity -> Writing -> Done
//! ```
//!
//! Any state but `Done` can end in `Failed(stage)`. The scanner is stopped on
//! entry so repeated attempts never overlap scans, and the device session is
//! closed on every path once it has been opened.
//!
//! Progress is published as [`ProvisioningUpdate`]s on an optional channel.
//! The caller picks the device through a [`DeviceSelector`]; nothing is
//! selected automatically.

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::acquisition;
use crate::config::Config;
use crate::error::{AcquisitionError, HardwareUuidCause, PermissionDenied, ScanError, SessionError, WriteError};
use crate::gatt::GattProfile;
use crate::model::{IssuedSensorIdentity, ProvisioningRequest};
use crate::permission::PermissionGate;
use crate::registry::SensorRegistry;
use crate::scanner::PeripheralScanner;
use crate::session::{Cancellation, DeviceSession};
use crate::transport::{PeripheralHandle, PeripheralLink, RadioTransport};
use crate::writer;

/// Where an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Permission,
    Scan,
    /// Connecting or discovering services
    Connect,
    IdentityRead,
    IdentityAcquire,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Permission => "permission",
            Stage::Scan => "scan",
            Stage::Connect => "connect",
            Stage::IdentityRead => "identity read",
            Stage::IdentityAcquire => "identity acquisition",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    RequestingPermission,
    Scanning,
    AwaitingSelection,
    Connecting,
    Discovering,
    ReadingIdentity,
    AcquiringIdentity,
    Writing,
    Done,
    Failed(Stage),
}

/// The component error that ended an attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Permission(PermissionDenied),
    Scan(ScanError),
    Connect(SessionError),
    Discover(SessionError),
    Acquisition(AcquisitionError),
    Write(WriteError),
    /// Cancelled while no device operation was in flight
    Cancelled,
}

impl FailureReason {
    pub fn is_cancelled(&self) -> bool {
        match self {
            FailureReason::Cancelled => true,
            FailureReason::Connect(e) | FailureReason::Discover(e) => e.is_cancelled(),
            FailureReason::Acquisition(AcquisitionError::HardwareUuidUnavailable(
                HardwareUuidCause::Read(e),
            )) => e.is_cancelled(),
            FailureReason::Write(e) => e.source.is_cancelled(),
            _ => false,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Permission(e) => write!(f, "{}", e),
            FailureReason::Scan(e) => write!(f, "{}", e),
            FailureReason::Connect(e) => write!(f, "Connection failed: {}", e),
            FailureReason::Discover(e) => write!(f, "Service discovery failed: {}", e),
            FailureReason::Acquisition(e) => write!(f, "{}", e),
            FailureReason::Write(e) => write!(f, "{}", e),
            FailureReason::Cancelled => write!(f, "Provisioning cancelled"),
        }
    }
}

impl std::error::Error for FailureReason {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FailureReason::Permission(e) => Some(e),
            FailureReason::Scan(e) => Some(e),
            FailureReason::Connect(e) | FailureReason::Discover(e) => Some(e),
            FailureReason::Acquisition(e) => Some(e),
            FailureReason::Write(e) => Some(e),
            FailureReason::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningFailure {
    pub stage: Stage,
    pub reason: FailureReason,
}

impl ProvisioningFailure {
    fn new(stage: Stage, reason: FailureReason) -> Self {
        Self { stage, reason }
    }

    /// A write failure happens after the backend issued a sensor id, so
    /// the server may hold a record for a device that was never configured.
    pub fn may_leave_orphaned_record(&self) -> bool {
        self.stage == Stage::Write
    }
}

impl fmt::Display for ProvisioningFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Provisioning failed during {}: {}", self.stage, self.reason)
    }
}

impl std::error::Error for ProvisioningFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    Done(IssuedSensorIdentity),
    Failed(ProvisioningFailure),
}

impl ProvisioningOutcome {
    pub fn into_result(self) -> Result<IssuedSensorIdentity, ProvisioningFailure> {
        match self {
            ProvisioningOutcome::Done(issued) => Ok(issued),
            ProvisioningOutcome::Failed(failure) => Err(failure),
        }
    }
}

/// Progress events for a front-end
#[derive(Debug, Clone)]
pub enum ProvisioningUpdate {
    State(AttemptState),
    Discovered(PeripheralHandle),
}

/// Devices reported by the running scan, in discovery order.
pub struct DiscoveryFeed {
    receiver: UnboundedReceiver<PeripheralHandle>,
    seen: Vec<PeripheralHandle>,
}

impl DiscoveryFeed {
    fn new(receiver: UnboundedReceiver<PeripheralHandle>) -> Self {
        Self {
            receiver,
            seen: Vec::new(),
        }
    }

    /// Waits for the next newly discovered device. `None` once the scan
    /// has ended.
    pub async fn next(&mut self) -> Option<PeripheralHandle> {
        let handle = self.receiver.recv().await?;
        self.seen.push(handle.clone());
        Some(handle)
    }

    /// Everything discovered so far, including devices not yet taken
    /// through [`next`](Self::next).
    pub fn candidates(&mut self) -> &[PeripheralHandle] {
        while let Ok(handle) = self.receiver.try_recv() {
            self.seen.push(handle);
        }
        &self.seen
    }
}

/// Lets the caller pick exactly one discovered device.
#[async_trait]
pub trait DeviceSelector: Send {
    /// `None` abandons the attempt.
    async fn select(&mut self, feed: &mut DiscoveryFeed) -> Option<PeripheralHandle>;
}

pub struct Provisioner<T: RadioTransport, R, G> {
    transport: Arc<T>,
    scanner: PeripheralScanner<T>,
    registry: R,
    gate: G,
    gatt: GattProfile,
    timeout: Duration,
    updates: Option<Sender<ProvisioningUpdate>>,
}

impl<T, R, G> Provisioner<T, R, G>
where
    T: RadioTransport,
    R: SensorRegistry,
    G: PermissionGate,
{
    pub fn new(transport: Arc<T>, registry: R, gate: G, config: &Config) -> Self {
        let scanner = PeripheralScanner::new(
            transport.clone(),
            config.product_name.clone(),
            config.scan_poll_interval(),
        );
        Self {
            transport,
            scanner,
            registry,
            gate,
            gatt: config.gatt.clone(),
            timeout: config.operation_timeout(),
            updates: None,
        }
    }

    pub fn with_updates(mut self, sender: Sender<ProvisioningUpdate>) -> Self {
        self.updates = Some(sender);
        self
    }

    pub fn scanner(&self) -> &PeripheralScanner<T> {
        &self.scanner
    }

    /// Runs one attempt. Never panics on device or backend errors; every
    /// failure comes back as [`ProvisioningOutcome::Failed`].
    pub async fn run<S>(
        &self,
        request: &ProvisioningRequest,
        selector: &mut S,
        cancel: Cancellation,
    ) -> ProvisioningOutcome
    where
        S: DeviceSelector + ?Sized,
    {
        self.publish(ProvisioningUpdate::State(AttemptState::Idle));
        // A scan from an earlier attempt may still be running
        self.scanner.stop().await;

        let result = self.attempt(request, selector, &cancel).await;

        if self.scanner.is_scanning() {
            self.scanner.stop().await;
        }

        match result {
            Ok(issued) => {
                log::info!("Provisioning done, sensor id {}", issued);
                self.enter(AttemptState::Done);
                ProvisioningOutcome::Done(issued)
            }
            Err(failure) => {
                log::error!("{}", failure);
                if failure.may_leave_orphaned_record() {
                    log::warn!("Backend may hold a sensor record for an unconfigured device");
                }
                self.enter(AttemptState::Failed(failure.stage));
                ProvisioningOutcome::Failed(failure)
            }
        }
    }

    async fn attempt<S>(
        &self,
        request: &ProvisioningRequest,
        selector: &mut S,
        cancel: &Cancellation,
    ) -> Result<IssuedSensorIdentity, ProvisioningFailure>
    where
        S: DeviceSelector + ?Sized,
    {
        self.enter(AttemptState::RequestingPermission);
        if cancel.is_cancelled() {
            return Err(ProvisioningFailure::new(Stage::Permission, FailureReason::Cancelled));
        }
        self.gate
            .ensure_permissions()
            .await
            .map_err(|e| ProvisioningFailure::new(Stage::Permission, FailureReason::Permission(e)))?;

        self.enter(AttemptState::Scanning);
        let (sender, receiver) = unbounded_channel();
        let updates = self.updates.clone();
        self.scanner
            .start(move |handle| {
                if let Some(updates) = &updates {
                    if updates
                        .send(ProvisioningUpdate::Discovered(handle.clone()))
                        .is_err()
                    {
                        log::debug!("Update receiver gone, not reporting {}", handle.id);
                    }
                }
                if let Err(e) = sender.send(handle) {
                    log::debug!("Discovery feed closed, dropping {}", e.0.id);
                }
            })
            .await
            .map_err(|e| ProvisioningFailure::new(Stage::Scan, FailureReason::Scan(e)))?;

        self.enter(AttemptState::AwaitingSelection);
        let mut feed = DiscoveryFeed::new(receiver);
        let selected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProvisioningFailure::new(Stage::Scan, FailureReason::Cancelled)),
            selected = selector.select(&mut feed) => selected.ok_or_else(|| {
                ProvisioningFailure::new(Stage::Scan, FailureReason::Scan(ScanError::NoDeviceSelected))
            }),
        };
        let peripheral = selected?;
        log::info!("Selected {} ({})", peripheral.name, peripheral.id);

        self.enter(AttemptState::Connecting);
        let mut session =
            DeviceSession::connect(self.transport.as_ref(), &peripheral, cancel.clone(), self.timeout)
                .await
                .map_err(|e| ProvisioningFailure::new(Stage::Connect, FailureReason::Connect(e)))?;

        let result = self.provision(&mut session, request, cancel).await;
        session.close().await;
        result
    }

    async fn provision<L: PeripheralLink>(
        &self,
        session: &mut DeviceSession<L>,
        request: &ProvisioningRequest,
        cancel: &Cancellation,
    ) -> Result<IssuedSensorIdentity, ProvisioningFailure> {
        self.enter(AttemptState::Discovering);
        session
            .discover_all()
            .await
            .map_err(|e| ProvisioningFailure::new(Stage::Connect, FailureReason::Discover(e)))?;

        // Connected and discovered; the scan has served its purpose
        self.scanner.stop().await;

        self.enter(AttemptState::ReadingIdentity);
        let device = acquisition::read_device_identity(session, &self.gatt)
            .await
            .map_err(|e| ProvisioningFailure::new(Stage::IdentityRead, FailureReason::Acquisition(e)))?;

        self.enter(AttemptState::AcquiringIdentity);
        let issued = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProvisioningFailure::new(Stage::IdentityAcquire, FailureReason::Cancelled)),
            issued = acquisition::register(&self.registry, request, device) => issued.map_err(|e| {
                ProvisioningFailure::new(Stage::IdentityAcquire, FailureReason::Acquisition(e))
            }),
        }?;

        self.enter(AttemptState::Writing);
        writer::write(
            session,
            &self.gatt,
            &issued,
            &request.account,
            request.wifi.as_ref(),
        )
        .await
        .map_err(|e| ProvisioningFailure::new(Stage::Write, FailureReason::Write(e)))?;

        Ok(issued)
    }

    fn enter(&self, state: AttemptState) {
        log::debug!("Provisioning: {:?}", state);
        self.publish(ProvisioningUpdate::State(state));
    }

    fn publish(&self, update: ProvisioningUpdate) {
        if let Some(updates) = &self.updates {
            // A front-end that stopped listening does not stop the attempt
            if let Err(e) = updates.send(update) {
                log::debug!("Update receiver gone, dropping {:?}", e.0);
            }
        }
    }
}
