//! # Device Session
//!
//! Owns one connection to one peripheral for the duration of a
//! provisioning attempt.
//!
//! ```text
//! Idle -> Connecting -> Connected -> Discovering -> Ready -> Closed
//!                  \__________\___________\__________\-> Failed
//! ```
//!
//! Characteristic I/O is only legal in `Ready`. Issuing it earlier is a bug
//! in the caller and panics. A [`Cancellation`] shared with the session
//! aborts whatever operation is in flight with [`SessionError::Cancelled`].
//! Every session must be [`DeviceSession::close`]d; dropping an open
//! session disconnects in the background and logs a warning.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{SessionError, TransportError};
use crate::transport::{PeripheralHandle, PeripheralLink, RadioTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Discovering,
    Ready,
    Closed,
    Failed,
}

/// Cloneable cancel signal for one attempt.
#[derive(Debug, Clone)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        log::debug!("Cancellation requested");
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in self, so this only returns on cancel
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DeviceSession<L: PeripheralLink> {
    peripheral: PeripheralHandle,
    link: Option<Arc<L>>,
    state: SessionState,
    cancel: Cancellation,
    timeout: Duration,
}

impl<L: PeripheralLink> DeviceSession<L> {
    /// Connects to `peripheral`. The returned session is `Connected`;
    /// call [`discover_all`](Self::discover_all) before any I/O.
    pub async fn connect<T>(
        transport: &T,
        peripheral: &PeripheralHandle,
        cancel: Cancellation,
        timeout: Duration,
    ) -> Result<Self, SessionError>
    where
        T: RadioTransport<Link = L>,
    {
        let mut state = SessionState::Idle;
        log::info!("Connecting to {} ({})", peripheral.name, peripheral.id);
        transition(&mut state, SessionState::Connecting);

        // Abandoning this future on cancel or timeout is safe only because the
        // transport releases a link that comes up afterwards
        let link = guarded(&cancel, timeout, "connect", transport.connect(&peripheral.id)).await;
        let link = match link {
            Ok(link) => link,
            Err(e) => {
                transition(&mut state, SessionState::Failed);
                log::error!("Connection to {} failed: {}", peripheral.id, e);
                return Err(e);
            }
        };
        transition(&mut state, SessionState::Connected);

        Ok(Self {
            peripheral: peripheral.clone(),
            link: Some(Arc::new(link)),
            state,
            cancel,
            timeout,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peripheral(&self) -> &PeripheralHandle {
        &self.peripheral
    }

    /// Enumerates services and characteristics; moves to `Ready` on success.
    pub async fn discover_all(&mut self) -> Result<(), SessionError> {
        let link = self.open_link()?;
        self.set_state(SessionState::Discovering);
        let result = self.run("discover", link.discover_services()).await;
        if result.is_ok() {
            self.set_state(SessionState::Ready);
        }
        result
    }

    /// Single read request; no retry.
    pub async fn read_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, SessionError> {
        let link = self.ready_link("read_characteristic")?;
        log::debug!("Reading {} from {}", characteristic, self.peripheral.id);
        self.run("read", link.read(service, characteristic)).await
    }

    /// Write with response; returns once the peripheral acknowledged. No retry.
    pub async fn write_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), SessionError> {
        let link = self.ready_link("write_characteristic")?;
        self.run("write", link.write_with_response(service, characteristic, value))
            .await
    }

    /// Disconnects. Safe to call any number of times.
    pub async fn close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        match tokio::time::timeout(self.timeout, link.disconnect()).await {
            Ok(Ok(())) => log::info!("Disconnected from {}", self.peripheral.id),
            Ok(Err(e)) => log::warn!("Disconnect from {} failed: {}", self.peripheral.id, e),
            Err(_) => log::warn!("Disconnect from {} timed out", self.peripheral.id),
        }
        self.set_state(SessionState::Closed);
    }

    fn open_link(&self) -> Result<Arc<L>, SessionError> {
        match (&self.link, self.state) {
            (Some(link), SessionState::Connected | SessionState::Ready) => Ok(link.clone()),
            (_, state) => Err(SessionError::NotOpen { state }),
        }
    }

    fn ready_link(&self, operation: &str) -> Result<Arc<L>, SessionError> {
        match (&self.link, self.state) {
            (Some(link), SessionState::Ready) => Ok(link.clone()),
            (_, state @ (SessionState::Closed | SessionState::Failed)) => {
                Err(SessionError::NotOpen { state })
            }
            (_, state) => panic!(
                "{} on {} in state {:?}: discover_all must succeed first",
                operation, self.peripheral.id, state
            ),
        }
    }

    async fn run<F, R>(&mut self, operation: &'static str, op: F) -> Result<R, SessionError>
    where
        F: Future<Output = Result<R, TransportError>>,
    {
        let result = guarded(&self.cancel, self.timeout, operation, op).await;
        if let Err(e) = &result {
            log::warn!("{} on {} failed: {}", operation, self.peripheral.id, e);
            self.set_state(SessionState::Failed);
        }
        result
    }

    fn set_state(&mut self, next: SessionState) {
        transition(&mut self.state, next);
    }
}

impl<L: PeripheralLink> Drop for DeviceSession<L> {
    fn drop(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        log::warn!("Session for {} dropped while open", self.peripheral.id);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let id = self.peripheral.id.clone();
            runtime.spawn(async move {
                if let Err(e) = link.disconnect().await {
                    log::warn!("Background disconnect from {} failed: {}", id, e);
                }
            });
        }
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    log::debug!("Session: {:?} -> {:?}", state, next);
    *state = next;
}

async fn guarded<F, R>(
    cancel: &Cancellation,
    timeout: Duration,
    operation: &'static str,
    op: F,
) -> Result<R, SessionError>
where
    F: Future<Output = Result<R, TransportError>>,
{
    if cancel.is_cancelled() {
        return Err(SessionError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        result = tokio::time::timeout(timeout, op) => match result {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::TimedOut { operation }),
        },
    }
}
