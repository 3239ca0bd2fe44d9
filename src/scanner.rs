//! # Peripheral Scanner
//!
//! Continuous, unfiltered scan that reports devices whose advertised local
//! name equals the product name. Each device is reported once per scan
//! session; the candidate set only grows until the next `start`.
//!
//! The scan runs as a background task polling the transport. Poll errors
//! and panicking discovery callbacks are logged and the scan keeps going
//! until `stop` is called.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ScanError;
use crate::transport::{PeripheralHandle, PeripheralId, RadioTransport};

/// Devices seen during one scan session, in discovery order
#[derive(Debug, Default)]
pub struct CandidateSet {
    handles: Vec<PeripheralHandle>,
    seen: HashSet<PeripheralId>,
}

impl CandidateSet {
    /// Returns false if the device is already a candidate.
    pub fn insert(&mut self, handle: PeripheralHandle) -> bool {
        if !self.seen.insert(handle.id.clone()) {
            return false;
        }
        self.handles.push(handle);
        true
    }

    pub fn handles(&self) -> &[PeripheralHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn clear(&mut self) {
        self.handles.clear();
        self.seen.clear();
    }
}

pub struct PeripheralScanner<T: RadioTransport> {
    transport: Arc<T>,
    product_name: String,
    poll_interval: Duration,
    candidates: Arc<Mutex<CandidateSet>>,
    stop_flag: Mutex<Option<Arc<AtomicBool>>>,
}

impl<T: RadioTransport> PeripheralScanner<T> {
    pub fn new(transport: Arc<T>, product_name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            transport,
            product_name: product_name.into(),
            poll_interval,
            candidates: Arc::new(Mutex::new(CandidateSet::default())),
            stop_flag: Mutex::new(None),
        }
    }

    /// Starts a fresh scan session and calls `on_discover` for every new
    /// matching device. Any previous candidates are dropped.
    pub async fn start<F>(&self, on_discover: F) -> Result<(), ScanError>
    where
        F: Fn(PeripheralHandle) + Send + Sync + 'static,
    {
        if self.is_scanning() {
            log::warn!("Scan already running, restarting");
            self.stop().await;
        }

        self.transport
            .start_scan()
            .await
            .map_err(|e| ScanError::StartFailed(e.to_string()))?;

        lock(&self.candidates).clear();

        // Each scan session gets its own stop flag
        let should_stop = Arc::new(AtomicBool::new(false));
        *lock(&self.stop_flag) = Some(should_stop.clone());

        log::info!("Scanning for '{}'", self.product_name);

        let transport = self.transport.clone();
        let candidates = self.candidates.clone();
        let product_name = self.product_name.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            while !should_stop.load(Ordering::Relaxed) {
                match transport.advertisements().await {
                    Ok(advertisements) => {
                        for advertisement in advertisements {
                            if advertisement.local_name.as_deref() != Some(product_name.as_str()) {
                                continue;
                            }
                            let handle =
                                PeripheralHandle::new(advertisement.id, product_name.clone());
                            // Checked again so nothing is reported after stop()
                            if should_stop.load(Ordering::Relaxed) {
                                break;
                            }
                            if lock(&candidates).insert(handle.clone()) {
                                log::info!("Discovered {} ({})", handle.name, handle.id);
                                let id = handle.id.clone();
                                if catch_unwind(AssertUnwindSafe(|| on_discover(handle))).is_err() {
                                    log::warn!("Discovery callback panicked on {}, scan continues", id);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let error = ScanError::PollFailed(e.to_string());
                        log::warn!("{}", error);
                    }
                }
                tokio::time::sleep(poll_interval).await;
            }
            log::debug!("Scan task finished");
        });

        Ok(())
    }

    /// Best-effort: never fails, even with no scan running.
    pub async fn stop(&self) {
        if let Some(flag) = lock(&self.stop_flag).take() {
            log::debug!("Scanner: Setting stop flag");
            flag.store(true, Ordering::Relaxed);
        }

        if let Err(e) = self.transport.stop_scan().await {
            log::warn!("Ignoring failure to stop scan: {}", e);
        }
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.stop_flag).is_some()
    }

    /// Snapshot of the devices found so far in this scan session
    pub fn candidates(&self) -> Vec<PeripheralHandle> {
        lock(&self.candidates).handles().to_vec()
    }
}

// No user code runs under these locks, so poisoned data is still consistent
fn lock<V>(mutex: &Mutex<V>) -> std::sync::MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn scanner(transport: &Arc<MockTransport>) -> PeripheralScanner<MockTransport> {
        PeripheralScanner::new(transport.clone(), "esp32-sensor", Duration::from_millis(2))
    }

    async fn wait_for_polls(transport: &MockTransport, polls: usize) {
        for _ in 0..200 {
            if transport.polls.load(Ordering::SeqCst) >= polls {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("scanner did not poll {} times", polls);
    }

    #[test]
    fn test_candidate_set_dedupes_by_id() {
        let mut set = CandidateSet::default();
        let a = PeripheralHandle::new(PeripheralId::new("a"), "esp32-sensor".to_string());
        assert!(set.insert(a.clone()));
        assert!(!set.insert(a));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_advertisements_reported_once() {
        let transport = Arc::new(MockTransport::new());
        transport.advertise("dev-1", Some("esp32-sensor"));
        transport.advertise("dev-1", Some("esp32-sensor"));
        transport.advertise("dev-2", Some("esp32-sensor"));

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let scanner = scanner(&transport);
        scanner
            .start(move |handle| sink.lock().unwrap().push(handle.id.to_string()))
            .await
            .unwrap();

        // Several polls, each seeing every advertisement again
        wait_for_polls(&transport, 5).await;
        scanner.stop().await;

        assert_eq!(*reported.lock().unwrap(), vec!["dev-1", "dev-2"]);
        assert_eq!(scanner.candidates().len(), 2);
    }

    #[tokio::test]
    async fn test_filters_by_product_name() {
        let transport = Arc::new(MockTransport::new());
        transport.advertise("headphones", Some("WH-1000XM4"));
        transport.advertise("anonymous", None);
        transport.advertise("sensor", Some("esp32-sensor"));

        let scanner = scanner(&transport);
        scanner.start(|_| {}).await.unwrap();
        wait_for_polls(&transport, 2).await;
        scanner.stop().await;

        let ids: Vec<_> = scanner.candidates().into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![PeripheralId::new("sensor")]);
    }

    #[tokio::test]
    async fn test_poll_errors_do_not_end_scan() {
        let transport = Arc::new(MockTransport::new());
        transport.failing_polls.store(3, Ordering::SeqCst);
        transport.advertise("dev-1", Some("esp32-sensor"));

        let scanner = scanner(&transport);
        scanner.start(|_| {}).await.unwrap();
        wait_for_polls(&transport, 5).await;

        assert!(scanner.is_scanning());
        assert_eq!(scanner.candidates().len(), 1);
        scanner.stop().await;
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_end_scan() {
        let transport = Arc::new(MockTransport::new());
        transport.advertise("dev-1", Some("esp32-sensor"));

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let scanner = scanner(&transport);
        scanner
            .start(move |handle| {
                sink.lock().unwrap().push(handle.id.to_string());
                if handle.id.as_str() == "dev-1" {
                    panic!("front-end bug");
                }
            })
            .await
            .unwrap();

        wait_for_polls(&transport, 2).await;
        transport.advertise("dev-2", Some("esp32-sensor"));
        let polls = transport.polls.load(Ordering::SeqCst);
        wait_for_polls(&transport, polls + 2).await;

        assert!(scanner.is_scanning());
        assert_eq!(*reported.lock().unwrap(), vec!["dev-1", "dev-2"]);
        assert_eq!(scanner.candidates().len(), 2);
        scanner.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_scan_is_silent() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_stop.store(true, Ordering::SeqCst);

        let scanner = scanner(&transport);
        scanner.stop().await;
        assert_eq!(transport.stop_scans.load(Ordering::SeqCst), 1);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_start.store(true, Ordering::SeqCst);

        let scanner = scanner(&transport);
        assert!(matches!(
            scanner.start(|_| {}).await,
            Err(ScanError::StartFailed(_))
        ));
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_restart_begins_fresh_session() {
        let transport = Arc::new(MockTransport::new());
        transport.advertise("dev-1", Some("esp32-sensor"));

        let scanner = scanner(&transport);
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = count.clone();
            scanner
                .start(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            let polls = transport.polls.load(Ordering::SeqCst);
            wait_for_polls(&transport, polls + 2).await;
            scanner.stop().await;
        }

        // Reported once in each session
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
