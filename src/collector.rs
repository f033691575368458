//! # Scan Result Collector
//!
//! Turns the raw advertisement stream into an ordered, duplicate-free list of
//! known devices and publishes it to observers.
//!
//! ## Architecture
//! - **Source**: any `ScanSource`, switched on and off by `start`/`stop`
//! - **Event queue**: crossbeam channel the source writes into, each event
//!   tagged with the scan session it belongs to
//! - **Worker thread**: single consumer that drains the queue
//! - **Known devices**: a `watch` channel holding the list; receivers from
//!   `observe()` see every change
//!
//! Both the worker and direct `on_scan_event` callers go through the same
//! `send_if_modified` call, which holds the watch lock across the membership
//! check and the append.
//!
//! The worker handles each queued event under the control lock and drops it
//! unless its session is the one currently scanning. Once `stop()` returns,
//! nothing from the stopped session reaches the list.

use crate::device::Device;
use crate::device_scanner::{ScanEvent, ScanSink, ScanSource};
use crate::error::ScanError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

struct Control {
    state: ScanState,
    /// Bumped on every successful `start`
    session: u64,
    source: Box<dyn ScanSource>,
}

pub struct ScanResultCollector {
    known: Arc<watch::Sender<Vec<Device>>>,
    control: Arc<Mutex<Control>>,
    events: Sender<(u64, ScanEvent)>,
}

impl ScanResultCollector {
    /// Creates an idle collector and its worker thread.
    pub fn new(source: Box<dyn ScanSource>) -> Self {
        let (known, _) = watch::channel(Vec::new());
        let known = Arc::new(known);
        let control = Arc::new(Mutex::new(Control {
            state: ScanState::Idle,
            session: 0,
            source,
        }));
        let (events, queue) = unbounded();

        let worker_known = known.clone();
        let worker_control = control.clone();
        thread::spawn(move || drain_events(&worker_known, &worker_control, queue));

        Self {
            known,
            control,
            events,
        }
    }

    /// Live view of the known devices, in discovery order
    pub fn observe(&self) -> watch::Receiver<Vec<Device>> {
        self.known.subscribe()
    }

    /// Snapshot of the known devices
    pub fn devices(&self) -> Vec<Device> {
        self.known.borrow().clone()
    }

    pub fn state(&self) -> ScanState {
        lock(&self.control).state
    }

    /// Subscribes to the source. No-op while already scanning.
    ///
    /// A source that refuses (for example on permission denial) is logged and
    /// the collector stays idle.
    pub fn start(&self) {
        let mut control = lock(&self.control);
        if control.state == ScanState::Scanning {
            return;
        }

        let session = control.session + 1;
        match control.source.subscribe(ScanSink::new(session, self.events.clone())) {
            Ok(()) => {
                control.session = session;
                control.state = ScanState::Scanning;
                log::info!("Bluetooth scan started");
            }
            Err(ScanError::PermissionDenied) => {
                log::error!("Bluetooth permission not granted, scan not started");
            }
            Err(e) => {
                log::error!("{}", e);
            }
        }
    }

    /// Unsubscribes from the source. No-op while idle.
    pub fn stop(&self) {
        let mut control = lock(&self.control);
        if control.state == ScanState::Idle {
            return;
        }

        control.source.unsubscribe();
        control.state = ScanState::Idle;
        log::info!("Bluetooth scan stopped");
    }

    /// Records one advertisement. Returns true if it added a new device.
    ///
    /// Observers have been notified by the time this returns.
    pub fn on_scan_event(&self, name: Option<&str>, address: Option<&str>) -> bool {
        record(&self.known, name, address)
    }
}

impl Drop for ScanResultCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(control: &Mutex<Control>) -> MutexGuard<'_, Control> {
    control.lock().unwrap_or_else(|e| e.into_inner())
}

fn drain_events(
    known: &watch::Sender<Vec<Device>>,
    control: &Mutex<Control>,
    queue: Receiver<(u64, ScanEvent)>,
) {
    for (session, event) in queue {
        let mut control = lock(control);
        if control.state != ScanState::Scanning || control.session != session {
            log::trace!("Dropping event from stopped scan session {}", session);
            continue;
        }

        match event {
            ScanEvent::Advertisement { name, address } => {
                record(known, name.as_deref(), address.as_deref());
            }
            ScanEvent::Failed(ScanError::PermissionDenied) => {
                log::error!("Bluetooth permission not granted, scan stopped");
                control.source.unsubscribe();
                control.state = ScanState::Idle;
            }
            ScanEvent::Failed(e) => {
                log::error!("Scan failed: {}", e);
            }
        }
    }
    log::debug!("Scan event queue closed");
}

fn record(known: &watch::Sender<Vec<Device>>, name: Option<&str>, address: Option<&str>) -> bool {
    let Some(device) = Device::from_parts(name, address) else {
        return false;
    };

    known.send_if_modified(|devices| {
        if devices.contains(&device) {
            return false;
        }
        log::debug!("Found device: Name={}, Address={}", device.name, device.address);
        devices.push(device);
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /// Source that hands its sink back to the test
    #[derive(Clone, Default)]
    struct FakeSource {
        sink: Arc<Mutex<Option<ScanSink>>>,
        subscribe_calls: Arc<Mutex<usize>>,
        unsubscribe_calls: Arc<Mutex<usize>>,
        deny: bool,
        deny_later: bool,
    }

    impl FakeSource {
        fn denying() -> Self {
            Self {
                deny: true,
                ..Self::default()
            }
        }

        /// Accepts the subscription, then reports denial through the sink
        fn denying_later() -> Self {
            Self {
                deny_later: true,
                ..Self::default()
            }
        }

        fn subscribes(&self) -> usize {
            *self.subscribe_calls.lock().unwrap()
        }

        fn unsubscribes(&self) -> usize {
            *self.unsubscribe_calls.lock().unwrap()
        }

        fn sink(&self) -> Option<ScanSink> {
            self.sink.lock().unwrap().clone()
        }
    }

    impl ScanSource for FakeSource {
        fn subscribe(&mut self, sink: ScanSink) -> Result<(), ScanError> {
            *self.subscribe_calls.lock().unwrap() += 1;
            if self.deny {
                return Err(ScanError::PermissionDenied);
            }
            if self.deny_later {
                sink.deliver(ScanEvent::Failed(ScanError::PermissionDenied));
            }
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn unsubscribe(&mut self) {
            *self.unsubscribe_calls.lock().unwrap() += 1;
            *self.sink.lock().unwrap() = None;
        }
    }

    fn names(devices: &[Device]) -> Vec<&str> {
        devices.iter().map(|d| d.name.as_str()).collect()
    }

    fn advert(name: &str, address: &str) -> ScanEvent {
        ScanEvent::Advertisement {
            name: Some(name.to_string()),
            address: Some(address.to_string()),
        }
    }

    /// Polls `condition` until it holds, failing the test after five seconds
    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for the worker");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let collector = ScanResultCollector::new(Box::new(FakeSource::default()));

        assert!(collector.on_scan_event(Some("Pear Pods"), Some("AA:BB:CC:00:00:01")));
        assert!(!collector.on_scan_event(Some("Pear Pods"), Some("AA:BB:CC:00:00:01")));
        assert!(collector.on_scan_event(Some("Watch"), Some("AA:BB:CC:00:00:02")));

        assert_eq!(
            collector.devices(),
            vec![
                Device::new("Pear Pods", "AA:BB:CC:00:00:01").unwrap(),
                Device::new("Watch", "AA:BB:CC:00:00:02").unwrap(),
            ]
        );
    }

    #[test]
    fn test_same_name_different_address_is_a_new_device() {
        let collector = ScanResultCollector::new(Box::new(FakeSource::default()));

        collector.on_scan_event(Some("Watch"), Some("AA:BB:CC:00:00:02"));
        collector.on_scan_event(Some("Watch"), Some("AA:BB:CC:00:00:03"));

        assert_eq!(collector.devices().len(), 2);
    }

    #[test]
    fn test_incomplete_events_are_ignored_silently() {
        let collector = ScanResultCollector::new(Box::new(FakeSource::default()));
        let observer = collector.observe();

        assert!(!collector.on_scan_event(None, Some("AA:BB:CC:00:00:01")));
        assert!(!collector.on_scan_event(Some(""), Some("AA:BB:CC:00:00:01")));
        assert!(!collector.on_scan_event(Some("Pear Pods"), None));
        assert!(!collector.on_scan_event(Some("Pear Pods"), Some("")));

        assert!(collector.devices().is_empty());
        assert!(!observer.has_changed().unwrap());
    }

    #[test]
    fn test_observers_are_notified_before_return() {
        let collector = ScanResultCollector::new(Box::new(FakeSource::default()));
        let mut observer = collector.observe();

        collector.on_scan_event(Some("Watch"), Some("AA:BB:CC:00:00:02"));
        assert!(observer.has_changed().unwrap());
        assert_eq!(names(&observer.borrow_and_update()), vec!["Watch"]);

        collector.on_scan_event(Some("Watch"), Some("AA:BB:CC:00:00:02"));
        assert!(!observer.has_changed().unwrap());
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let source = FakeSource::default();
        let collector = ScanResultCollector::new(Box::new(source.clone()));
        assert_eq!(collector.state(), ScanState::Idle);

        collector.stop();
        assert_eq!(*source.unsubscribe_calls.lock().unwrap(), 0);

        collector.start();
        collector.start();
        assert_eq!(collector.state(), ScanState::Scanning);
        assert_eq!(*source.subscribe_calls.lock().unwrap(), 1);

        collector.stop();
        collector.stop();
        assert_eq!(collector.state(), ScanState::Idle);
        assert_eq!(*source.unsubscribe_calls.lock().unwrap(), 1);
        assert!(source.sink().is_none());
    }

    #[test]
    fn test_permission_denied_leaves_collector_idle() {
        let source = FakeSource::denying();
        let collector = ScanResultCollector::new(Box::new(source.clone()));

        collector.start();
        assert_eq!(collector.state(), ScanState::Idle);
        assert_eq!(*source.subscribe_calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let source = FakeSource::default();
        {
            let collector = ScanResultCollector::new(Box::new(source.clone()));
            collector.start();
        }
        assert_eq!(*source.unsubscribe_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queued_events_reach_observers() {
        let source = FakeSource::default();
        let collector = ScanResultCollector::new(Box::new(source.clone()));
        let mut observer = collector.observe();
        collector.start();

        let sink = source.sink().expect("collector should have subscribed");
        for (name, address) in [
            ("Pear Pods", "AA:BB:CC:00:00:01"),
            ("Pear Pods", "AA:BB:CC:00:00:01"),
            ("Watch", "AA:BB:CC:00:00:02"),
        ] {
            assert!(sink.deliver(ScanEvent::Advertisement {
                name: Some(name.to_string()),
                address: Some(address.to_string()),
            }));
        }
        sink.deliver(ScanEvent::Advertisement {
            name: None,
            address: Some("AA:BB:CC:00:00:03".to_string()),
        });

        let devices = tokio::time::timeout(
            Duration::from_secs(5),
            observer.wait_for(|devices| devices.len() == 2),
        )
        .await
        .expect("timed out waiting for devices")
        .expect("collector dropped")
        .clone();

        assert_eq!(names(&devices), vec!["Pear Pods", "Watch"]);
    }

    #[tokio::test]
    async fn test_scan_failure_keeps_scanning_state() {
        let source = FakeSource::default();
        let collector = ScanResultCollector::new(Box::new(source.clone()));
        let mut observer = collector.observe();
        collector.start();

        let sink = source.sink().expect("collector should have subscribed");
        sink.deliver(ScanEvent::Failed(ScanError::ScanFailed("radio off".into())));
        sink.deliver(ScanEvent::Advertisement {
            name: Some("Watch".into()),
            address: Some("AA:BB:CC:00:00:02".into()),
        });

        tokio::time::timeout(Duration::from_secs(5), observer.wait_for(|d| d.len() == 1))
            .await
            .expect("timed out waiting for devices")
            .expect("collector dropped");

        assert_eq!(collector.state(), ScanState::Scanning);
    }

    #[test]
    fn test_late_permission_denial_returns_to_idle() {
        let source = FakeSource::denying_later();
        let collector = ScanResultCollector::new(Box::new(source.clone()));

        collector.start();
        wait_until(|| collector.state() == ScanState::Idle);
        assert_eq!(source.unsubscribes(), 1);
        assert!(source.sink().is_none());

        // Pressing start again retries instead of being swallowed.
        collector.start();
        assert_eq!(source.subscribes(), 2);
        wait_until(|| collector.state() == ScanState::Idle);
        assert_eq!(source.unsubscribes(), 2);
    }

    #[test]
    fn test_events_from_stopped_session_are_dropped() {
        let source = FakeSource::default();
        let collector = ScanResultCollector::new(Box::new(source.clone()));

        collector.start();
        let stale = source.sink().expect("collector should have subscribed");
        collector.stop();
        assert!(stale.deliver(advert("Ghost", "AA:BB:CC:00:00:09")));

        collector.start();
        assert!(stale.deliver(advert("Ghost", "AA:BB:CC:00:00:09")));
        let current = source.sink().expect("collector should have resubscribed");
        current.deliver(advert("Watch", "AA:BB:CC:00:00:02"));

        wait_until(|| !collector.devices().is_empty());
        assert_eq!(names(&collector.devices()), vec!["Watch"]);
    }

    #[test]
    fn test_concurrent_deliveries_never_duplicate() {
        const ROUNDS: usize = 200;
        let set = [
            ("Pear Pods", "AA:BB:CC:00:00:01"),
            ("Watch", "AA:BB:CC:00:00:02"),
            ("Phone", "AA:BB:CC:00:00:03"),
        ];

        let source = FakeSource::default();
        let collector = ScanResultCollector::new(Box::new(source.clone()));
        collector.start();
        let sink = source.sink().expect("collector should have subscribed");

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..ROUNDS {
                        for (name, address) in set {
                            collector.on_scan_event(Some(name), Some(address));
                        }
                    }
                });
                let sink = sink.clone();
                scope.spawn(move || {
                    for _ in 0..ROUNDS {
                        for (name, address) in set {
                            sink.deliver(advert(name, address));
                        }
                    }
                });
            }
        });

        // The queue is FIFO, so once this lands every earlier delivery has too.
        sink.deliver(advert("Marker", "AA:BB:CC:00:00:FF"));
        wait_until(|| collector.devices().len() == set.len() + 1);

        let devices = collector.devices();
        for (name, address) in set {
            let device = Device::new(name, address).unwrap();
            assert_eq!(devices.iter().filter(|d| **d == device).count(), 1);
        }
        assert_eq!(devices.last().map(|d| d.name.as_str()), Some("Marker"));
    }
}
