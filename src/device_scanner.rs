//! # Platform Scanning Module
//!
//! The boundary between PearWatch and the platform Bluetooth stack. A
//! `ScanSource` pushes raw advertisements into a `ScanSink`; it never sees the
//! known-device list or decides what counts as a duplicate.
//!
//! `BtleplugScanner` is the real source. It runs the btleplug central event
//! stream on a Tokio runtime and forwards every discovered or updated
//! peripheral as it is seen. Adapter setup and `start_scan` finish before
//! `subscribe` returns, so a refused or missing radio is reported to the
//! caller rather than through the event queue.

use crate::error::ScanError;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use crossbeam_channel::Sender;
use futures::stream::{BoxStream, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// One notification from the platform scanner
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// An advertisement was received. Either field may be absent.
    Advertisement {
        name: Option<String>,
        address: Option<String>,
    },
    /// The platform reported a failure instead of a result.
    /// `PermissionDenied` means the source has given up.
    Failed(ScanError),
}

/// Write end of the collector's event queue, handed to a source on subscribe.
///
/// Every event is tagged with the session the sink was issued for, so the
/// collector can drop what arrives after that session was stopped.
#[derive(Debug, Clone)]
pub struct ScanSink {
    session: u64,
    sender: Sender<(u64, ScanEvent)>,
}

impl ScanSink {
    pub fn new(session: u64, sender: Sender<(u64, ScanEvent)>) -> Self {
        Self { session, sender }
    }

    /// Queues an event. Returns false once the collector is gone.
    pub fn deliver(&self, event: ScanEvent) -> bool {
        self.sender.send((self.session, event)).is_ok()
    }
}

/// A provider of scan events that can be switched on and off.
pub trait ScanSource: Send {
    /// Starts delivering events into `sink`. An `Err` means nothing will be
    /// delivered.
    fn subscribe(&mut self, sink: ScanSink) -> Result<(), ScanError>;

    /// Stops delivering events and releases the sink.
    fn unsubscribe(&mut self);
}

/// Scans with the first Bluetooth adapter btleplug finds.
pub struct BtleplugScanner {
    runtime: Handle,
    shutdown: Option<oneshot::Sender<()>>,
}

impl BtleplugScanner {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            shutdown: None,
        }
    }
}

impl ScanSource for BtleplugScanner {
    /// Blocks until the adapter is scanning or has failed to. Must not be
    /// called from inside the scanner's own runtime.
    fn subscribe(&mut self, sink: ScanSink) -> Result<(), ScanError> {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        self.runtime.spawn(async move {
            let (central, events) = match start_central().await {
                Ok(started) => {
                    let _ = ready_tx.send(Ok(()));
                    started
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = forward_until_shutdown(&central, events, &sink, shutdown_rx).await {
                sink.deliver(ScanEvent::Failed(e));
            }
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.shutdown = Some(shutdown);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ScanError::ScanFailed(
                "scan task ended before the adapter started".to_string(),
            )),
        }
    }

    fn unsubscribe(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already have ended on its own after a failure.
            let _ = shutdown.send(());
        }
    }
}

async fn start_central() -> Result<(Adapter, BoxStream<'static, CentralEvent>), ScanError> {
    let manager = Manager::new()
        .await
        .map_err(|e| ScanError::ManagerInit(e.to_string()))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| ScanError::from_btleplug("Failed to get adapters", e))?;

    let central = adapters.into_iter().next().ok_or(ScanError::NoAdapters)?;

    let events = central
        .events()
        .await
        .map_err(|e| ScanError::from_btleplug("Failed to subscribe to events", e))?;

    central
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| ScanError::from_btleplug("Failed to start scan", e))?;

    log::debug!("btleplug scan running");
    Ok((central, events))
}

async fn forward_until_shutdown(
    central: &Adapter,
    mut events: BoxStream<'static, CentralEvent>,
    sink: &ScanSink,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), ScanError> {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.next() => match event {
                Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                    let peripheral = match central.peripheral(&id).await {
                        Ok(peripheral) => peripheral,
                        Err(e) => {
                            log::debug!("Peripheral {:?} vanished: {}", id, e);
                            continue;
                        }
                    };
                    if let Ok(Some(props)) = peripheral.properties().await {
                        let event = ScanEvent::Advertisement {
                            name: props.local_name,
                            address: Some(props.address.to_string()),
                        };
                        if !sink.deliver(event) {
                            break;
                        }
                    }
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    central
        .stop_scan()
        .await
        .map_err(|e| ScanError::from_btleplug("Failed to stop scan", e))?;

    log::debug!("btleplug scan stopped");
    Ok(())
}
