//! # Active Device Tracker
//!
//! Holds the one device the user has picked, if any, and keeps two parties in
//! step with it: the presenting lifecycle (the "Connected to X" indicator) and
//! a single observer.
//!
//! A newly registered observer is told about the current selection straight
//! away, so it never has to have witnessed the `select` call itself.
//!
//! Notifications run while the tracker's lock is held. Observers and
//! lifecycles must not call back into the tracker.

use crate::device::Device;
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives selection changes
pub trait DeviceObserver: Send {
    fn on_device_connected(&self, device: &Device);
    fn on_device_disconnected(&self);
}

/// The long-lived host that shows an indicator while a device is selected
pub trait PresentingLifecycle: Send + Sync {
    fn enter_presenting(&self, device: &Device);
    fn exit_presenting(&self);
}

/// A selection request as it arrives from a control, fields possibly missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectRequest {
    pub name: Option<String>,
    pub address: Option<String>,
}

impl From<&Device> for ConnectRequest {
    fn from(device: &Device) -> Self {
        Self {
            name: Some(device.name.clone()),
            address: Some(device.address.clone()),
        }
    }
}

struct TrackerState {
    selection: Option<Device>,
    observer: Option<Box<dyn DeviceObserver>>,
}

pub struct ActiveDeviceTracker {
    state: Mutex<TrackerState>,
    lifecycle: Arc<dyn PresentingLifecycle>,
}

impl ActiveDeviceTracker {
    pub fn new(lifecycle: Arc<dyn PresentingLifecycle>) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                selection: None,
                observer: None,
            }),
            lifecycle,
        }
    }

    pub fn selection(&self) -> Option<Device> {
        self.lock().selection.clone()
    }

    /// Makes `device` the active selection, replacing any previous one.
    pub fn select(&self, device: Device) {
        let mut state = self.lock();
        log::info!("Device selected: {}", device);

        if let Some(observer) = &state.observer {
            observer.on_device_connected(&device);
        }
        self.lifecycle.enter_presenting(&device);
        state.selection = Some(device);
    }

    /// Drops the active selection. No-op when nothing is selected.
    pub fn clear(&self) {
        let mut state = self.lock();
        let Some(previous) = state.selection.take() else {
            return;
        };
        log::info!("Device deselected: {}", previous);

        if let Some(observer) = &state.observer {
            observer.on_device_disconnected();
        }
        self.lifecycle.exit_presenting();
    }

    /// Applies a request from a control. Anything short of a complete device
    /// is treated as a disconnect.
    pub fn handle_request(&self, request: &ConnectRequest) {
        match Device::from_parts(request.name.as_deref(), request.address.as_deref()) {
            Some(device) => self.select(device),
            None => {
                log::warn!("Device name or address is missing, disconnecting");
                self.clear();
            }
        }
    }

    /// Replaces the observer. A new observer immediately hears about the
    /// current selection.
    pub fn set_observer(&self, observer: Option<Box<dyn DeviceObserver>>) {
        let mut state = self.lock();
        if let (Some(observer), Some(device)) = (&observer, &state.selection) {
            observer.on_device_connected(device);
        }
        state.observer = observer;
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
