//! # Device Service Module
//!
//! The long-lived host around the tracker. It shows the "Connected to X"
//! indicator while a device is selected, remembers the last selection across
//! restarts, and lets a front-end attach as the tracker's observer for as long
//! as it holds a `ServiceBinding`.
//!
//! ## Key Components
//! - `NotificationPresenter`: the indicator, rendered through the log
//! - `DeviceService`: tracker + presenter + persisted last device
//! - `ServiceManager`: command loop on its own thread, fed by `ServiceCommand`s

use crate::config::Config;
use crate::device::Device;
use crate::tracker::{ActiveDeviceTracker, ConnectRequest, DeviceObserver, PresentingLifecycle};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

/// Holds the text of the persistent indicator while it is shown.
#[derive(Default)]
pub struct NotificationPresenter {
    current: Mutex<Option<String>>,
}

impl NotificationPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of the visible indicator, if any
    pub fn current(&self) -> Option<String> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl PresentingLifecycle for NotificationPresenter {
    fn enter_presenting(&self, device: &Device) {
        let text = format!("Connected to {}", device.name);
        log::info!("Notification: {}", text);
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(text);
    }

    fn exit_presenting(&self) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.take().is_some() {
            log::info!("Notification removed");
        }
    }
}

pub struct DeviceService {
    tracker: ActiveDeviceTracker,
    presenter: Arc<NotificationPresenter>,
    config: Mutex<Config>,
    config_path: Option<PathBuf>,
}

impl DeviceService {
    /// `config_path` is where the last selection is persisted; `None` keeps it
    /// in memory only.
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Self {
        let presenter = Arc::new(NotificationPresenter::new());
        Self {
            tracker: ActiveDeviceTracker::new(presenter.clone()),
            presenter,
            config: Mutex::new(config),
            config_path,
        }
    }

    pub fn notification(&self) -> Option<String> {
        self.presenter.current()
    }

    /// The device a restarted service should pick up again, if enabled
    pub fn redelivery(&self) -> Option<ConnectRequest> {
        let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        if !config.restore_last_device {
            return None;
        }
        config.last_device.as_ref().map(ConnectRequest::from)
    }

    /// Applies a start command and remembers its outcome for redelivery.
    pub fn start_command(&self, request: &ConnectRequest) {
        self.tracker.handle_request(request);
        self.remember(self.tracker.selection());
    }

    /// Explicit disconnect; also forgets the device for redelivery.
    pub fn stop_command(&self) {
        self.tracker.clear();
        self.remember(None);
    }

    /// Registers `observer` until the returned binding is dropped.
    pub fn bind(self: &Arc<Self>, observer: Box<dyn DeviceObserver>) -> ServiceBinding {
        log::debug!("Service bound");
        self.tracker.set_observer(Some(observer));
        ServiceBinding {
            service: self.clone(),
        }
    }

    /// Clears the selection without forgetting it for the next start.
    pub fn shutdown(&self) {
        self.tracker.clear();
        log::debug!("Service shut down");
    }

    fn remember(&self, device: Option<Device>) {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        if config.last_device == device {
            return;
        }
        config.last_device = device;

        if let Some(path) = &self.config_path {
            if let Err(e) = config.save_to(path) {
                log::warn!("Could not persist last device: {}", e);
            }
        }
    }
}

/// An attached observer. Dropping it detaches the observer.
pub struct ServiceBinding {
    service: Arc<DeviceService>,
}

impl Drop for ServiceBinding {
    fn drop(&mut self) {
        self.service.tracker.set_observer(None);
        log::debug!("Service unbound");
    }
}

#[derive(Debug, Clone)]
pub enum ServiceCommand {
    Start(ConnectRequest),
    Stop,
    /// Answered once every earlier command has been applied and its observer
    /// notifications sent.
    Flush(mpsc::Sender<()>),
}

/// Processes service commands on a dedicated thread, the way a platform
/// delivers start requests to its service one at a time.
pub struct ServiceManager {
    command_receiver: mpsc::Receiver<ServiceCommand>,
    service: Arc<DeviceService>,
}

impl ServiceManager {
    /// Returns the manager and a sender for issuing commands from the front-end.
    pub fn new(service: Arc<DeviceService>) -> (Self, mpsc::Sender<ServiceCommand>) {
        let (command_sender, command_receiver) = mpsc::channel();

        let manager = ServiceManager {
            command_receiver,
            service,
        };

        (manager, command_sender)
    }

    /// Runs until every command sender is dropped, then shuts the service down.
    pub fn run(self) {
        while let Ok(command) = self.command_receiver.recv() {
            match command {
                ServiceCommand::Start(request) => {
                    log::debug!("Service manager: start {:?}", request);
                    self.service.start_command(&request);
                }
                ServiceCommand::Stop => {
                    log::debug!("Service manager: stop requested");
                    self.service.stop_command();
                }
                ServiceCommand::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        log::info!("Service manager: Command channel closed, shutting down");
        self.service.shutdown();
    }
}

/// Observer that forwards selection changes over a channel
pub struct ChannelObserver {
    sender: mpsc::Sender<SelectionUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionUpdate {
    Connected(Device),
    Disconnected,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::Sender<SelectionUpdate>) -> Self {
        Self { sender }
    }
}

impl DeviceObserver for ChannelObserver {
    fn on_device_connected(&self, device: &Device) {
        if let Err(why) = self.sender.send(SelectionUpdate::Connected(device.clone())) {
            log::debug!("Could not forward selection: {:?}", why);
        }
    }

    fn on_device_disconnected(&self) {
        if let Err(why) = self.sender.send(SelectionUpdate::Disconnected) {
            log::debug!("Could not forward disconnect: {:?}", why);
        }
    }
}
