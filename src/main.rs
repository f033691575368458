mod collector;
mod config;
mod console;
mod device;
mod device_scanner;
mod error;
mod service;
mod tracker;

use collector::ScanResultCollector;
use config::Config;
use console::Console;
use device_scanner::BtleplugScanner;
use service::{ChannelObserver, DeviceService, ServiceCommand, ServiceManager};
use std::error::Error;
use std::io;
use std::sync::{mpsc, Arc};
use tokio::runtime::Runtime;

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("{}, using defaults", e);
        Config::default()
    });

    // The btleplug scan runs on this runtime; everything else is plain threads.
    let rt = Runtime::new()?;

    let collector = ScanResultCollector::new(Box::new(BtleplugScanner::new(rt.handle().clone())));

    let service = Arc::new(DeviceService::new(config.clone(), Some(Config::config_path())));
    let (manager, commands) = ServiceManager::new(service.clone());
    let manager_thread = std::thread::spawn(move || manager.run());

    let (update_sender, updates) = mpsc::channel();
    let binding = service.bind(Box::new(ChannelObserver::new(update_sender)));

    if let Some(request) = service.redelivery() {
        log::info!("Restoring last device");
        commands.send(ServiceCommand::Start(request))?;
    }

    if config.scan_on_startup {
        collector.start();
    }

    let result = Console::new(&collector, service.clone(), commands, updates)
        .run(io::stdin().lock(), io::stdout());

    // Tear the session down: stop scanning, detach, and let the manager drain.
    collector.stop();
    log::info!("Session ended with {} known devices", collector.devices().len());
    drop(binding);
    if manager_thread.join().is_err() {
        log::error!("Service manager thread panicked");
    }

    result?;
    Ok(())
}
