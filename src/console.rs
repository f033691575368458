//! Line-oriented front-end: lists scanned devices and forwards the user's
//! picks to the device service.

use crate::collector::{ScanResultCollector, ScanState};
use crate::device::Device;
use crate::service::{DeviceService, SelectionUpdate, ServiceCommand};
use crate::tracker::ConnectRequest;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Scan,
    StopScan,
    List,
    /// 1-based index into the listed devices
    Select(usize),
    Disconnect,
    Status,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let command = match words.next() {
        Some(word) => word.to_ascii_lowercase(),
        None => return Err("empty command".to_string()),
    };

    let parsed = match command.as_str() {
        "scan" => ConsoleCommand::Scan,
        "stop" => ConsoleCommand::StopScan,
        "list" | "ls" => ConsoleCommand::List,
        "select" | "connect" => {
            let index = words
                .next()
                .ok_or_else(|| "select needs a device number".to_string())?;
            match index.parse::<usize>() {
                Ok(n) if n > 0 => ConsoleCommand::Select(n),
                _ => return Err(format!("not a device number: {}", index)),
            }
        }
        "disconnect" => ConsoleCommand::Disconnect,
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };

    if words.next().is_some() {
        return Err(format!("too many arguments for {}", command));
    }
    Ok(parsed)
}

/// Renders the device list with a marker on the selected entry and a final
/// "Disconnect" row that is marked when nothing is selected.
pub fn render_list(devices: &[Device], selected: Option<&Device>) -> String {
    let marker = |on: bool| if on { "(*)" } else { "( )" };

    let mut out = String::from("Devices\n");
    for (i, device) in devices.iter().enumerate() {
        out.push_str(&format!(
            "{} {:>2}. {}  {}\n",
            marker(selected == Some(device)),
            i + 1,
            device.name,
            device.address
        ));
    }
    out.push_str(&format!("{}     Disconnect\n", marker(selected.is_none())));
    out
}

const HELP: &str = "\
commands:
  scan          start scanning
  stop          stop scanning
  list          show discovered devices
  select <n>    connect to device n
  disconnect    drop the current device
  status        show scan and connection state
  quit          exit
";

pub struct Console<'a> {
    collector: &'a ScanResultCollector,
    devices: watch::Receiver<Vec<Device>>,
    service: Arc<DeviceService>,
    commands: Sender<ServiceCommand>,
    updates: Receiver<SelectionUpdate>,
    selected: Option<Device>,
}

impl<'a> Console<'a> {
    /// `updates` should be fed by an observer bound to `service`.
    pub fn new(
        collector: &'a ScanResultCollector,
        service: Arc<DeviceService>,
        commands: Sender<ServiceCommand>,
        updates: Receiver<SelectionUpdate>,
    ) -> Self {
        Self {
            collector,
            devices: collector.observe(),
            service,
            commands,
            updates,
            selected: None,
        }
    }

    /// Reads commands from `input` until it ends or the user quits.
    pub fn run(&mut self, input: impl BufRead, mut output: impl Write) -> io::Result<()> {
        write!(output, "{}", HELP)?;
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Ok(ConsoleCommand::Quit) => break,
                Ok(command) => self.execute(command, &mut output)?,
                Err(e) => writeln!(output, "{}", e)?,
            }
            output.flush()?;
        }
        Ok(())
    }

    fn execute(&mut self, command: ConsoleCommand, output: &mut impl Write) -> io::Result<()> {
        self.drain_updates();

        match command {
            ConsoleCommand::Scan => self.collector.start(),
            ConsoleCommand::StopScan => self.collector.stop(),
            ConsoleCommand::List => {
                let devices = self.devices.borrow_and_update();
                write!(output, "{}", render_list(&devices, self.selected.as_ref()))?;
            }
            ConsoleCommand::Select(n) => {
                let request = self.devices.borrow().get(n - 1).map(ConnectRequest::from);
                match request {
                    Some(request) => self.send(ServiceCommand::Start(request)),
                    None => writeln!(output, "no device {}", n)?,
                }
            }
            ConsoleCommand::Disconnect => self.send(ServiceCommand::Stop),
            ConsoleCommand::Status => {
                let scanning = match self.collector.state() {
                    ScanState::Idle => "idle",
                    ScanState::Scanning => "scanning",
                };
                match &self.selected {
                    Some(device) => writeln!(output, "{}, connected to {}", scanning, device)?,
                    None => writeln!(output, "{}, not connected", scanning)?,
                }
                if let Some(text) = self.service.notification() {
                    writeln!(output, "notification: {}", text)?;
                }
            }
            ConsoleCommand::Help => write!(output, "{}", HELP)?,
            ConsoleCommand::Quit => {}
        }
        Ok(())
    }

    /// Sends `command` and waits until the service has applied it, so the
    /// resulting selection update is queued before the next command runs.
    fn send(&self, command: ServiceCommand) {
        if let Err(why) = self.commands.send(command) {
            log::error!("Device service is gone: {:?}", why);
            return;
        }

        let (done, flushed) = mpsc::channel();
        if self.commands.send(ServiceCommand::Flush(done)).is_ok() {
            // Err only if the manager exited without answering.
            let _ = flushed.recv();
        }
    }

    fn drain_updates(&mut self) {
        for update in self.updates.try_iter() {
            self.selected = match update {
                SelectionUpdate::Connected(device) => Some(device),
                SelectionUpdate::Disconnected => None,
            };
        }
    }
}
