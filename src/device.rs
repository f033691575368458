use serde::{Deserialize, Serialize};
use std::fmt;

/// A nearby Bluetooth device, identified by its advertised name and hardware address.
///
/// Two devices are the same device only when both fields match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub address: String,
}

impl Device {
    /// Builds a device, or `None` when either field is empty.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Option<Self> {
        let name = name.into();
        let address = address.into();
        if name.is_empty() || address.is_empty() {
            return None;
        }
        Some(Self { name, address })
    }

    /// Builds a device from raw advertisement fields that may be absent.
    pub fn from_parts(name: Option<&str>, address: Option<&str>) -> Option<Self> {
        match (name, address) {
            (Some(name), Some(address)) => Self::new(name, address),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}
