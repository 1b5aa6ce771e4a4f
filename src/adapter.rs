//! Network adapter model and the OS capabilities the monitor drives.

use std::fmt;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationalStatus {
    Up,
    Down,
    NotPresent,
}

impl fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationalStatus::Up => f.write_str("Up"),
            OperationalStatus::Down => f.write_str("Down"),
            OperationalStatus::NotPresent => f.write_str("NotPresent"),
        }
    }
}

/// IPv4 configuration as reported by the OS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ipv4Config {
    pub unicast: Vec<Ipv4Addr>,
    pub gateways: Vec<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
}

/// One adapter as enumerated by the OS on a single query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSnapshot {
    pub name: String,
    pub description: String,
    pub status: OperationalStatus,
    /// `None` when the adapter has no IPv4 binding at all
    pub ipv4: Option<Ipv4Config>,
}

/// An adapter under watch. The set is fixed at startup; entries are only ever
/// updated in place.
#[derive(Debug, Clone)]
pub struct MonitoredAdapter {
    pub name: String,
    pub description: String,
    pub status: OperationalStatus,
    pub self_assigned: bool,
    pub gateways: Vec<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
    /// Consecutive fully failed connectivity probes
    pub connectivity_failures: u32,
    /// Set when re-enabling failed; the next evaluated tick resets it again.
    pub retry_enable: bool,
}

impl MonitoredAdapter {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            status: OperationalStatus::NotPresent,
            self_assigned: false,
            gateways: Vec::new(),
            dns: Vec::new(),
            connectivity_failures: 0,
            retry_enable: false,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

/// Adapter query and control capability provided by the host OS.
#[allow(async_fn_in_trait)]
pub trait NetworkBackend {
    /// Enumerate adapters. Adapters whose properties cannot be read are left out.
    async fn adapters(&self) -> anyhow::Result<Vec<AdapterSnapshot>>;

    /// Current operational status of one adapter, `NotPresent` if it is gone.
    async fn status(&self, name: &str) -> anyhow::Result<OperationalStatus> {
        let adapters = self.adapters().await?;
        Ok(adapters
            .iter()
            .find(|a| a.name.to_lowercase() == name.to_lowercase())
            .map(|a| a.status)
            .unwrap_or(OperationalStatus::NotPresent))
    }

    /// Administratively enable or disable an adapter. `Ok(false)` means the
    /// command ran but reported failure.
    async fn set_interface_enabled(&self, name: &str, enabled: bool) -> anyhow::Result<bool>;
}
