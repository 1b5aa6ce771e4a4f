//! In-memory OS stand-ins for unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::adapter::{AdapterSnapshot, Ipv4Config, NetworkBackend, OperationalStatus};
use crate::ping::Pinger;

pub fn ethernet(name: &str, addr: [u8; 4], gateway: [u8; 4], dns: &[[u8; 4]]) -> AdapterSnapshot {
    AdapterSnapshot {
        name: name.to_string(),
        description: format!("{} controller", name),
        status: OperationalStatus::Up,
        ipv4: Some(Ipv4Config {
            unicast: vec![Ipv4Addr::from(addr)],
            gateways: vec![Ipv4Addr::from(gateway)],
            dns: dns.iter().map(|&d| Ipv4Addr::from(d)).collect(),
        }),
    }
}

#[derive(Default)]
struct BackendState {
    adapters: Vec<AdapterSnapshot>,
    /// Adapters that accept commands but never change state
    unresponsive: HashSet<String>,
    /// IPv4 configuration an adapter picks up when it comes back up
    on_enable: HashMap<String, Ipv4Config>,
    commands: Vec<(String, bool)>,
    fail_enumeration: bool,
    enumerations: usize,
}

/// Adapters that react to enable/disable like a well-behaved NIC.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Rc<RefCell<BackendState>>,
}

impl FakeBackend {
    pub fn new(adapters: Vec<AdapterSnapshot>) -> Self {
        let backend = Self::default();
        backend.state.borrow_mut().adapters = adapters;
        backend
    }

    pub fn set_status(&self, name: &str, status: OperationalStatus) {
        self.with_adapter(name, |a| a.status = status);
    }

    pub fn set_unicast(&self, name: &str, addr: [u8; 4]) {
        self.with_adapter(name, |a| {
            if let Some(ip) = a.ipv4.as_mut() {
                ip.unicast = vec![Ipv4Addr::from(addr)];
            }
        });
    }

    pub fn remove(&self, name: &str) {
        self.state.borrow_mut().adapters.retain(|a| a.name != name);
    }

    pub fn unresponsive(&self, name: &str) {
        self.state.borrow_mut().unresponsive.insert(name.to_string());
    }

    pub fn responsive(&self, name: &str) {
        self.state.borrow_mut().unresponsive.remove(name);
    }

    pub fn on_enable(&self, name: &str, ipv4: Ipv4Config) {
        self.state.borrow_mut().on_enable.insert(name.to_string(), ipv4);
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.state.borrow_mut().fail_enumeration = fail;
    }

    /// Number of `adapters()` calls, status queries included
    pub fn enumerations(&self) -> usize {
        self.state.borrow().enumerations
    }

    pub fn commands(&self) -> Vec<(String, bool)> {
        self.state.borrow().commands.clone()
    }

    fn with_adapter(&self, name: &str, f: impl FnOnce(&mut AdapterSnapshot)) {
        let mut state = self.state.borrow_mut();
        if let Some(a) = state.adapters.iter_mut().find(|a| a.name == name) {
            f(a);
        }
    }
}

impl NetworkBackend for FakeBackend {
    async fn adapters(&self) -> anyhow::Result<Vec<AdapterSnapshot>> {
        let mut state = self.state.borrow_mut();
        state.enumerations += 1;
        if state.fail_enumeration {
            anyhow::bail!("enumeration failed");
        }
        Ok(state.adapters.clone())
    }

    async fn set_interface_enabled(&self, name: &str, enabled: bool) -> anyhow::Result<bool> {
        let mut state = self.state.borrow_mut();
        state.commands.push((name.to_string(), enabled));
        if state.unresponsive.contains(name) {
            return Ok(true);
        }
        let on_enable = state.on_enable.get(name).cloned();
        let Some(adapter) = state.adapters.iter_mut().find(|a| a.name == name) else {
            return Ok(false);
        };
        if enabled {
            adapter.status = OperationalStatus::Up;
            if let Some(ipv4) = on_enable {
                adapter.ipv4 = Some(ipv4);
            }
        } else {
            adapter.status = OperationalStatus::Down;
        }
        Ok(true)
    }
}

#[derive(Default)]
struct PingerState {
    scripted: HashMap<Ipv4Addr, VecDeque<Result<bool, String>>>,
    reachable: HashSet<Ipv4Addr>,
    calls: Vec<Ipv4Addr>,
}

/// Answers from a per-target script, then from the reachable set.
#[derive(Clone, Default)]
pub struct FakePinger {
    state: Rc<RefCell<PingerState>>,
}

impl FakePinger {
    pub fn reachable(&self, addr: [u8; 4]) {
        self.state.borrow_mut().reachable.insert(Ipv4Addr::from(addr));
    }

    pub fn unreachable(&self, addr: [u8; 4]) {
        self.state.borrow_mut().reachable.remove(&Ipv4Addr::from(addr));
    }

    pub fn script(&self, addr: [u8; 4], replies: impl IntoIterator<Item = Result<bool, String>>) {
        self.state
            .borrow_mut()
            .scripted
            .entry(Ipv4Addr::from(addr))
            .or_default()
            .extend(replies);
    }

    pub fn calls(&self) -> Vec<Ipv4Addr> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }
}

impl Pinger for FakePinger {
    async fn ping(
        &self,
        target: Ipv4Addr,
        _timeout: Duration,
        _payload: &[u8],
    ) -> anyhow::Result<bool> {
        let mut state = self.state.borrow_mut();
        state.calls.push(target);
        if let Some(reply) = state.scripted.get_mut(&target).and_then(VecDeque::pop_front) {
            return reply.map_err(anyhow::Error::msg);
        }
        Ok(state.reachable.contains(&target))
    }
}

/// Formatted tracing output collected by [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's events, debug and up, into a buffer until the guard drops.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let sink = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .without_time()
        .with_writer(move || sink.clone())
        .finish();
    (buffer, tracing::subscriber::set_default(subscriber))
}
