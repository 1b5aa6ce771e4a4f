//! Adapter inventory (built once) and the per-tick status refresh.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::adapter::{AdapterSnapshot, MonitoredAdapter, NetworkBackend, OperationalStatus};

/// Enumerate adapters and keep the ones worth watching.
pub async fn build_inventory<B: NetworkBackend>(
    backend: &B,
    skip_list: &[String],
) -> anyhow::Result<Vec<MonitoredAdapter>> {
    let snapshots = backend.adapters().await?;
    let adapters = select_adapters(&snapshots, skip_list);
    tracing::info!(
        "Monitoring {} of {} adapter(s): {:?}",
        adapters.len(),
        snapshots.len(),
        adapters.iter().map(|a| a.name.as_str()).collect::<Vec<_>>()
    );
    Ok(adapters)
}

/// Exclude adapters matching a skip-list keyword or lacking IPv4, and take
/// their initial snapshot.
pub fn select_adapters(snapshots: &[AdapterSnapshot], skip_list: &[String]) -> Vec<MonitoredAdapter> {
    let skip: Vec<String> = skip_list.iter().map(|k| k.to_uppercase()).collect();
    let host = host_addresses(snapshots);

    snapshots
        .iter()
        .filter(|s| {
            let name = s.name.to_uppercase();
            let description = s.description.to_uppercase();
            if let Some(keyword) = skip
                .iter()
                .find(|k| name.contains(k.as_str()) || description.contains(k.as_str()))
            {
                tracing::debug!("Skipping \"{}\" (matches \"{}\")", s.name, keyword);
                return false;
            }
            let has_ipv4 = s.ipv4.as_ref().is_some_and(|ip| !ip.unicast.is_empty());
            if !has_ipv4 {
                tracing::debug!("Skipping \"{}\" (no IPv4 configuration)", s.name);
            }
            has_ipv4
        })
        .map(|s| {
            let mut adapter = MonitoredAdapter::new(&s.name, &s.description);
            apply_snapshot(&mut adapter, Some(s), &host);
            adapter
        })
        .collect()
}

/// Re-read every monitored adapter from one enumeration so that all decisions
/// in a tick see the same snapshot.
pub async fn refresh_all<B: NetworkBackend>(
    backend: &B,
    adapters: &mut [MonitoredAdapter],
) -> anyhow::Result<()> {
    let snapshots = backend.adapters().await?;
    apply_all(adapters, &snapshots);
    Ok(())
}

pub fn apply_all(adapters: &mut [MonitoredAdapter], snapshots: &[AdapterSnapshot]) {
    let host = host_addresses(snapshots);
    for adapter in adapters.iter_mut() {
        let live = snapshots.iter().find(|s| adapter.matches(&s.name));
        apply_snapshot(adapter, live, &host);
    }
}

fn apply_snapshot(
    adapter: &mut MonitoredAdapter,
    live: Option<&AdapterSnapshot>,
    host: &HashSet<Ipv4Addr>,
) {
    let Some(live) = live else {
        if adapter.status != OperationalStatus::NotPresent {
            tracing::debug!("Adapter \"{}\" not present", adapter.name);
        }
        adapter.status = OperationalStatus::NotPresent;
        adapter.self_assigned = false;
        return;
    };

    adapter.status = live.status;
    match &live.ipv4 {
        Some(ip) => {
            adapter.self_assigned = ip.unicast.iter().any(Ipv4Addr::is_link_local);
            adapter.gateways = peers(&ip.gateways, host);
            adapter.dns = peers(&ip.dns, host);
        }
        None => {
            adapter.self_assigned = false;
            adapter.gateways.clear();
            adapter.dns.clear();
        }
    }
}

/// Every unicast address owned by this host
fn host_addresses(snapshots: &[AdapterSnapshot]) -> HashSet<Ipv4Addr> {
    snapshots
        .iter()
        .filter_map(|s| s.ipv4.as_ref())
        .flat_map(|ip| ip.unicast.iter().copied())
        .collect()
}

/// Deduplicate, dropping loopback, unspecified and our own addresses.
fn peers(addrs: &[Ipv4Addr], host: &HashSet<Ipv4Addr>) -> Vec<Ipv4Addr> {
    let mut seen = HashSet::new();
    addrs
        .iter()
        .copied()
        .filter(|a| !a.is_loopback() && !a.is_unspecified() && !host.contains(a))
        .filter(|a| seen.insert(*a))
        .collect()
}
