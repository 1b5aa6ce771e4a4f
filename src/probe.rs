//! Connectivity prober: bounded-retry pings against an adapter's DNS and
//! gateway peers.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::time::sleep;

use crate::adapter::MonitoredAdapter;
use crate::event;
use crate::ping::Pinger;

/// Ping rounds per target index
pub const ROUNDS: u32 = 3;

/// Pause between failed rounds
pub const ROUND_BACKOFF: Duration = Duration::from_secs(2);

/// Probe every target index of `adapter`. Healthy if any index answered, or
/// if the adapter has no peers to test.
pub async fn probe<P: Pinger>(
    pinger: &P,
    adapter: &MonitoredAdapter,
    timeout: Duration,
    fails_before_log: u32,
    payload: &[u8],
) -> bool {
    let width = adapter.dns.len().max(adapter.gateways.len());
    if width == 0 {
        tracing::debug!("\"{}\" has no gateway or DNS peers, skipping probe", adapter.name);
        return true;
    }

    let mut healthy = false;
    for j in 0..width {
        let targets: Vec<Ipv4Addr> = [adapter.dns.get(j), adapter.gateways.get(j)]
            .into_iter()
            .flatten()
            .copied()
            .collect();
        if probe_index(pinger, &adapter.name, &targets, timeout, fails_before_log, payload).await {
            tracing::debug!("\"{}\" index {} reachable via {:?}", adapter.name, j, targets);
            healthy = true;
        } else {
            tracing::warn!("\"{}\": no reply from {:?}", adapter.name, targets);
        }
    }
    healthy
}

/// Up to [`ROUNDS`] rounds; each round tries the DNS peer first and falls back
/// to the gateway at the same index.
async fn probe_index<P: Pinger>(
    pinger: &P,
    adapter: &str,
    targets: &[Ipv4Addr],
    timeout: Duration,
    fails_before_log: u32,
    payload: &[u8],
) -> bool {
    for round in 1..=ROUNDS {
        for &target in targets {
            match pinger.ping(target, timeout, payload).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    if round > fails_before_log {
                        tracing::info!(event_code = event::PING_ERROR, "Ping {}: {}", target, e);
                    }
                }
            }
        }
        if round > fails_before_log {
            tracing::warn!(
                event_code = round,
                "Ping {} failed on \"{}\" ({:?})",
                round,
                adapter,
                targets
            );
        }
        if round < ROUNDS {
            sleep(ROUND_BACKOFF).await;
        }
    }
    false
}

/// Update the consecutive-failure counter. Returns true when the threshold is
/// reached, in which case the counter starts over.
pub fn record_outcome(adapter: &mut MonitoredAdapter, healthy: bool, threshold: u32) -> bool {
    if healthy {
        adapter.connectivity_failures = 0;
        return false;
    }
    adapter.connectivity_failures += 1;
    tracing::warn!(
        "Connectivity probe failed on \"{}\" ({}/{})",
        adapter.name,
        adapter.connectivity_failures,
        threshold
    );
    if adapter.connectivity_failures >= threshold {
        adapter.connectivity_failures = 0;
        return true;
    }
    false
}
