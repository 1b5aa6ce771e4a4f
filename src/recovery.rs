//! Reset state machine and the disable/enable protocol with verification.

use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::adapter::{MonitoredAdapter, NetworkBackend, OperationalStatus};
use crate::config::ServiceConfig;
use crate::event;
use crate::notify;
use crate::ping::Pinger;

/// netsh invocations per direction
pub const COMMAND_ATTEMPTS: u32 = 5;
/// Wait after each invocation before polling status
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);
pub const VERIFY_POLLS: u32 = 10;
pub const VERIFY_INTERVAL: Duration = Duration::from_millis(250);
/// Gap between disable and enable
pub const POWER_CYCLE_GAP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    StuckDown,
    SelfAssigned,
    PingsFailing,
}

impl ResetReason {
    pub fn event_code(self) -> u32 {
        match self {
            ResetReason::StuckDown => event::RESET_STUCK_DOWN,
            ResetReason::SelfAssigned => event::RESET_APIPA,
            ResetReason::PingsFailing => event::RESET_PINGS_FAILING,
        }
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResetReason::StuckDown => "Stuck down",
            ResetReason::SelfAssigned => "APIPA address",
            ResetReason::PingsFailing => "Pings failing",
        })
    }
}

/// Global reset state. One holdoff covers every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPhase {
    Stable,
    PendingReset(ResetReason),
    InHoldoff { since: Instant },
}

impl ResetPhase {
    /// True while the holdoff window is open; an expired holdoff drops back
    /// to `Stable`.
    pub fn in_holdoff(&mut self, now: Instant, holdoff: Duration) -> bool {
        if let ResetPhase::InHoldoff { since } = *self {
            if now.saturating_duration_since(since) > holdoff {
                self.advance(ResetPhase::Stable);
                return false;
            }
            return true;
        }
        false
    }

    /// Move to `next`, logging the transition.
    pub fn advance(&mut self, next: ResetPhase) {
        tracing::debug!("Reset phase: {:?} -> {:?}", self, next);
        *self = next;
    }

    #[cfg(test)]
    pub fn last_reset(&self) -> Option<Instant> {
        match *self {
            ResetPhase::InHoldoff { since } => Some(since),
            _ => None,
        }
    }
}

/// Power-cycle one adapter and enter holdoff.
pub async fn reset_adapter<B: NetworkBackend, P: Pinger>(
    backend: &B,
    pinger: &P,
    config: &ServiceConfig,
    adapter: &mut MonitoredAdapter,
    reason: ResetReason,
    phase: &mut ResetPhase,
) {
    phase.advance(ResetPhase::PendingReset(reason));
    let code = reason.event_code();
    tracing::error!(
        event_code = code,
        adapter = %adapter.name,
        "{} on interface: {} ({}), resetting",
        reason,
        adapter.name,
        adapter.description
    );

    set_adapter_state(backend, adapter, false).await;
    sleep(POWER_CYCLE_GAP).await;
    set_adapter_state(backend, adapter, true).await;

    phase.advance(ResetPhase::InHoldoff {
        since: Instant::now(),
    });

    if let Some(ref endpoint) = config.notify {
        notify::announce_reset(
            endpoint,
            pinger,
            config.ping_timeout,
            &adapter.name,
            &reason.to_string(),
        )
        .await;
    }
}

/// Drive the adapter to enabled/disabled and confirm it through status polls.
/// Gives up after [`COMMAND_ATTEMPTS`] invocations; a failed enable marks the
/// adapter for retry on the next tick.
pub async fn set_adapter_state<B: NetworkBackend>(
    backend: &B,
    adapter: &mut MonitoredAdapter,
    enabled: bool,
) -> bool {
    let verb = if enabled { "enable" } else { "disable" };
    for attempt in 1..=COMMAND_ATTEMPTS {
        match backend.set_interface_enabled(&adapter.name, enabled).await {
            Ok(true) => {}
            Ok(false) => tracing::info!(
                "{} \"{}\" reported failure (attempt {}/{})",
                verb,
                adapter.name,
                attempt,
                COMMAND_ATTEMPTS
            ),
            Err(e) => tracing::info!("{} \"{}\" failed: {}", verb, adapter.name, e),
        }

        sleep(SETTLE_DELAY).await;
        for _ in 0..VERIFY_POLLS {
            adapter.status = backend.status(&adapter.name).await.unwrap_or_else(|e| {
                tracing::debug!("Status query for \"{}\" failed: {}", adapter.name, e);
                OperationalStatus::NotPresent
            });
            if (adapter.status == OperationalStatus::Up) == enabled {
                tracing::info!("Interface \"{}\" {}d (attempt {})", adapter.name, verb, attempt);
                if enabled {
                    adapter.retry_enable = false;
                }
                return true;
            }
            sleep(VERIFY_INTERVAL).await;
        }
    }

    let code = if enabled {
        event::ENABLE_FAILED
    } else {
        event::DISABLE_FAILED
    };
    tracing::error!(
        event_code = code,
        adapter = %adapter.name,
        "Failed to {} interface \"{}\"",
        verb,
        adapter.name
    );
    if enabled {
        adapter.retry_enable = true;
    }
    false
}
