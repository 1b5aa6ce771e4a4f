//! The evaluation pass run on every poll tick.

use tokio::time::{sleep, Instant};

use crate::adapter::{MonitoredAdapter, NetworkBackend, OperationalStatus};
use crate::config::ServiceConfig;
use crate::inventory;
use crate::ping::{Pinger, PING_PAYLOAD};
use crate::probe;
use crate::recovery::{self, ResetPhase, ResetReason};

/// Timing state owned by the scheduler
#[derive(Debug, Clone)]
pub struct RunState {
    pub phase: ResetPhase,
    pub last_connectivity_test: Instant,
}

impl RunState {
    pub fn new(now: Instant) -> Self {
        Self {
            phase: ResetPhase::Stable,
            last_connectivity_test: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Inside the post-reset holdoff, nothing evaluated
    Holdoff,
    /// Adapter enumeration failed, nothing evaluated
    Skipped,
    Evaluated { connectivity_tested: bool },
    Reset { adapter: String, reason: ResetReason },
}

pub struct Monitor<B, P> {
    backend: B,
    pinger: P,
    config: ServiceConfig,
    adapters: Vec<MonitoredAdapter>,
    state: RunState,
}

impl<B: NetworkBackend, P: Pinger> Monitor<B, P> {
    /// Build the inventory and start the clocks. A failed enumeration is
    /// retried every poll interval until it succeeds.
    pub async fn start(backend: B, pinger: P, config: ServiceConfig) -> Self {
        let adapters = loop {
            match inventory::build_inventory(&backend, &config.skip_list).await {
                Ok(adapters) => break adapters,
                Err(e) => {
                    tracing::error!(
                        "Adapter enumeration failed, retrying in {:?}: {}",
                        config.poll_interval,
                        e
                    );
                    sleep(config.poll_interval).await;
                }
            }
        };
        Self::with_adapters(backend, pinger, config, adapters)
    }

    pub fn with_adapters(
        backend: B,
        pinger: P,
        config: ServiceConfig,
        adapters: Vec<MonitoredAdapter>,
    ) -> Self {
        Self {
            backend,
            pinger,
            config,
            adapters,
            state: RunState::new(Instant::now()),
        }
    }

    #[cfg(test)]
    pub fn adapters(&self) -> &[MonitoredAdapter] {
        &self.adapters
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Restart the clocks after a pause so neither an expired holdoff nor an
    /// overdue connectivity test fires on the first tick back.
    pub fn resume(&mut self) {
        let now = Instant::now();
        self.state.last_connectivity_test = now;
        if let ResetPhase::InHoldoff { .. } = self.state.phase {
            self.state.phase = ResetPhase::InHoldoff { since: now };
        }
    }

    /// One scheduled evaluation pass.
    pub async fn tick(&mut self) -> TickOutcome {
        let now = Instant::now();
        if self.state.phase.in_holdoff(now, self.config.holdoff) {
            return TickOutcome::Holdoff;
        }

        let connectivity_tick = now.saturating_duration_since(self.state.last_connectivity_test)
            >= self.config.connectivity_cadence();
        if connectivity_tick {
            self.state.last_connectivity_test = now;
        }
        self.evaluate(connectivity_tick).await
    }

    /// Evaluation pass with the connectivity test forced on, ignoring holdoff.
    pub async fn run_once(&mut self) -> TickOutcome {
        self.state.last_connectivity_test = Instant::now();
        self.evaluate(true).await
    }

    async fn evaluate(&mut self, connectivity_tick: bool) -> TickOutcome {
        if let Err(e) = inventory::refresh_all(&self.backend, &mut self.adapters).await {
            tracing::warn!("Adapter refresh failed, skipping this tick: {}", e);
            return TickOutcome::Skipped;
        }

        for i in 0..self.adapters.len() {
            let adapter = &self.adapters[i];
            if adapter.status != OperationalStatus::Up || adapter.retry_enable {
                tracing::debug!(
                    "\"{}\" is {} (retry enable: {})",
                    adapter.name,
                    adapter.status,
                    adapter.retry_enable
                );
                return self.reset(i, ResetReason::StuckDown).await;
            }
        }

        for i in 0..self.adapters.len() {
            if self.adapters[i].self_assigned {
                return self.reset(i, ResetReason::SelfAssigned).await;
            }
            if !connectivity_tick {
                continue;
            }
            let healthy = probe::probe(
                &self.pinger,
                &self.adapters[i],
                self.config.ping_timeout,
                self.config.fails_before_log,
                PING_PAYLOAD,
            )
            .await;
            if probe::record_outcome(&mut self.adapters[i], healthy, self.config.fails_before_reset)
            {
                return self.reset(i, ResetReason::PingsFailing).await;
            }
        }

        tracing::debug!(
            "Tick complete, {} adapter(s) evaluated{}",
            self.adapters.len(),
            if connectivity_tick { ", connectivity tested" } else { "" }
        );
        TickOutcome::Evaluated {
            connectivity_tested: connectivity_tick,
        }
    }

    /// A reset opens the holdoff, so it ends the pass.
    async fn reset(&mut self, index: usize, reason: ResetReason) -> TickOutcome {
        let adapter = &mut self.adapters[index];
        recovery::reset_adapter(
            &self.backend,
            &self.pinger,
            &self.config,
            adapter,
            reason,
            &mut self.state.phase,
        )
        .await;
        TickOutcome::Reset {
            adapter: adapter.name.clone(),
            reason,
        }
    }
}
