//! Service lifecycle: the poll timer and start/pause/resume/stop control.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::adapter::NetworkBackend;
use crate::event;
use crate::monitor::Monitor;
use crate::ping::Pinger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Running,
    Paused,
    Stopped,
}

/// Control side of a running service. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    tx: Arc<watch::Sender<Control>>,
}

impl ServiceHandle {
    pub fn new() -> (Self, watch::Receiver<Control>) {
        let (tx, rx) = watch::channel(Control::Running);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Stop scheduling ticks. A tick already running completes.
    pub fn pause(&self) {
        self.tx.send_if_modified(|c| {
            let modified = *c == Control::Running;
            if modified {
                *c = Control::Paused;
            }
            modified
        });
    }

    pub fn resume(&self) {
        self.tx.send_if_modified(|c| {
            let modified = *c == Control::Paused;
            if modified {
                *c = Control::Running;
            }
            modified
        });
    }

    pub fn stop(&self) {
        self.tx.send_replace(Control::Stopped);
    }
}

/// Drive `monitor` on its poll interval until stopped. Ticks run one at a
/// time: the timer is not polled while a tick is in progress.
pub async fn run<B: NetworkBackend, P: Pinger>(
    monitor: &mut Monitor<B, P>,
    mut control: watch::Receiver<Control>,
) {
    let poll = monitor.config().poll_interval;
    let mut timer = interval_at(Instant::now() + poll, poll);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!("Polling every {:?}", poll);

    let mut last = Control::Running;
    loop {
        let current = *control.borrow_and_update();
        if current != last {
            match current {
                Control::Paused => {
                    tracing::info!(event_code = event::SERVICE_PAUSED, "Monitoring paused")
                }
                Control::Running => {
                    monitor.resume();
                    timer.reset();
                    tracing::info!(event_code = event::SERVICE_RESUMED, "Monitoring resumed");
                }
                Control::Stopped => {}
            }
            last = current;
        }

        match current {
            Control::Stopped => break,
            Control::Paused => {
                if control.changed().await.is_err() {
                    break;
                }
            }
            Control::Running => {
                tokio::select! {
                    _ = timer.tick() => {
                        let outcome = monitor.tick().await;
                        tracing::trace!("Tick: {:?}", outcome);
                    }
                    changed = control.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    tracing::info!(event_code = event::SERVICE_STOPPED, "Monitoring stopped");
}
