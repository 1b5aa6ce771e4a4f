//! Notification endpoint reachability.
//!
//! The watchdog never sends notifications itself. After a reset it checks that
//! the configured endpoint is reachable and logs [`event::NOTIFICATION_TRIGGERED`];
//! whatever watches the event log for that code does the delivery.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::time::sleep;

use crate::event;
use crate::ping::{Pinger, PING_PAYLOAD};

pub const NOTIFY_ATTEMPTS: u32 = 3;
pub const NOTIFY_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEndpoint {
    /// Probed with an HTTP GET
    Url(String),
    /// Host name or address, probed with ping
    Host(String),
}

impl NotifyEndpoint {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        let lower = value.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Some(NotifyEndpoint::Url(value.to_string()))
        } else {
            Some(NotifyEndpoint::Host(value.to_string()))
        }
    }

    /// One reachability check
    pub async fn is_reachable<P: Pinger>(&self, pinger: &P, timeout: Duration) -> bool {
        match self {
            NotifyEndpoint::Url(url) => test_url(url, timeout).await,
            NotifyEndpoint::Host(host) => match resolve_ipv4(host).await {
                Ok(addr) => pinger
                    .ping(addr, timeout, PING_PAYLOAD)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::debug!("Ping {} failed: {}", host, e);
                        false
                    }),
                Err(e) => {
                    tracing::debug!("Cannot resolve {}: {}", host, e);
                    false
                }
            },
        }
    }
}

impl std::fmt::Display for NotifyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyEndpoint::Url(s) | NotifyEndpoint::Host(s) => f.write_str(s),
        }
    }
}

/// Log the notification trigger for a reset once the endpoint answers.
pub async fn announce_reset<P: Pinger>(
    endpoint: &NotifyEndpoint,
    pinger: &P,
    timeout: Duration,
    adapter: &str,
    reason: &str,
) -> bool {
    for attempt in 1..=NOTIFY_ATTEMPTS {
        if endpoint.is_reachable(pinger, timeout).await {
            tracing::info!(
                event_code = event::NOTIFICATION_TRIGGERED,
                "Notification triggered for \"{}\" ({}) via {}",
                adapter,
                reason,
                endpoint
            );
            return true;
        }
        tracing::debug!(
            "Notification endpoint {} unreachable (attempt {}/{})",
            endpoint,
            attempt,
            NOTIFY_ATTEMPTS
        );
        if attempt < NOTIFY_ATTEMPTS {
            sleep(NOTIFY_RETRY_DELAY).await;
        }
    }
    tracing::warn!(
        event_code = event::NOTIFICATION_UNREACHABLE,
        "Notification endpoint {} unreachable, no notification for \"{}\"",
        endpoint,
        adapter
    );
    false
}

async fn resolve_ipv4(host: &str) -> anyhow::Result<Ipv4Addr> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    tokio::net::lookup_host((host, 0))
        .await?
        .find_map(|sa| match sa.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| anyhow::anyhow!("no IPv4 address for {}", host))
}

async fn test_url(url: &str, timeout: Duration) -> bool {
    tracing::debug!("Requesting {} (timeout {:?})", url, timeout);
    let client = reqwest::Client::new();
    let result = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false);
    tracing::debug!("{}: {}", url, if result { "OK" } else { "failed or timeout" });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePinger;
    use tokio::time::Instant;

    #[test]
    fn parse_distinguishes_urls_from_hosts() {
        assert_eq!(
            NotifyEndpoint::parse("HTTPS://hooks.example.org/reset"),
            Some(NotifyEndpoint::Url("HTTPS://hooks.example.org/reset".into()))
        );
        assert_eq!(
            NotifyEndpoint::parse(" smtp.example.org "),
            Some(NotifyEndpoint::Host("smtp.example.org".into()))
        );
        assert_eq!(NotifyEndpoint::parse("  "), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reachable_host_triggers_on_first_attempt() {
        let pinger = FakePinger::default();
        pinger.reachable([192, 168, 1, 25]);
        let endpoint = NotifyEndpoint::Host("192.168.1.25".into());
        assert!(announce_reset(&endpoint, &pinger, Duration::from_millis(100), "Ethernet", "APIPA address").await);
        assert_eq!(pinger.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_host_gives_up_after_three_attempts() {
        let pinger = FakePinger::default();
        let endpoint = NotifyEndpoint::Host("192.168.1.25".into());
        let start = Instant::now();
        assert!(!announce_reset(&endpoint, &pinger, Duration::from_millis(100), "Ethernet", "Stuck down").await);
        assert_eq!(pinger.calls().len(), 3);
        assert_eq!(start.elapsed(), NOTIFY_RETRY_DELAY * 2);
    }
}
