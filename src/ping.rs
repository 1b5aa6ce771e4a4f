//! ICMP echo via the OS ping utility.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::process::Command;

/// Payload carried by every probe so captures can attribute the traffic
pub const PING_PAYLOAD: &[u8] = concat!("apipa-watchdog ", env!("CARGO_PKG_VERSION")).as_bytes();

/// ICMP echo capability
#[allow(async_fn_in_trait)]
pub trait Pinger {
    /// `Ok(true)` on an echo reply within `timeout`, `Ok(false)` on no reply.
    /// `Err` is a transport-level failure (the echo could not be sent at all).
    async fn ping(&self, target: Ipv4Addr, timeout: Duration, payload: &[u8])
        -> anyhow::Result<bool>;
}

/// Runs `ping` with a single echo request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPinger;

impl Pinger for SystemPinger {
    async fn ping(
        &self,
        target: Ipv4Addr,
        timeout: Duration,
        payload: &[u8],
    ) -> anyhow::Result<bool> {
        let args = ping_args(target, timeout, payload.len());
        tracing::trace!("ping {}", args.join(" "));
        let out = Command::new("ping")
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run ping: {}", e))?;

        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(reply_received(out.status.success(), &stdout))
    }
}

#[cfg(windows)]
fn ping_args(target: Ipv4Addr, timeout: Duration, payload_len: usize) -> Vec<String> {
    vec![
        "-n".into(),
        "1".into(),
        "-w".into(),
        timeout.as_millis().max(1).to_string(),
        "-l".into(),
        payload_len.to_string(),
        target.to_string(),
    ]
}

#[cfg(not(windows))]
fn ping_args(target: Ipv4Addr, timeout: Duration, payload_len: usize) -> Vec<String> {
    // -W takes whole seconds
    let secs = timeout.as_millis().div_ceil(1000).max(1);
    vec![
        "-n".into(),
        "-c".into(),
        "1".into(),
        "-W".into(),
        secs.to_string(),
        "-s".into(),
        payload_len.to_string(),
        target.to_string(),
    ]
}

/// Windows ping exits 0 on "Destination host unreachable" replies from a
/// router, so a real echo reply is recognised by its TTL field.
fn reply_received(success: bool, stdout: &str) -> bool {
    if cfg!(windows) {
        success && stdout.to_uppercase().contains("TTL=")
    } else {
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_one_echo_and_payload_length() {
        let args = ping_args(Ipv4Addr::new(10, 0, 0, 1), Duration::from_millis(1500), 32);
        assert_eq!(args.last().map(String::as_str), Some("10.0.0.1"));
        assert!(args.iter().any(|a| a == "32"));
        assert!(args.iter().any(|a| a == "1"));
    }

    #[cfg(not(windows))]
    #[test]
    fn sub_second_timeout_rounds_up_to_one_second() {
        let args = ping_args(Ipv4Addr::new(10, 0, 0, 1), Duration::from_millis(50), 8);
        let pos = args.iter().position(|a| a == "-W").unwrap();
        assert_eq!(args[pos + 1], "1");
    }

    #[test]
    fn failed_exit_is_never_a_reply() {
        assert!(!reply_received(false, "Reply from 10.0.0.1: bytes=32 time<1ms TTL=64"));
    }
}
