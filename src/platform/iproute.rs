//! iproute2 hosts: `ip -j addr`, `ip -j route`, resolv.conf nameservers and
//! `ip link set`.

use std::net::Ipv4Addr;

use serde::Deserialize;
use tokio::process::Command;

use super::log_command_failure;
use crate::adapter::{AdapterSnapshot, Ipv4Config, NetworkBackend, OperationalStatus};

const RESOLV_CONF: &str = "/etc/resolv.conf";

#[derive(Debug, Clone, Copy, Default)]
pub struct IpRouteBackend;

impl NetworkBackend for IpRouteBackend {
    async fn adapters(&self) -> anyhow::Result<Vec<AdapterSnapshot>> {
        let links = ip_json(&["-j", "addr", "show"]).await?;
        let routes = ip_json(&["-j", "-4", "route", "show", "default"]).await?;
        let resolv = tokio::fs::read_to_string(RESOLV_CONF)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!("Cannot read {}: {}", RESOLV_CONF, e);
                String::new()
            });
        parse_adapters(&links, &routes, &resolv)
    }

    async fn status(&self, name: &str) -> anyhow::Result<OperationalStatus> {
        let out = Command::new("ip")
            .args(["-j", "link", "show", "dev", name])
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run ip: {}", e))?;
        if !out.status.success() {
            // "Device does not exist"
            return Ok(OperationalStatus::NotPresent);
        }
        let links: Vec<RawLink> = serde_json::from_slice(&out.stdout)?;
        Ok(links
            .first()
            .map(RawLink::status)
            .unwrap_or(OperationalStatus::NotPresent))
    }

    async fn set_interface_enabled(&self, name: &str, enabled: bool) -> anyhow::Result<bool> {
        let state = if enabled { "up" } else { "down" };
        tracing::debug!("ip link set dev {} {}", name, state);
        let out = Command::new("ip")
            .args(["link", "set", "dev", name, state])
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run ip: {}", e))?;
        if !out.status.success() {
            log_command_failure(&format!("ip link set {} {}", name, state), &out);
        }
        Ok(out.status.success())
    }
}

async fn ip_json(args: &[&str]) -> anyhow::Result<String> {
    let out = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run ip: {}", e))?;
    if !out.status.success() {
        log_command_failure(&format!("ip {}", args.join(" ")), &out);
        anyhow::bail!("ip {} exited with {}", args.join(" "), out.status);
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

#[derive(Debug, Deserialize)]
struct RawLink {
    ifname: String,
    #[serde(default)]
    operstate: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    link_type: Option<String>,
    #[serde(default)]
    ifalias: Option<String>,
    #[serde(default)]
    addr_info: Vec<RawAddr>,
}

#[derive(Debug, Deserialize)]
struct RawAddr {
    family: String,
    local: String,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    #[serde(default)]
    gateway: Option<String>,
    dev: String,
}

impl RawLink {
    fn status(&self) -> OperationalStatus {
        let flag = |f: &str| self.flags.iter().any(|x| x == f);
        match self.operstate.as_deref() {
            Some("UP") => OperationalStatus::Up,
            // tun/ppp links report UNKNOWN while carrying traffic
            Some("UNKNOWN") if flag("UP") && flag("LOWER_UP") => OperationalStatus::Up,
            Some("NOTPRESENT") => OperationalStatus::NotPresent,
            _ => OperationalStatus::Down,
        }
    }
}

/// Build snapshots from `ip -j addr`, `ip -j -4 route show default` and the
/// resolver configuration. Nameservers are host-wide, so every adapter gets
/// the same DNS list.
pub fn parse_adapters(
    links_json: &str,
    routes_json: &str,
    resolv_conf: &str,
) -> anyhow::Result<Vec<AdapterSnapshot>> {
    let links: Vec<serde_json::Value> = serde_json::from_str(links_json)
        .map_err(|e| anyhow::anyhow!("ip addr returned invalid JSON: {}", e))?;
    let routes: Vec<RawRoute> = if routes_json.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(routes_json)
            .map_err(|e| anyhow::anyhow!("ip route returned invalid JSON: {}", e))?
    };
    let dns = nameservers(resolv_conf);

    Ok(links
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawLink>(value) {
            Ok(link) => Some(snapshot(link, &routes, &dns)),
            Err(e) => {
                tracing::warn!("Skipping link: {}", e);
                None
            }
        })
        .collect())
}

fn snapshot(link: RawLink, routes: &[RawRoute], dns: &[Ipv4Addr]) -> AdapterSnapshot {
    let unicast: Vec<Ipv4Addr> = link
        .addr_info
        .iter()
        .filter(|a| a.family == "inet")
        .filter_map(|a| a.local.parse().ok())
        .collect();
    let gateways = routes
        .iter()
        .filter(|r| r.dev == link.ifname)
        .filter_map(|r| r.gateway.as_deref()?.parse().ok())
        .collect();
    let status = link.status();
    AdapterSnapshot {
        description: link
            .ifalias
            .clone()
            .or_else(|| link.link_type.clone())
            .unwrap_or_default(),
        status,
        ipv4: (!unicast.is_empty()).then(|| Ipv4Config {
            unicast,
            gateways,
            dns: dns.to_vec(),
        }),
        name: link.ifname,
    }
}

fn nameservers(resolv_conf: &str) -> Vec<Ipv4Addr> {
    resolv_conf
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("nameserver"), Some(addr)) => addr.parse().ok(),
                _ => None,
            }
        })
        .collect()
}
