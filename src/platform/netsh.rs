//! Windows: adapter snapshots from PowerShell (`Get-NetAdapter`,
//! `Get-NetIPConfiguration`), enable/disable through `netsh`.

use std::net::Ipv4Addr;

use serde::Deserialize;
use tokio::process::Command;

use super::log_command_failure;
use crate::adapter::{AdapterSnapshot, Ipv4Config, NetworkBackend, OperationalStatus};

/// AddressFamily value of IPv4 DNS server entries
const AF_INET: u8 = 2;

fn adapter_query() -> String {
    format!(
        r#"$ErrorActionPreference = 'SilentlyContinue'
$out = @(Get-NetAdapter | ForEach-Object {{
  $ip = Get-NetIPConfiguration -InterfaceIndex $_.ifIndex
  [pscustomobject]@{{
    Name = $_.Name
    Description = $_.InterfaceDescription
    Status = [string]$_.Status
    Unicast = @($ip.IPv4Address | ForEach-Object {{ $_.IPAddress }})
    Gateways = @($ip.IPv4DefaultGateway | ForEach-Object {{ $_.NextHop }})
    Dns = @($ip.DNSServer | Where-Object {{ $_.AddressFamily -eq {} }} | ForEach-Object {{ $_.ServerAddresses }})
  }}
}})
ConvertTo-Json -InputObject $out -Depth 3 -Compress"#,
        AF_INET
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NetshBackend;

impl NetworkBackend for NetshBackend {
    async fn adapters(&self) -> anyhow::Result<Vec<AdapterSnapshot>> {
        let stdout = powershell(&adapter_query()).await?;
        parse_adapters(&stdout)
    }

    async fn status(&self, name: &str) -> anyhow::Result<OperationalStatus> {
        let script = format!(
            "(Get-NetAdapter -Name '{}' -ErrorAction SilentlyContinue).Status",
            name.replace('\'', "''")
        );
        let stdout = powershell(&script).await?;
        Ok(match stdout.trim() {
            "" => OperationalStatus::NotPresent,
            status => parse_status(status),
        })
    }

    async fn set_interface_enabled(&self, name: &str, enabled: bool) -> anyhow::Result<bool> {
        let admin = if enabled { "admin=enable" } else { "admin=disable" };
        tracing::debug!("netsh interface set interface name=\"{}\" {}", name, admin);
        let out = Command::new("netsh")
            .args([
                "interface",
                "set",
                "interface",
                &format!("name=\"{}\"", name),
                admin,
            ])
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run netsh: {}", e))?;

        if !out.status.success() {
            log_command_failure(&format!("netsh {} \"{}\"", admin, name), &out);
        }
        Ok(out.status.success())
    }
}

async fn powershell(script: &str) -> anyhow::Result<String> {
    let out = Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", script])
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run PowerShell: {}", e))?;
    if !out.status.success() {
        log_command_failure("PowerShell", &out);
        anyhow::bail!("PowerShell exited with {}", out.status);
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawAdapter {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    unicast: Option<Vec<String>>,
    #[serde(default)]
    gateways: Option<Vec<String>>,
    #[serde(default)]
    dns: Option<Vec<String>>,
}

/// Parse the query output. An entry that does not parse is logged and left
/// out; only a document that is not a JSON array is an error.
pub fn parse_adapters(json: &str) -> anyhow::Result<Vec<AdapterSnapshot>> {
    let json = json.trim();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| anyhow::anyhow!("Adapter query returned invalid JSON: {}", e))?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| match snapshot_from(entry) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Skipping adapter: {}", e);
                None
            }
        })
        .collect())
}

fn snapshot_from(entry: serde_json::Value) -> anyhow::Result<AdapterSnapshot> {
    let raw: RawAdapter = serde_json::from_value(entry)?;
    let unicast = addresses(&raw.name, raw.unicast)?;
    let ipv4 = if unicast.is_empty() {
        None
    } else {
        Some(Ipv4Config {
            unicast,
            gateways: addresses(&raw.name, raw.gateways)?,
            dns: addresses(&raw.name, raw.dns)?,
        })
    };
    Ok(AdapterSnapshot {
        status: raw
            .status
            .as_deref()
            .map(parse_status)
            .unwrap_or(OperationalStatus::Down),
        description: raw.description.unwrap_or_default(),
        name: raw.name,
        ipv4,
    })
}

fn addresses(name: &str, raw: Option<Vec<String>>) -> anyhow::Result<Vec<Ipv4Addr>> {
    raw.unwrap_or_default()
        .iter()
        .map(|a| {
            a.trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("\"{}\": bad IPv4 address \"{}\"", name, a))
        })
        .collect()
}

fn parse_status(status: &str) -> OperationalStatus {
    match status.trim().to_ascii_lowercase().as_str() {
        "up" => OperationalStatus::Up,
        "not present" | "notpresent" => OperationalStatus::NotPresent,
        _ => OperationalStatus::Down,
    }
}
