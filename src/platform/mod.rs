//! Host adapter query and control.
//!
//! Windows hosts are driven through PowerShell and `netsh`, everything else
//! through iproute2. Both parsers are plain functions so they can be tested
//! on any host.

#[cfg_attr(windows, allow(dead_code))]
pub mod iproute;
#[cfg_attr(not(windows), allow(dead_code))]
pub mod netsh;

#[cfg(windows)]
pub type SystemBackend = netsh::NetshBackend;

#[cfg(not(windows))]
pub type SystemBackend = iproute::IpRouteBackend;

/// Log a failed command's output the way every backend command does.
pub(crate) fn log_command_failure(what: &str, out: &std::process::Output) {
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    if !stderr.trim().is_empty() {
        tracing::info!("{} failed: {}", what, stderr.trim());
    }
    if !stdout.trim().is_empty() {
        tracing::info!("{} output: {}", what, stdout.trim());
    }
}
