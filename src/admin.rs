//! Privilege check: enabling and disabling adapters needs an elevated process.

/// Fail unless running as administrator. Services run as LocalSystem and pass;
/// an unelevated console run is refused before any adapter is touched.
#[cfg(windows)]
pub fn ensure_admin() -> anyhow::Result<()> {
    use windows::Win32::UI::Shell::IsUserAnAdmin;

    if unsafe { IsUserAnAdmin() }.as_bool() {
        return Ok(());
    }
    anyhow::bail!(
        "Administrator rights required to enable/disable adapters. Run from an elevated prompt or as a service."
    )
}

/// Unix hosts rely on `ip link set` failing loudly without CAP_NET_ADMIN;
/// warn early when not root.
#[cfg(unix)]
pub fn ensure_admin() -> anyhow::Result<()> {
    let euid = unsafe { libc::geteuid() };
    if let Some(warning) = privilege_warning(euid) {
        tracing::warn!("{}", warning);
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
pub fn ensure_admin() -> anyhow::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn privilege_warning(euid: libc::uid_t) -> Option<&'static str> {
    (euid != 0).then_some("Not running as root; adapter resets will fail without CAP_NET_ADMIN")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn root_needs_no_warning() {
        assert_eq!(privilege_warning(0), None);
    }

    #[test]
    fn unprivileged_user_is_warned() {
        assert!(privilege_warning(1000).is_some_and(|w| w.contains("CAP_NET_ADMIN")));
    }
}
