//! Event codes attached to log entries as the `event_code` field.
//!
//! External tooling (scheduled tasks, log shippers) keys on these numbers, so
//! they are stable across releases.

pub const SERVICE_STARTED: u32 = 1011;
pub const SERVICE_STOPPED: u32 = 1001;
pub const SERVICE_PAUSED: u32 = 1002;
pub const SERVICE_RESUMED: u32 = 1003;

pub const ARGUMENTS: u32 = 41;
pub const ARGUMENTS_INVALID: u32 = 49;

/// Transport-level error on a single ping attempt
pub const PING_ERROR: u32 = 10;

pub const RESET_APIPA: u32 = 9999;
pub const RESET_PINGS_FAILING: u32 = 9998;
pub const RESET_STUCK_DOWN: u32 = 10002;

pub const DISABLE_FAILED: u32 = 10000;
pub const ENABLE_FAILED: u32 = 10001;

pub const NOTIFICATION_TRIGGERED: u32 = 10003;
pub const NOTIFICATION_UNREACHABLE: u32 = 10004;
