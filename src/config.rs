//! Service configuration: the `-i N -g N ...` argument list and its merge layers.

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::notify::NotifyEndpoint;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_CONNECTIVITY_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_FAILS_BEFORE_LOG: u32 = 0;
pub const DEFAULT_FAILS_BEFORE_RESET: u32 = 3;
pub const DEFAULT_HOLDOFF_SECS: u64 = 30;

/// Adapters whose name or description contains one of these are never monitored
pub const DEFAULT_SKIP_LIST: &[&str] = &[
    "LOOPBACK",
    "MICROSOFT FAILOVER CLUSTER VIRTUAL ADAPTER",
    "APIPA",
];

/// Subtracted from the connectivity-test interval so a cadence that is a
/// multiple of the poll interval fires on its tick instead of the next one.
const CADENCE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid argument: {0}")]
    InvalidArguments(String),

    #[error("Failed to read persisted arguments from {path}: {source}")]
    Persisted {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: &'static str,
    },
}

/// One layer of service arguments. Unset fields leave the lower layer untouched.
#[derive(Parser, Debug, Default, Clone, PartialEq, Eq)]
#[command(
    name = "service-args",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct ServiceArgs {
    /// Poll interval in milliseconds
    #[arg(short = 'i', value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Connectivity test interval in seconds
    #[arg(short = 'g', value_name = "SECS")]
    pub connectivity_interval_secs: Option<u64>,

    /// Ping timeout in milliseconds
    #[arg(short = 't', value_name = "MS")]
    pub ping_timeout_ms: Option<u64>,

    /// Failed ping rounds before a failure is logged
    #[arg(short = 'l', value_name = "N")]
    pub fails_before_log: Option<u32>,

    /// Consecutive failed connectivity probes before an adapter reset
    #[arg(short = 'f', value_name = "N")]
    pub fails_before_reset: Option<u32>,

    /// Holdoff after a reset in seconds
    #[arg(short = 'h', value_name = "SECS")]
    pub holdoff_secs: Option<u64>,

    /// Notification endpoint (host name, address or http(s) URL)
    #[arg(short = 'm', value_name = "HOST")]
    pub notify: Option<String>,

    /// Debug logging
    #[arg(short = 'd')]
    pub debug: bool,

    /// Skip-list keywords, comma-separated
    #[arg(short = 's', value_name = "KEYWORDS", value_delimiter = ',')]
    pub skip: Option<Vec<String>>,
}

impl ServiceArgs {
    /// Parse an argument list. Any malformed token rejects the whole list.
    pub fn parse_tokens<I, S>(tokens: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| normalize_switch(t.as_ref()))
            .collect();
        Self::try_parse_from(&tokens).map_err(|e| {
            let msg = e.to_string();
            let first = msg.lines().next().unwrap_or_default();
            ConfigError::InvalidArguments(
                first.trim_start_matches("error: ").trim().to_string(),
            )
        })
    }

    /// Read a persisted argument list: whitespace-separated tokens, `#` comments.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Persisted {
            path: path.display().to_string(),
            source,
        })?;
        let tokens = text
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default())
            .flat_map(str::split_whitespace);
        Self::parse_tokens(tokens)
    }

    /// Apply `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: ServiceArgs) -> ServiceArgs {
        ServiceArgs {
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            connectivity_interval_secs: other
                .connectivity_interval_secs
                .or(self.connectivity_interval_secs),
            ping_timeout_ms: other.ping_timeout_ms.or(self.ping_timeout_ms),
            fails_before_log: other.fails_before_log.or(self.fails_before_log),
            fails_before_reset: other.fails_before_reset.or(self.fails_before_reset),
            holdoff_secs: other.holdoff_secs.or(self.holdoff_secs),
            notify: other.notify.or(self.notify),
            debug: self.debug || other.debug,
            skip: other.skip.or(self.skip),
        }
    }

    /// Render back to the flag list form, used for the startup log line.
    pub fn to_tokens(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut push = |flag: &str, value: Option<String>| {
            if let Some(v) = value {
                out.push(flag.to_string());
                out.push(v);
            }
        };
        push("-i", self.poll_interval_ms.map(|v| v.to_string()));
        push("-g", self.connectivity_interval_secs.map(|v| v.to_string()));
        push("-t", self.ping_timeout_ms.map(|v| v.to_string()));
        push("-l", self.fails_before_log.map(|v| v.to_string()));
        push("-f", self.fails_before_reset.map(|v| v.to_string()));
        push("-h", self.holdoff_secs.map(|v| v.to_string()));
        push("-m", self.notify.clone());
        push("-s", self.skip.as_ref().map(|s| s.join(",")));
        if self.debug {
            out.push("-d".to_string());
        }
        out
    }
}

/// `/i` is accepted for `-i`.
fn normalize_switch(token: &str) -> String {
    let mut chars = token.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some('/'), Some(c), None) if c.is_ascii_alphabetic() => format!("-{}", c),
        _ => token.to_string(),
    }
}

/// Resolved, immutable configuration consumed by the monitor
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub poll_interval: Duration,
    pub connectivity_interval: Duration,
    pub ping_timeout: Duration,
    pub fails_before_log: u32,
    pub fails_before_reset: u32,
    pub holdoff: Duration,
    pub notify: Option<NotifyEndpoint>,
    pub debug: bool,
    pub skip_list: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            connectivity_interval: Duration::from_secs(DEFAULT_CONNECTIVITY_INTERVAL_SECS),
            ping_timeout: Duration::from_millis(DEFAULT_PING_TIMEOUT_MS),
            fails_before_log: DEFAULT_FAILS_BEFORE_LOG,
            fails_before_reset: DEFAULT_FAILS_BEFORE_RESET,
            holdoff: Duration::from_secs(DEFAULT_HOLDOFF_SECS),
            notify: None,
            debug: false,
            skip_list: DEFAULT_SKIP_LIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ServiceConfig {
    pub fn from_args(args: &ServiceArgs) -> Result<Self, ConfigError> {
        let mut config = ServiceConfig::default();
        if let Some(ms) = args.poll_interval_ms {
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "-i",
                    message: "poll interval must be greater than zero",
                });
            }
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = args.connectivity_interval_secs {
            config.connectivity_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = args.ping_timeout_ms {
            config.ping_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = args.fails_before_log {
            config.fails_before_log = n;
        }
        if let Some(n) = args.fails_before_reset {
            if n == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "-f",
                    message: "failure threshold must be greater than zero",
                });
            }
            config.fails_before_reset = n;
        }
        if let Some(secs) = args.holdoff_secs {
            config.holdoff = Duration::from_secs(secs);
        }
        if let Some(ref endpoint) = args.notify {
            config.notify = Some(NotifyEndpoint::parse(endpoint).ok_or(
                ConfigError::InvalidValue {
                    field: "-m",
                    message: "notification endpoint must not be empty",
                },
            )?);
        }
        config.debug = args.debug;
        if let Some(ref skip) = args.skip {
            config.skip_list = skip
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(config)
    }

    /// Persisted layer first, then the start-time layer overrides it.
    pub fn resolve(
        persisted: Option<ServiceArgs>,
        start: ServiceArgs,
    ) -> Result<(Self, ServiceArgs), ConfigError> {
        let merged = persisted.unwrap_or_default().merge(start);
        Ok((Self::from_args(&merged)?, merged))
    }

    /// Interval actually compared against elapsed time on each tick
    pub fn connectivity_cadence(&self) -> Duration {
        self.connectivity_interval.saturating_sub(CADENCE_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_argument_list() {
        let args = ServiceArgs::parse_tokens([
            "-i", "5000", "-g", "60", "-t", "250", "-l", "2", "-f", "4", "-h", "90", "-m",
            "mail.example.org", "-d",
        ])
        .unwrap();
        assert_eq!(args.poll_interval_ms, Some(5000));
        assert_eq!(args.connectivity_interval_secs, Some(60));
        assert_eq!(args.ping_timeout_ms, Some(250));
        assert_eq!(args.fails_before_log, Some(2));
        assert_eq!(args.fails_before_reset, Some(4));
        assert_eq!(args.holdoff_secs, Some(90));
        assert_eq!(args.notify.as_deref(), Some("mail.example.org"));
        assert!(args.debug);
    }

    #[test]
    fn empty_list_is_valid() {
        let args = ServiceArgs::parse_tokens(Vec::<String>::new()).unwrap();
        assert_eq!(args, ServiceArgs::default());
    }

    #[test]
    fn slash_switches_are_accepted() {
        let args = ServiceArgs::parse_tokens(["/i", "2000", "/d"]).unwrap();
        assert_eq!(args.poll_interval_ms, Some(2000));
        assert!(args.debug);
    }

    #[test]
    fn malformed_lists_fail_closed() {
        for bad in [
            vec!["-x", "1"],
            vec!["-i"],
            vec!["-i", "abc"],
            vec!["-i", "-5"],
            vec!["-g", "10", "-g", "20"],
            vec!["-i", "1000", "stray"],
            vec!["-m"],
        ] {
            assert!(
                matches!(
                    ServiceArgs::parse_tokens(&bad),
                    Err(ConfigError::InvalidArguments(_))
                ),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn start_time_arguments_override_persisted() {
        let persisted = ServiceArgs::parse_tokens(["-i", "5000", "-h", "60", "-d"]).unwrap();
        let start = ServiceArgs::parse_tokens(["-h", "120", "-f", "5"]).unwrap();
        let (config, merged) = ServiceConfig::resolve(Some(persisted), start).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(5000));
        assert_eq!(config.holdoff, Duration::from_secs(120));
        assert_eq!(config.fails_before_reset, 5);
        assert!(config.debug);
        assert_eq!(
            merged.to_tokens(),
            ["-i", "5000", "-f", "5", "-h", "120", "-d"]
        );
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let args = ServiceArgs::parse_tokens(["-i", "0"]).unwrap();
        assert!(matches!(
            ServiceConfig::from_args(&args),
            Err(ConfigError::InvalidValue { field: "-i", .. })
        ));
    }

    #[test]
    fn skip_list_replaces_defaults() {
        let args = ServiceArgs::parse_tokens(["-s", "OpenVPN, Hyper-V"]).unwrap();
        let config = ServiceConfig::from_args(&args).unwrap();
        assert_eq!(config.skip_list, ["OpenVPN", "Hyper-V"]);
    }

    #[test]
    fn cadence_backs_off_below_nominal() {
        for poll_ms in [1_000u64, 5_000, 10_000] {
            for multiple in 1..=6u64 {
                let config = ServiceConfig {
                    poll_interval: Duration::from_millis(poll_ms),
                    connectivity_interval: Duration::from_millis(poll_ms * multiple),
                    ..ServiceConfig::default()
                };
                assert!(config.connectivity_cadence() < config.connectivity_interval);
                assert_eq!(
                    config.connectivity_cadence(),
                    config.connectivity_interval - Duration::from_millis(50)
                );
            }
        }
    }

    #[test]
    fn loads_persisted_file_with_comments() {
        let path = std::env::temp_dir().join(format!(
            "apipa-watchdog-args-{}.conf",
            std::process::id()
        ));
        std::fs::write(&path, "# persisted\n-i 7000\n-m relay.local # mail relay\n").unwrap();
        let args = ServiceArgs::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(args.poll_interval_ms, Some(7000));
        assert_eq!(args.notify.as_deref(), Some("relay.local"));
    }
}
