//! Immutable per-invocation probe configuration.
//!
//! A [`Config`] is built once (normally by the CLI layer) and handed to the
//! runner and the probes by reference. Every section carries its defaults, so
//! `Config::default()` describes the out-of-the-box HTTP check against the demo
//! host.

use crate::classify::{LatencyTiers, StatusTiers};
use crate::network::IpVersion;
use crate::utils::{ProbeError, Result};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Host probed when none is given.
pub const DEFAULT_HOST: &str = "api.chucknorris.io";

/// Path requested from [`DEFAULT_HOST`] when no path is given.
pub const DEFAULT_HOST_PATH: &str = "/jokes/random";

/// Shortest timeout accepted for any probe.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Payload carried by every ICMP echo request.
pub const DEFAULT_ICMP_PAYLOAD: &[u8] = b"PING-PONG-BONG-MONG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Http,
    Icmp,
    Tcp,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Http => f.write_str("http"),
            Mode::Icmp => f.write_str("icmp"),
            Mode::Tcp => f.write_str("tcp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpScheme {
    Https,
    Http,
}

impl HttpScheme {
    pub const fn as_str(&self) -> &'static str {
        match self {
            HttpScheme::Https => "https",
            HttpScheme::Http => "http",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request path; `None` means `/`, or [`DEFAULT_HOST_PATH`] for the demo host.
    pub path: Option<String>,
    /// Outbound `Host` header. Empty means "same as the target host".
    pub host_header: String,
    pub follow_redirects: bool,
    pub scheme: HttpScheme,
    pub port: Option<u16>,
    pub timeout: Duration,
    pub accept_invalid_certs: bool,
    pub status_tiers: StatusTiers,
    pub latency_tiers: LatencyTiers,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            path: None,
            host_header: String::new(),
            follow_redirects: false,
            scheme: HttpScheme::Https,
            port: None,
            timeout: Duration::from_secs(10),
            accept_invalid_certs: false,
            status_tiers: StatusTiers::default(),
            latency_tiers: LatencyTiers::bounded(
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
            ),
        }
    }
}

impl HttpConfig {
    /// Path actually requested for `host`.
    pub fn effective_path(&self, host: &str) -> String {
        match &self.path {
            Some(path) if path.starts_with('/') => path.clone(),
            Some(path) => format!("/{path}"),
            None if host == DEFAULT_HOST => DEFAULT_HOST_PATH.to_string(),
            None => "/".to_string(),
        }
    }

    /// `Host` header value sent to `host`.
    pub fn effective_host_header<'a>(&'a self, host: &'a str) -> &'a str {
        if self.host_header.is_empty() {
            host
        } else {
            &self.host_header
        }
    }
}

#[derive(Debug, Clone)]
pub struct IcmpConfig {
    pub count: u16,
    pub timeout: Duration,
    pub payload: Vec<u8>,
    pub latency_tiers: LatencyTiers,
}

impl Default for IcmpConfig {
    fn default() -> Self {
        Self {
            count: 1,
            timeout: Duration::from_secs(3),
            payload: DEFAULT_ICMP_PAYLOAD.to_vec(),
            latency_tiers: LatencyTiers::threshold(Duration::from_secs(1), Duration::from_secs(3)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub port: u16,
    pub timeout: Duration,
    pub latency_tiers: LatencyTiers,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            port: 80,
            timeout: Duration::from_secs(3),
            latency_tiers: LatencyTiers::threshold(Duration::from_secs(1), Duration::from_secs(3)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub mode: Mode,
    pub ip_version: Option<IpVersion>,
    pub verbose: bool,
    pub http: HttpConfig,
    pub icmp: IcmpConfig,
    pub tcp: TcpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            mode: Mode::Http,
            ip_version: None,
            verbose: false,
            http: HttpConfig::default(),
            icmp: IcmpConfig::default(),
            tcp: TcpConfig::default(),
        }
    }
}

impl Config {
    pub fn new(host: impl Into<String>, mode: Mode) -> Self {
        Self {
            host: host.into(),
            mode,
            ..Default::default()
        }
    }

    /// Rejects settings no probe could honour.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ProbeError::Config("target host is empty".to_string()));
        }

        let tiers = [
            ("http latency", &self.http.latency_tiers),
            ("icmp latency", &self.icmp.latency_tiers),
            ("tcp latency", &self.tcp.latency_tiers),
        ];
        for (name, tier) in tiers {
            if !tier.is_ordered() {
                return Err(ProbeError::Config(format!(
                    "{name} thresholds must not decrease: {tier:?}"
                )));
            }
        }

        if self.icmp.count == 0 {
            return Err(ProbeError::Config("icmp echo count must be at least 1".to_string()));
        }

        let timeouts = [
            ("http timeout", self.http.timeout),
            ("icmp timeout", self.icmp.timeout),
            ("tcp timeout", self.tcp.timeout),
        ];
        for (name, timeout) in timeouts {
            if timeout < MIN_TIMEOUT {
                return Err(ProbeError::Config(format!(
                    "{name} must be at least {}",
                    humantime::format_duration(MIN_TIMEOUT)
                )));
            }
        }

        Ok(())
    }
}
