use crate::classify::{LatencyTiers, StatusTiers};
use crate::config::{
    Config, HttpConfig, HttpScheme, IcmpConfig, Mode, TcpConfig, DEFAULT_HOST,
    DEFAULT_ICMP_PAYLOAD,
};
use crate::network::IpVersion;
use crate::utils::{parse_duration, ProbeError, Result};
use clap::{Parser, ValueEnum};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "netcheck")]
#[command(about = "Probe a host over HTTP, ICMP or TCP and classify the result as ok/warn/err/unknown")]
#[command(version)]
pub struct Cli {
    #[arg(short, long, value_enum, default_value = "http")]
    pub mode: ModeArg,

    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(short, long, value_enum, default_value = "any")]
    pub ip_version: IpVersionArg,

    #[arg(short, long)]
    pub verbose: bool,

    #[arg(long)]
    pub json: bool,

    #[arg(long, help = "HTTP request path (defaults to /)")]
    pub path: Option<String>,

    #[arg(long, default_value = "", help = "HTTP Host header (defaults to the target host)")]
    pub header: String,

    #[arg(long, help = "Follow HTTP redirects and evaluate the final response")]
    pub follow: bool,

    #[arg(long, value_enum, default_value = "https")]
    pub scheme: SchemeArg,

    #[arg(long)]
    pub http_port: Option<u16>,

    #[arg(long, default_value = "10s", value_parser = duration_arg)]
    pub http_timeout: Duration,

    #[arg(long, help = "Accept invalid TLS certificates")]
    pub insecure: bool,

    #[arg(long = "http-ok-status", value_delimiter = ',', help = "Status codes to `ok` on [default: 200]")]
    pub http_ok_status: Vec<String>,

    #[arg(long = "http-warn-status", value_delimiter = ',', help = "Status codes to `warn` on [default: 400]")]
    pub http_warn_status: Vec<String>,

    #[arg(long = "http-error-status", value_delimiter = ',', help = "Status codes to `err` on [default: 500]")]
    pub http_error_status: Vec<String>,

    #[arg(long, default_value = "1s", value_parser = duration_arg)]
    pub http_ok_time: Duration,

    #[arg(long, default_value = "2s", value_parser = duration_arg)]
    pub http_warn_time: Duration,

    #[arg(long, default_value = "3s", value_parser = duration_arg)]
    pub http_error_time: Duration,

    #[arg(long, default_value = "1")]
    pub icmp_count: u16,

    #[arg(long, default_value = "3s", value_parser = duration_arg)]
    pub icmp_timeout: Duration,

    #[arg(long, default_value = "1s", value_parser = duration_arg)]
    pub icmp_warn_time: Duration,

    #[arg(long, default_value = "3s", value_parser = duration_arg)]
    pub icmp_error_time: Duration,

    #[arg(long, default_value = "80")]
    pub tcp_port: u16,

    #[arg(long, default_value = "3s", value_parser = duration_arg)]
    pub tcp_timeout: Duration,

    #[arg(long, default_value = "1s", value_parser = duration_arg)]
    pub tcp_warn_time: Duration,

    #[arg(long, default_value = "3s", value_parser = duration_arg)]
    pub tcp_error_time: Duration,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeArg {
    Http,
    #[value(alias = "net")]
    Icmp,
    Tcp,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Http => Mode::Http,
            ModeArg::Icmp => Mode::Icmp,
            ModeArg::Tcp => Mode::Tcp,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum IpVersionArg {
    Any,
    V4,
    V6,
}

impl IpVersionArg {
    pub fn to_version(&self) -> Option<IpVersion> {
        match self {
            IpVersionArg::Any => None,
            IpVersionArg::V4 => Some(IpVersion::V4),
            IpVersionArg::V6 => Some(IpVersion::V6),
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum SchemeArg {
    Https,
    Http,
}

impl From<SchemeArg> for HttpScheme {
    fn from(scheme: SchemeArg) -> Self {
        match scheme {
            SchemeArg::Https => HttpScheme::Https,
            SchemeArg::Http => HttpScheme::Http,
        }
    }
}

fn duration_arg(value: &str) -> std::result::Result<Duration, String> {
    parse_duration(value).map_err(|e| e.to_string())
}

/// Parses status code flag values; an empty list falls back to `default`.
fn status_codes(flag: &str, values: &[String], default: u16) -> Result<BTreeSet<u16>> {
    let codes = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<u16>()
                .map_err(|_| ProbeError::Config(format!("{flag}: '{v}' is not a status code")))
        })
        .collect::<Result<BTreeSet<u16>>>()?;

    if codes.is_empty() {
        Ok(BTreeSet::from([default]))
    } else {
        Ok(codes)
    }
}

impl Cli {
    /// Builds the immutable probe configuration.
    pub fn to_config(&self) -> Result<Config> {
        let status_tiers = StatusTiers {
            ok: status_codes("http-ok-status", &self.http_ok_status, 200)?,
            warn: status_codes("http-warn-status", &self.http_warn_status, 400)?,
            error: status_codes("http-error-status", &self.http_error_status, 500)?,
        };

        let config = Config {
            host: self.host.trim().to_string(),
            mode: self.mode.into(),
            ip_version: self.ip_version.to_version(),
            verbose: self.verbose,
            http: HttpConfig {
                path: self.path.clone().filter(|p| !p.is_empty()),
                host_header: self.header.trim().to_string(),
                follow_redirects: self.follow,
                scheme: self.scheme.into(),
                port: self.http_port,
                timeout: self.http_timeout,
                accept_invalid_certs: self.insecure,
                status_tiers,
                latency_tiers: LatencyTiers::bounded(
                    self.http_ok_time,
                    self.http_warn_time,
                    self.http_error_time,
                ),
            },
            icmp: IcmpConfig {
                count: self.icmp_count,
                timeout: self.icmp_timeout,
                payload: DEFAULT_ICMP_PAYLOAD.to_vec(),
                latency_tiers: LatencyTiers::threshold(self.icmp_warn_time, self.icmp_error_time),
            },
            tcp: TcpConfig {
                port: self.tcp_port,
                timeout: self.tcp_timeout,
                latency_tiers: LatencyTiers::threshold(self.tcp_warn_time, self.tcp_error_time),
            },
        };

        config.validate()?;
        Ok(config)
    }
}
