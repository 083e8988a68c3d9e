use crate::classify::Verdict;
use crate::config::Mode;
use crate::network::icmp::{EchoSample, RttSummary};
use crate::network::ProbeTarget;
use serde::Serialize;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("DNS resolution failed: {0}")]
    Resolution(String),
    #[error("Transport unavailable: {0}")]
    Transport(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Malformed packet: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Status,
    Latency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DimensionVerdict {
    pub dimension: Dimension,
    pub verdict: Verdict,
}

/// Raw outcome of one probe.
#[derive(Debug, Clone)]
pub enum Measurement {
    Http {
        status: u16,
        reason: Option<String>,
        version: String,
        latency: Duration,
        body_len: usize,
    },
    Icmp {
        samples: Vec<EchoSample>,
        summary: RttSummary,
    },
    Tcp {
        latency: Duration,
        local: SocketAddr,
        peer: SocketAddr,
    },
}

#[must_use]
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub mode: Mode,
    pub host: String,
    pub address: IpAddr,
    pub measurement: Measurement,
    pub verdicts: Vec<DimensionVerdict>,
}

impl ProbeResult {
    pub fn new(target: &ProbeTarget, measurement: Measurement) -> Self {
        let mode = match measurement {
            Measurement::Http { .. } => Mode::Http,
            Measurement::Icmp { .. } => Mode::Icmp,
            Measurement::Tcp { .. } => Mode::Tcp,
        };
        Self {
            mode,
            host: target.host.clone(),
            address: target.address,
            measurement,
            verdicts: Vec::new(),
        }
    }

    pub fn with_verdict(mut self, dimension: Dimension, verdict: Verdict) -> Self {
        self.verdicts.push(DimensionVerdict { dimension, verdict });
        self
    }

    pub fn verdict(&self, dimension: Dimension) -> Option<Verdict> {
        self.verdicts
            .iter()
            .find(|v| v.dimension == dimension)
            .map(|v| v.verdict)
    }

    /// Most severe verdict across every evaluated dimension.
    pub fn worst_verdict(&self) -> Verdict {
        Verdict::worst(self.verdicts.iter().map(|v| v.verdict)).unwrap_or(Verdict::Unknown)
    }

    /// The headline duration: request latency, connect time, or the slowest echo.
    pub fn duration(&self) -> Option<Duration> {
        match &self.measurement {
            Measurement::Http { latency, .. } | Measurement::Tcp { latency, .. } => Some(*latency),
            Measurement::Icmp { summary, .. } => summary.max,
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.2}s", duration.as_secs_f32())
    }
}

pub fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| ProbeError::Config(format!("invalid duration '{value}': {e}")))
}

pub async fn measure_time<F, Fut, T>(f: F) -> (Duration, T)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let start = Instant::now();
    let result = f().await;
    let duration = start.elapsed();
    (duration, result)
}

/// Runs an I/O future under a deadline, mapping expiry to [`ProbeError::Timeout`]
/// and I/O failures to [`ProbeError::Connection`].
pub async fn with_deadline<Fut, T>(deadline: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = std::io::Result<T>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| ProbeError::Timeout(deadline))?
        .map_err(|e| ProbeError::Connection(e.to_string()))
}
