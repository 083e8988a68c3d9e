use super::{Probe, ProbeTarget};
use crate::classify::{classify_by_boundary, Verdict};
use crate::config::TcpConfig;
use crate::utils::{
    format_duration, measure_time, with_deadline, Dimension, Measurement, ProbeError, ProbeResult,
    Result,
};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Times a single TCP handshake. No application data is exchanged.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe<'a> {
    config: &'a TcpConfig,
}

impl<'a> TcpProbe<'a> {
    pub fn new(config: &'a TcpConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, latency: std::time::Duration) -> Verdict {
        classify_by_boundary(latency, &self.config.latency_tiers)
    }
}

#[async_trait]
impl Probe for TcpProbe<'_> {
    async fn run(&self, target: &ProbeTarget) -> Result<ProbeResult> {
        let addr = SocketAddr::new(target.address, self.config.port);
        log::info!("TCP connect to {} ({})", target.host, addr);

        let (latency, stream) =
            measure_time(|| with_deadline(self.config.timeout, TcpStream::connect(addr))).await;
        let stream = stream?;

        let local = stream.local_addr().map_err(ProbeError::Io)?;
        let peer = stream.peer_addr().map_err(ProbeError::Io)?;
        drop(stream);

        let verdict = self.classify(latency);
        log::info!(
            "TCP connection {} -> {} took {} ({})",
            local,
            peer,
            format_duration(latency),
            verdict
        );
        log::info!("tcp latency tiers: {:?}", self.config.latency_tiers);

        Ok(
            ProbeResult::new(target, Measurement::Tcp { latency, local, peer })
                .with_verdict(Dimension::Latency, verdict),
        )
    }
}
