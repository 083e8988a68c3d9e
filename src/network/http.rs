//! Single-request HTTP probe.
//!
//! The probe sends one `GET` to the target, pinned to the address the runner
//! resolved, and classifies both the status code and the time it took to
//! receive the response headers. Redirects are reported as-is unless
//! `follow_redirects` is set.

use super::{Probe, ProbeTarget};
use crate::classify::{classify_by_boundary, classify_by_membership};
use crate::config::HttpConfig;
use crate::utils::{format_duration, Dimension, Measurement, ProbeError, ProbeResult, Result};
use async_trait::async_trait;
use reqwest::header::HOST;
use reqwest::redirect::Policy;
use reqwest::{Client, Version};
use std::fmt::Write;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

const MAX_REDIRECTS: usize = 10;

fn report(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, ": {}", src);
        err = src;
    }
    s
}

fn version_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HttpProbe<'a> {
    config: &'a HttpConfig,
}

impl<'a> HttpProbe<'a> {
    pub fn new(config: &'a HttpConfig) -> Self {
        Self { config }
    }

    /// URL requested for `target`.
    pub fn url(&self, target: &ProbeTarget) -> String {
        let host = match target.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
            _ => target.host.clone(),
        };
        let port = self.config.port.map(|p| format!(":{p}")).unwrap_or_default();
        format!(
            "{}://{}{}{}",
            self.config.scheme.as_str(),
            host,
            port,
            self.config.effective_path(&target.host)
        )
    }

    fn client(&self, target: &ProbeTarget) -> Result<Client> {
        let redirect = if self.config.follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        Client::builder()
            .timeout(self.config.timeout)
            .redirect(redirect)
            .danger_accept_invalid_certs(self.config.accept_invalid_certs)
            .user_agent(concat!("netcheck/", env!("CARGO_PKG_VERSION")))
            // The port is taken from the URL; only the address is pinned.
            .resolve(&target.host, SocketAddr::new(target.address, 0))
            .build()
            .map_err(|e| ProbeError::Transport(format!("Failed to create HTTP client: {}", report(&e))))
    }

    fn request_error(&self, err: reqwest::Error) -> ProbeError {
        if err.is_timeout() {
            ProbeError::Timeout(self.config.timeout)
        } else {
            ProbeError::Connection(report(&err))
        }
    }
}

#[async_trait]
impl Probe for HttpProbe<'_> {
    async fn run(&self, target: &ProbeTarget) -> Result<ProbeResult> {
        let url = self.url(target);
        let host_header = self.config.effective_host_header(&target.host);
        let client = self.client(target)?;

        log::info!("GET {} via {} (Host: {})", url, target.address, host_header);

        let start = Instant::now();
        let response = client
            .get(&url)
            .header(HOST, host_header)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let latency = start.elapsed();

        let status = response.status();
        let version = version_name(response.version()).to_string();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();

        let body = response.bytes().await.map_err(|e| self.request_error(e))?;

        let status_verdict = classify_by_membership(&status.as_u16(), &self.config.status_tiers);
        let latency_verdict = classify_by_boundary(latency, &self.config.latency_tiers);

        log::info!("status codes `ok`: {:?}", self.config.status_tiers.ok);
        log::info!("status codes `warn`: {:?}", self.config.status_tiers.warn);
        log::info!("status codes `error`: {:?}", self.config.status_tiers.error);
        log::info!("status code: {} ({})", status, status_verdict);
        log::info!("response time tiers: {:?}", self.config.latency_tiers);
        log::info!("response time: {} ({})", format_duration(latency), latency_verdict);
        log::info!("protocol: {}, content length: {}", version, body.len());
        if final_url != url {
            log::info!("followed redirects to {}", final_url);
        }
        log::debug!("response headers: {:?}", headers);
        log::debug!("body: {}", String::from_utf8_lossy(&body));

        let measurement = Measurement::Http {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            version,
            latency,
            body_len: body.len(),
        };

        Ok(ProbeResult::new(target, measurement)
            .with_verdict(Dimension::Status, status_verdict)
            .with_verdict(Dimension::Latency, latency_verdict))
    }
}
