//! Protocol probes and the collaborators they share.
//!
//! Every probe implements [`Probe`]: it receives an already resolved
//! [`ProbeTarget`], performs exactly one check and returns a fully classified
//! [`ProbeResult`] or a fatal [`ProbeError`].

use crate::utils::{ProbeError, ProbeResult, Result};
use async_trait::async_trait;
use std::net::IpAddr;

pub mod http;
pub mod icmp;
pub mod tcp;

pub use http::HttpProbe;
pub use icmp::IcmpProbe;
pub use tcp::TcpProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    pub fn matches(&self, address: &IpAddr) -> bool {
        matches!(
            (self, address),
            (IpVersion::V4, IpAddr::V4(_)) | (IpVersion::V6, IpAddr::V6(_))
        )
    }
}

/// A host name together with the single address a probe talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub address: IpAddr,
}

impl ProbeTarget {
    pub fn new(host: impl Into<String>, address: IpAddr) -> Self {
        Self {
            host: host.into(),
            address,
        }
    }
}

#[async_trait]
pub trait Probe {
    async fn run(&self, target: &ProbeTarget) -> Result<ProbeResult>;
}

/// Resolves a host name to the addresses it currently maps to.
#[async_trait]
pub trait Resolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// DNS resolver backed by the system configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        use hickory_resolver::config::{ResolverConfig, ResolverOpts};
        use hickory_resolver::TokioAsyncResolver;

        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                log::warn!("Could not read system DNS config ({e}), using default");
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };

        let lookup = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| ProbeError::Resolution(format!("{host}: {e}")))?;

        Ok(lookup.iter().collect())
    }
}

/// Picks the first address, or the first of the requested family.
pub fn select_address(
    host: &str,
    addresses: &[IpAddr],
    ip_version: Option<IpVersion>,
) -> Result<IpAddr> {
    addresses
        .iter()
        .copied()
        .find(|address| ip_version.map_or(true, |version| version.matches(address)))
        .ok_or_else(|| match ip_version {
            Some(version) => {
                ProbeError::Resolution(format!("No {version:?} address found for {host}"))
            }
            None => ProbeError::Resolution(format!("No address found for {host}")),
        })
}
