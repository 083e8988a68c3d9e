//! Single entry point tying resolution and probe selection together.

use crate::config::{Config, Mode};
use crate::network::{
    select_address, HttpProbe, IcmpProbe, Probe, ProbeTarget, Resolver, SystemResolver,
    TcpProbe,
};
use crate::utils::{ProbeResult, Result};
use std::net::IpAddr;

pub struct ProbeRunner<R> {
    resolver: R,
}

impl Default for ProbeRunner<SystemResolver> {
    fn default() -> Self {
        Self::new(SystemResolver)
    }
}

impl<R: Resolver + Sync> ProbeRunner<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Resolves `config.host` to the address the probe will use.
    pub async fn resolve_target(&self, config: &Config) -> Result<ProbeTarget> {
        let host = config.host.trim();

        let addresses = match host.parse::<IpAddr>() {
            Ok(ip) => vec![ip],
            Err(_) => self.resolver.resolve(host).await?,
        };
        log::info!("{} resolved to {:?}", host, addresses);

        let address = select_address(host, &addresses, config.ip_version)?;
        Ok(ProbeTarget::new(host, address))
    }

    /// Resolves the target and runs the probe selected by `config.mode`.
    pub async fn run(&self, config: &Config) -> Result<ProbeResult> {
        config.validate()?;
        log::info!("Running '{}' mode against {}", config.mode, config.host);

        let target = self.resolve_target(config).await?;

        let probe: Box<dyn Probe + Send + Sync + '_> = match config.mode {
            Mode::Http => Box::new(HttpProbe::new(&config.http)),
            Mode::Icmp => Box::new(IcmpProbe::new(&config.icmp)),
            Mode::Tcp => Box::new(TcpProbe::new(&config.tcp)),
        };

        probe.run(&target).await
    }
}
