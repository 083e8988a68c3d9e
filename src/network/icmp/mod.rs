//! ICMP echo probe.
//!
//! The probe sends `count` echo requests one after another. Each attempt
//! waits at most the configured timeout for its reply; an attempt that gets
//! no reply, an unrelated ICMP message or an undecodable packet is recorded as
//! a failed sample and the next attempt still runs. Only failing to open or
//! use the socket aborts the probe.
//!
//! The latency verdict is taken on the worst case: any failed sample makes the
//! dimension `err`, otherwise the slowest round trip is classified.
//!
//! # Examples
//! ```rust,no_run
//! use netcheck::config::IcmpConfig;
//! use netcheck::network::{IcmpProbe, Probe, ProbeTarget};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = IcmpConfig { count: 3, ..Default::default() };
//!     let target = ProbeTarget::new("localhost", "127.0.0.1".parse().unwrap());
//!
//!     match IcmpProbe::new(&config).run(&target).await {
//!         Ok(result) => println!("icmp latency: {}", result.worst_verdict()),
//!         Err(error) => println!("ICMP probe failed: {}", error),
//!     }
//! }
//! ```

use super::{IpVersion, Probe, ProbeTarget};
use crate::classify::{classify_by_boundary, LatencyTiers, Verdict};
use crate::config::IcmpConfig;
use crate::utils::{format_duration, Dimension, Measurement, ProbeError, ProbeResult, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};

pub mod packet;
pub mod socket;

pub use packet::IcmpMessage;
pub use socket::{EchoSocket, IcmpSocket};

const RECV_BUFFER_LEN: usize = 1500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoOutcome {
    Reply { rtt: Duration, bytes: usize },
    TimedOut,
    NonReply { icmp_type: u8, code: u8 },
    Malformed(String),
}

impl EchoOutcome {
    pub fn rtt(&self) -> Option<Duration> {
        match self {
            EchoOutcome::Reply { rtt, .. } => Some(*rtt),
            _ => None,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, EchoOutcome::Reply { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoSample {
    pub sequence: u16,
    pub outcome: EchoOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RttSummary {
    pub sent: usize,
    pub received: usize,
    pub loss_percent: f64,
    pub min: Option<Duration>,
    pub avg: Option<Duration>,
    pub max: Option<Duration>,
}

impl RttSummary {
    pub fn from_samples(samples: &[EchoSample]) -> Self {
        let rtts: Vec<Duration> = samples.iter().filter_map(|s| s.outcome.rtt()).collect();
        let sent = samples.len();
        let received = rtts.len();
        let loss_percent = if sent == 0 {
            0.0
        } else {
            (sent - received) as f64 * 100.0 / sent as f64
        };
        let avg = (received > 0).then(|| rtts.iter().sum::<Duration>() / received as u32);

        Self {
            sent,
            received,
            loss_percent,
            min: rtts.iter().min().copied(),
            avg,
            max: rtts.iter().max().copied(),
        }
    }
}

/// Worst-case verdict over every sample.
pub fn aggregate_verdict(samples: &[EchoSample], tiers: &LatencyTiers) -> Verdict {
    if samples.is_empty() || samples.iter().any(|s| !s.outcome.is_reply()) {
        return tiers.missing_verdict();
    }
    samples
        .iter()
        .filter_map(|s| s.outcome.rtt())
        .max()
        .map_or_else(|| tiers.missing_verdict(), |rtt| classify_by_boundary(rtt, tiers))
}

/// Echo identifier derived from the process id.
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Runs `config.count` sequential echo attempts over `socket`.
pub fn run_echoes<S: EchoSocket>(
    socket: &mut S,
    version: IpVersion,
    identifier: u16,
    config: &IcmpConfig,
) -> Result<Vec<EchoSample>> {
    let mut samples = Vec::with_capacity(usize::from(config.count));
    let mut buf = [0u8; RECV_BUFFER_LEN];

    for sequence in 1..=config.count {
        let request = packet::echo_request(version, identifier, sequence, &config.payload);

        let sent_at = Instant::now();
        socket
            .send(&request)
            .map_err(|e| ProbeError::Transport(format!("Failed to send echo request: {e}")))?;
        let deadline = sent_at + config.timeout;

        let outcome = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let len = match socket
                .recv(&mut buf, remaining)
                .map_err(|e| ProbeError::Transport(format!("Failed to read echo reply: {e}")))?
            {
                Some(len) => len,
                None => break EchoOutcome::TimedOut,
            };

            match packet::parse(version, &buf[..len]) {
                Ok(IcmpMessage::EchoReply {
                    identifier: id,
                    sequence: seq,
                }) if seq == sequence
                    && (socket.kernel_assigns_identifier() || id == identifier) =>
                {
                    break EchoOutcome::Reply {
                        rtt: sent_at.elapsed(),
                        bytes: len,
                    };
                }
                Ok(IcmpMessage::EchoReply {
                    identifier: id,
                    sequence: seq,
                }) => {
                    log::debug!("Ignoring echo reply id={id} seq={seq} while waiting for seq={sequence}");
                }
                // Raw sockets also see our own requests on loopback.
                Ok(IcmpMessage::EchoRequest { .. }) => {}
                Ok(IcmpMessage::Error {
                    icmp_type,
                    code,
                    quoted,
                }) => {
                    let ours = match quoted {
                        Some((id, seq)) => {
                            seq == sequence && (socket.kernel_assigns_identifier() || id == identifier)
                        }
                        None => socket.kernel_assigns_identifier(),
                    };
                    if ours {
                        break EchoOutcome::NonReply { icmp_type, code };
                    }
                    log::debug!("Ignoring ICMP type {icmp_type} code {code} about {quoted:?}");
                }
                // A raw socket sees every ICMP message the host receives.
                Ok(IcmpMessage::Other { icmp_type, code }) if !socket.kernel_assigns_identifier() => {
                    log::debug!("Ignoring ICMP type {icmp_type} code {code}");
                }
                Ok(IcmpMessage::Other { icmp_type, code }) => {
                    break EchoOutcome::NonReply { icmp_type, code };
                }
                Err(e) => break EchoOutcome::Malformed(e.to_string()),
            }
        };

        match &outcome {
            EchoOutcome::Reply { rtt, bytes } => {
                log::info!("echo seq={} {} bytes in {}", sequence, bytes, format_duration(*rtt))
            }
            EchoOutcome::TimedOut => log::warn!(
                "echo seq={} timed out after {}",
                sequence,
                format_duration(config.timeout)
            ),
            EchoOutcome::NonReply { icmp_type, code } => log::warn!(
                "echo seq={} answered by ICMP type {} code {}",
                sequence,
                icmp_type,
                code
            ),
            EchoOutcome::Malformed(reason) => {
                log::warn!("echo seq={} got a malformed reply: {}", sequence, reason)
            }
        }

        samples.push(EchoSample { sequence, outcome });
    }

    Ok(samples)
}

#[derive(Debug, Clone, Copy)]
pub struct IcmpProbe<'a> {
    config: &'a IcmpConfig,
}

impl<'a> IcmpProbe<'a> {
    pub fn new(config: &'a IcmpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Probe for IcmpProbe<'_> {
    async fn run(&self, target: &ProbeTarget) -> Result<ProbeResult> {
        let address = target.address;
        let version = IpVersion::of(&address);
        let config = self.config.clone();

        log::info!(
            "ICMP echo x{} to {} ({}), timeout {}",
            config.count,
            target.host,
            address,
            format_duration(config.timeout)
        );

        let samples = tokio::task::spawn_blocking(move || {
            let mut socket = IcmpSocket::open(address)?;
            run_echoes(&mut socket, version, process_identifier(), &config)
        })
        .await
        .map_err(|e| ProbeError::Transport(format!("ICMP task failed: {e}")))??;

        let summary = RttSummary::from_samples(&samples);
        let verdict = aggregate_verdict(&samples, &self.config.latency_tiers);
        log::info!(
            "{}/{} replies, {:.1}% loss, max rtt {} ({})",
            summary.received,
            summary.sent,
            summary.loss_percent,
            summary.max.map(format_duration).unwrap_or_else(|| "-".to_string()),
            verdict
        );
        log::info!("icmp latency tiers: {:?}", self.config.latency_tiers);

        Ok(
            ProbeResult::new(target, Measurement::Icmp { samples, summary })
                .with_verdict(Dimension::Latency, verdict),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::packet::{encode_echo, echo_reply_type, parse};
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};

    const ID: u16 = 0x4242;

    enum Step {
        /// Answer the last request.
        Reply,
        /// Answer with an unrelated sequence number.
        Stale(u16),
        /// Answer with another process's identifier.
        Foreign,
        /// Let the attempt's deadline pass.
        Silence,
        Bytes(Vec<u8>),
    }

    struct ScriptedSocket {
        version: IpVersion,
        kernel_ids: bool,
        script: VecDeque<Step>,
        sent: Vec<Vec<u8>>,
    }

    impl ScriptedSocket {
        fn new(version: IpVersion, script: Vec<Step>) -> Self {
            Self {
                version,
                kernel_ids: true,
                script: script.into(),
                sent: Vec::new(),
            }
        }

        fn last_request(&self) -> (u16, u16) {
            match parse(self.version, self.sent.last().expect("nothing sent")) {
                Ok(IcmpMessage::EchoRequest {
                    identifier,
                    sequence,
                }) => (identifier, sequence),
                other => panic!("unexpected request {other:?}"),
            }
        }
    }

    impl EchoSocket for ScriptedSocket {
        fn send(&mut self, packet: &[u8]) -> io::Result<()> {
            self.sent.push(packet.to_vec());
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<Option<usize>> {
            let (id, seq) = self.last_request();
            let reply_type = echo_reply_type(self.version);
            let message = match self.script.pop_front() {
                Some(Step::Reply) => encode_echo(self.version, reply_type, id, seq, b"pong"),
                Some(Step::Stale(stale)) => encode_echo(self.version, reply_type, id, stale, b""),
                Some(Step::Foreign) => encode_echo(self.version, reply_type, id ^ 1, seq, b""),
                Some(Step::Bytes(bytes)) => bytes,
                Some(Step::Silence) | None => return Ok(None),
            };
            buf[..message.len()].copy_from_slice(&message);
            Ok(Some(message.len()))
        }

        fn kernel_assigns_identifier(&self) -> bool {
            self.kernel_ids
        }
    }

    fn config(count: u16) -> IcmpConfig {
        IcmpConfig {
            count,
            timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[test]
    fn test_every_attempt_replies() {
        let mut socket = ScriptedSocket::new(IpVersion::V4, vec![Step::Reply, Step::Reply, Step::Reply]);
        let samples = run_echoes(&mut socket, IpVersion::V4, ID, &config(3)).unwrap();

        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.outcome.is_reply()));
        let sequences: Vec<u16> = samples.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(
            aggregate_verdict(&samples, &config(3).latency_tiers),
            Verdict::Ok
        );
    }

    #[test]
    fn test_requests_carry_identifier_and_increasing_sequence() {
        let mut socket = ScriptedSocket::new(IpVersion::V4, vec![Step::Reply, Step::Reply]);
        run_echoes(&mut socket, IpVersion::V4, ID, &config(2)).unwrap();

        let requests: Vec<IcmpMessage> = socket
            .sent
            .iter()
            .map(|p| parse(IpVersion::V4, p).unwrap())
            .collect();
        assert_eq!(
            requests,
            vec![
                IcmpMessage::EchoRequest { identifier: ID, sequence: 1 },
                IcmpMessage::EchoRequest { identifier: ID, sequence: 2 },
            ]
        );
        assert!(socket.sent[0].ends_with(crate::config::DEFAULT_ICMP_PAYLOAD));
    }

    #[test]
    fn test_timed_out_attempt_is_recorded() {
        let mut socket =
            ScriptedSocket::new(IpVersion::V4, vec![Step::Reply, Step::Silence, Step::Reply]);
        let samples = run_echoes(&mut socket, IpVersion::V4, ID, &config(3)).unwrap();

        assert_eq!(samples.len(), 3);
        assert!(samples[0].outcome.is_reply());
        assert_eq!(samples[1].outcome, EchoOutcome::TimedOut);
        assert!(samples[2].outcome.is_reply());

        let summary = RttSummary::from_samples(&samples);
        assert_eq!(summary.sent, 3);
        assert_eq!(summary.received, 2);
        assert!((summary.loss_percent - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(
            aggregate_verdict(&samples, &config(3).latency_tiers),
            Verdict::Err
        );
    }

    #[test]
    fn test_stale_and_looped_back_messages_are_skipped() {
        let own_request = packet::echo_request(IpVersion::V4, ID, 1, b"loop");
        let mut socket = ScriptedSocket::new(
            IpVersion::V4,
            vec![Step::Bytes(own_request), Step::Stale(9), Step::Reply],
        );
        let samples = run_echoes(&mut socket, IpVersion::V4, ID, &config(1)).unwrap();

        assert_eq!(samples.len(), 1);
        assert!(samples[0].outcome.is_reply());
    }

    #[test]
    fn test_raw_socket_ignores_foreign_identifier() {
        let mut socket = ScriptedSocket::new(IpVersion::V4, vec![Step::Foreign, Step::Silence]);
        socket.kernel_ids = false;
        let samples = run_echoes(&mut socket, IpVersion::V4, ID, &config(1)).unwrap();
        assert_eq!(samples[0].outcome, EchoOutcome::TimedOut);

        let mut socket = ScriptedSocket::new(IpVersion::V4, vec![Step::Foreign]);
        let samples = run_echoes(&mut socket, IpVersion::V4, ID, &config(1)).unwrap();
        assert!(samples[0].outcome.is_reply(), "datagram sockets match on sequence only");
    }

    #[test]
    fn test_non_reply_consumes_the_attempt() {
        let mut unreachable = vec![3, 1, 0, 0, 0, 0, 0, 0];
        let sum = packet::checksum(&unreachable);
        unreachable[2..4].copy_from_slice(&sum.to_be_bytes());

        let mut socket =
            ScriptedSocket::new(IpVersion::V4, vec![Step::Bytes(unreachable), Step::Reply]);
        let samples = run_echoes(&mut socket, IpVersion::V4, ID, &config(2)).unwrap();

        assert_eq!(
            samples[0].outcome,
            EchoOutcome::NonReply { icmp_type: 3, code: 1 }
        );
        assert!(samples[1].outcome.is_reply());
    }

    /// Destination unreachable quoting an IPv4 echo request.
    fn unreachable_v4(identifier: u16, sequence: u16) -> Vec<u8> {
        let mut message = vec![3, 1, 0, 0, 0, 0, 0, 0];
        let mut ip_header = vec![0u8; 20];
        ip_header[0] = 0x45;
        message.extend_from_slice(&ip_header);
        message.extend_from_slice(&packet::echo_request(IpVersion::V4, identifier, sequence, b""));
        let sum = packet::checksum(&message);
        message[2..4].copy_from_slice(&sum.to_be_bytes());
        message
    }

    #[test]
    fn test_raw_socket_skips_unrelated_informational_messages() {
        let neighbor_solicitation = vec![135, 0, 0, 0, 0, 0, 0, 0, 0xfe, 0x80, 0, 0];
        let router_advertisement = vec![134, 0, 0, 0, 0, 0, 0, 0];
        let mut socket = ScriptedSocket::new(
            IpVersion::V6,
            vec![
                Step::Bytes(neighbor_solicitation),
                Step::Bytes(router_advertisement),
                Step::Reply,
            ],
        );
        socket.kernel_ids = false;

        let samples = run_echoes(&mut socket, IpVersion::V6, ID, &config(1)).unwrap();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].outcome.is_reply(), "{:?}", samples[0].outcome);
        assert_eq!(
            aggregate_verdict(&samples, &config(1).latency_tiers),
            Verdict::Ok
        );
    }

    #[test]
    fn test_raw_socket_matches_errors_on_quoted_request() {
        let mut socket = ScriptedSocket::new(
            IpVersion::V4,
            vec![
                // Another process's request, then one of ours from an earlier attempt.
                Step::Bytes(unreachable_v4(ID ^ 1, 1)),
                Step::Bytes(unreachable_v4(ID, 7)),
                Step::Bytes(unreachable_v4(ID, 1)),
                Step::Reply,
            ],
        );
        socket.kernel_ids = false;

        let samples = run_echoes(&mut socket, IpVersion::V4, ID, &config(2)).unwrap();
        assert_eq!(
            samples[0].outcome,
            EchoOutcome::NonReply { icmp_type: 3, code: 1 }
        );
        assert!(samples[1].outcome.is_reply());
    }

    #[test]
    fn test_raw_socket_skips_errors_without_quoted_echo() {
        let mut bare = vec![3, 1, 0, 0, 0, 0, 0, 0];
        let sum = packet::checksum(&bare);
        bare[2..4].copy_from_slice(&sum.to_be_bytes());

        let mut socket =
            ScriptedSocket::new(IpVersion::V4, vec![Step::Bytes(bare), Step::Reply]);
        socket.kernel_ids = false;

        let samples = run_echoes(&mut socket, IpVersion::V4, ID, &config(1)).unwrap();
        assert!(samples[0].outcome.is_reply());
    }

    #[test]
    fn test_malformed_reply_is_a_failed_sample() {
        let mut socket = ScriptedSocket::new(IpVersion::V4, vec![Step::Bytes(vec![0, 0, 1])]);
        let samples = run_echoes(&mut socket, IpVersion::V4, ID, &config(1)).unwrap();
        assert!(matches!(samples[0].outcome, EchoOutcome::Malformed(_)));
    }

    #[test]
    fn test_ipv6_echoes() {
        let mut socket = ScriptedSocket::new(IpVersion::V6, vec![Step::Reply, Step::Reply]);
        let samples = run_echoes(&mut socket, IpVersion::V6, ID, &config(2)).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.outcome.is_reply()));
    }

    #[test]
    fn test_send_failure_is_fatal() {
        struct Unreachable;
        impl EchoSocket for Unreachable {
            fn send(&mut self, _packet: &[u8]) -> io::Result<()> {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            }
            fn recv(&mut self, _buf: &mut [u8], _timeout: Duration) -> io::Result<Option<usize>> {
                Ok(None)
            }
            fn kernel_assigns_identifier(&self) -> bool {
                true
            }
        }

        let result = run_echoes(&mut Unreachable, IpVersion::V4, ID, &config(3));
        assert!(matches!(result, Err(ProbeError::Transport(_))));
    }

    #[test]
    fn test_aggregate_uses_slowest_reply() {
        let tiers = LatencyTiers::threshold(Duration::from_secs(1), Duration::from_secs(3));
        let sample = |sequence, ms| EchoSample {
            sequence,
            outcome: EchoOutcome::Reply {
                rtt: Duration::from_millis(ms),
                bytes: 27,
            },
        };

        let samples = vec![sample(1, 20), sample(2, 1500), sample(3, 30)];
        assert_eq!(aggregate_verdict(&samples, &tiers), Verdict::Warn);

        let summary = RttSummary::from_samples(&samples);
        assert_eq!(summary.min, Some(Duration::from_millis(20)));
        assert_eq!(summary.max, Some(Duration::from_millis(1500)));
        assert_eq!(summary.avg, Some(Duration::from_millis(1550) / 3));

        assert_eq!(aggregate_verdict(&[], &tiers), Verdict::Err);
    }

    #[tokio::test]
    async fn test_loopback_probe_needs_a_socket_or_fails_cleanly() {
        let config = config(1);
        let target = ProbeTarget::new("localhost", IpAddr::V4(Ipv4Addr::LOCALHOST));

        match IcmpProbe::new(&config).run(&target).await {
            Ok(result) => match result.measurement {
                Measurement::Icmp { samples, .. } => assert_eq!(samples.len(), 1),
                other => panic!("Expected ICMP measurement, got {other:?}"),
            },
            Err(ProbeError::Transport(_)) => {}
            Err(other) => panic!("Expected a result or a transport error, got {other:?}"),
        }
    }
}
