use clap::Parser;
use netcheck::*;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Answers every connection with the same raw HTTP response.
async fn http_server(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

async fn tcp_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local address");
    tokio::spawn(async move { while listener.accept().await.is_ok() {} });
    addr
}

fn config_from(args: &[&str]) -> Config {
    let mut argv = vec!["netcheck"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv)
        .expect("arguments should parse")
        .to_config()
        .expect("configuration should be valid")
}

#[tokio::test]
async fn test_http_check_from_command_line() {
    let addr = http_server("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok").await;
    let port = addr.port().to_string();
    let config = config_from(&[
        "--host",
        "127.0.0.1",
        "--scheme",
        "http",
        "--http-port",
        &port,
        "--path",
        "/health",
    ]);

    let result = ProbeRunner::default().run(&config).await.expect("probe failed");

    assert_eq!(result.mode, Mode::Http);
    assert_eq!(result.address, addr.ip());
    assert_eq!(result.verdict(Dimension::Status), Some(Verdict::Ok));
    assert_eq!(result.verdict(Dimension::Latency), Some(Verdict::Ok));
    assert_eq!(result.worst_verdict(), Verdict::Ok);
}

#[tokio::test]
async fn test_http_warn_status_dominates_fast_response() {
    let addr = http_server(
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    let port = addr.port().to_string();
    let config = config_from(&[
        "-H",
        "127.0.0.1",
        "--scheme",
        "http",
        "--http-port",
        &port,
        "--http-warn-status",
        "400,404",
    ]);

    let result = ProbeRunner::default().run(&config).await.unwrap();

    assert_eq!(result.verdict(Dimension::Status), Some(Verdict::Warn));
    assert_eq!(result.verdict(Dimension::Latency), Some(Verdict::Ok));
    assert_eq!(result.worst_verdict(), Verdict::Warn);
}

#[tokio::test]
async fn test_tcp_check_from_command_line() {
    let addr = tcp_server().await;
    let port = addr.port().to_string();
    let config = config_from(&["--mode", "tcp", "--host", "127.0.0.1", "--tcp-port", &port]);

    let result = ProbeRunner::default().run(&config).await.expect("probe failed");

    assert_eq!(result.mode, Mode::Tcp);
    assert_eq!(result.worst_verdict(), Verdict::Ok);
    match result.measurement {
        Measurement::Tcp { peer, latency, .. } => {
            assert_eq!(peer, addr);
            assert!(latency < Duration::from_secs(1));
        }
        ref other => panic!("Expected TCP measurement, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tcp_check_against_closed_port_is_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port().to_string();
    drop(listener);

    let config = config_from(&["--mode", "tcp", "--host", "127.0.0.1", "--tcp-port", &port]);
    let err = ProbeRunner::default().run(&config).await.unwrap_err();

    assert!(matches!(err, ProbeError::Connection(_)), "{err:?}");
}

#[tokio::test]
async fn test_address_family_mismatch_for_literal() {
    let config = config_from(&["--mode", "tcp", "--host", "127.0.0.1", "-i", "v6"]);
    let err = ProbeRunner::default().run(&config).await.unwrap_err();

    assert!(matches!(err, ProbeError::Resolution(_)), "{err:?}");
}

#[tokio::test]
async fn test_icmp_check_on_loopback() {
    // ICMP sockets may be forbidden for unprivileged users.
    let config = config_from(&["--mode", "icmp", "--host", "127.0.0.1", "--icmp-count", "2"]);

    match ProbeRunner::default().run(&config).await {
        Ok(result) => {
            assert_eq!(result.mode, Mode::Icmp);
            match result.measurement {
                Measurement::Icmp { samples, summary } => {
                    assert_eq!(samples.len(), 2);
                    assert_eq!(summary.sent, 2);
                }
                ref other => panic!("Expected ICMP measurement, got {other:?}"),
            }
        }
        Err(ProbeError::Transport(reason)) => println!("ICMP unavailable: {reason}"),
        Err(other) => panic!("Unexpected error: {other:?}"),
    }
}

#[test]
fn test_invalid_command_line_configuration() {
    let cli = Cli::try_parse_from(["netcheck", "--host", "  "]).unwrap();
    assert!(matches!(cli.to_config(), Err(ProbeError::Config(_))));

    let cli = Cli::try_parse_from(["netcheck", "--icmp-count", "0"]).unwrap();
    assert!(matches!(cli.to_config(), Err(ProbeError::Config(_))));
}
