use clap::Parser;
use colored::*;
use netcheck::network::icmp::EchoOutcome;
use netcheck::*;
use std::process::ExitCode;
use std::time::Duration;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    let config = cli.to_config();

    let verbose = config.as_ref().map_or(cli.verbose, |config| config.verbose);
    env_logger::Builder::from_default_env()
        .filter_level(log_level(verbose))
        .init();

    let config = match config {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{} {}", "UNKNOWN".magenta().bold(), error);
            return ExitCode::from(exit_code(Verdict::Unknown));
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("{} failed to start runtime: {}", "UNKNOWN".magenta().bold(), error);
            return ExitCode::from(exit_code(Verdict::Unknown));
        }
    };

    let outcome = runtime.block_on(async { runner::ProbeRunner::default().run(&config).await });

    match outcome {
        Ok(result) => {
            if cli.json {
                print_result_json(&result);
            } else {
                print_result_human(&result);
            }
            ExitCode::from(exit_code(result.worst_verdict()))
        }
        Err(error) => {
            if cli.json {
                print_error_json(&config, &error);
            } else {
                println!("{} {} check on {}: {}", "ERR".red().bold(), config.mode, config.host, error);
            }
            ExitCode::from(exit_code(Verdict::Err))
        }
    }
}

fn log_level(verbose: bool) -> log::LevelFilter {
    if verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    }
}

/// Monitoring-plugin exit status for a verdict.
fn exit_code(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Ok => 0,
        Verdict::Warn => 1,
        Verdict::Err => 2,
        Verdict::Unknown => 3,
    }
}

fn paint(verdict: Verdict) -> ColoredString {
    let label = verdict.as_str().to_uppercase();
    match verdict {
        Verdict::Ok => label.green().bold(),
        Verdict::Warn => label.yellow().bold(),
        Verdict::Err => label.red().bold(),
        Verdict::Unknown => label.magenta().bold(),
    }
}

fn print_result_human(result: &ProbeResult) {
    println!("\n{}", "=".repeat(80).blue());
    println!(
        "{} {} check on {} ({})",
        paint(result.worst_verdict()),
        result.mode.to_string().bold(),
        result.host,
        result.address
    );
    println!("{}", "=".repeat(80).blue());

    for v in &result.verdicts {
        println!("  {:<8} {}", format!("{:?}", v.dimension).to_lowercase(), paint(v.verdict));
    }
    println!();

    match &result.measurement {
        Measurement::Http {
            status,
            reason,
            version,
            latency,
            body_len,
        } => {
            println!(
                "  status: {} {}",
                status.to_string().cyan(),
                reason.as_deref().unwrap_or_default()
            );
            println!("  response time: {}", format_duration(*latency).cyan());
            println!("  protocol: {}, body: {} bytes", version, body_len);
        }
        Measurement::Icmp { samples, summary } => {
            for sample in samples {
                match &sample.outcome {
                    EchoOutcome::Reply { rtt, bytes } => println!(
                        "  ✓ seq={} {} bytes time={}",
                        sample.sequence,
                        bytes,
                        format_duration(*rtt).cyan()
                    ),
                    EchoOutcome::TimedOut => {
                        println!("  ✗ seq={} {}", sample.sequence, "timed out".red())
                    }
                    EchoOutcome::NonReply { icmp_type, code } => println!(
                        "  ✗ seq={} {}",
                        sample.sequence,
                        format!("ICMP type {icmp_type} code {code}").red()
                    ),
                    EchoOutcome::Malformed(reason) => {
                        println!("  ✗ seq={} {}", sample.sequence, reason.red())
                    }
                }
            }
            let show = |d: Option<Duration>| d.map(format_duration).unwrap_or_else(|| "-".to_string());
            println!(
                "  {} sent, {} received, {:.1}% loss, rtt min/avg/max = {}/{}/{}",
                summary.sent,
                summary.received,
                summary.loss_percent,
                show(summary.min),
                show(summary.avg),
                show(summary.max)
            );
        }
        Measurement::Tcp {
            latency,
            local,
            peer,
        } => {
            println!("  connected {} -> {}", local, peer);
            println!("  connect time: {}", format_duration(*latency).cyan());
        }
    }
}

#[derive(serde::Serialize)]
struct JsonSample {
    sequence: u16,
    outcome: &'static str,
    rtt_ms: Option<f64>,
    detail: Option<String>,
}

#[derive(serde::Serialize)]
struct JsonResult {
    mode: String,
    host: String,
    address: Option<String>,
    verdict: Verdict,
    verdicts: Vec<DimensionVerdict>,
    duration_ms: Option<f64>,
    status: Option<u16>,
    samples: Option<Vec<JsonSample>>,
    loss_percent: Option<f64>,
    error: Option<String>,
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn print_result_json(result: &ProbeResult) {
    let (status, samples, loss_percent) = match &result.measurement {
        Measurement::Http { status, .. } => (Some(*status), None, None),
        Measurement::Icmp { samples, summary } => {
            let samples = samples
                .iter()
                .map(|s| match &s.outcome {
                    EchoOutcome::Reply { rtt, .. } => JsonSample {
                        sequence: s.sequence,
                        outcome: "reply",
                        rtt_ms: Some(millis(*rtt)),
                        detail: None,
                    },
                    EchoOutcome::TimedOut => JsonSample {
                        sequence: s.sequence,
                        outcome: "timeout",
                        rtt_ms: None,
                        detail: None,
                    },
                    EchoOutcome::NonReply { icmp_type, code } => JsonSample {
                        sequence: s.sequence,
                        outcome: "non-reply",
                        rtt_ms: None,
                        detail: Some(format!("type {icmp_type} code {code}")),
                    },
                    EchoOutcome::Malformed(reason) => JsonSample {
                        sequence: s.sequence,
                        outcome: "malformed",
                        rtt_ms: None,
                        detail: Some(reason.clone()),
                    },
                })
                .collect();
            (None, Some(samples), Some(summary.loss_percent))
        }
        Measurement::Tcp { .. } => (None, None, None),
    };

    let json = JsonResult {
        mode: result.mode.to_string(),
        host: result.host.clone(),
        address: Some(result.address.to_string()),
        verdict: result.worst_verdict(),
        verdicts: result.verdicts.clone(),
        duration_ms: result.duration().map(millis),
        status,
        samples,
        loss_percent,
        error: None,
    };

    match serde_json::to_string_pretty(&json) {
        Ok(text) => println!("{text}"),
        Err(error) => eprintln!("failed to encode result: {error}"),
    }
}

fn print_error_json(config: &Config, error: &ProbeError) {
    let json = JsonResult {
        mode: config.mode.to_string(),
        host: config.host.clone(),
        address: None,
        verdict: Verdict::Err,
        verdicts: Vec::new(),
        duration_ms: None,
        status: None,
        samples: None,
        loss_percent: None,
        error: Some(error.to_string()),
    };

    match serde_json::to_string_pretty(&json) {
        Ok(text) => println!("{text}"),
        Err(error) => eprintln!("failed to encode result: {error}"),
    }
}
