use clap::Parser;
use tracepulse::report::{PingReportObserver, ReportObserver};
use tracepulse::{Args, HickoryResolver, Session, TokioReactor};
use tracing::info;

use tracepulse::args::Mode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter("tracepulse=info")
        .with_writer(std::io::stderr)
        .init();

    info!(target = %args.target, "starting tracepulse");

    match args.mode.clone() {
        Some(Mode::Ping { interval, timeout, count }) => run_ping(&args, interval, timeout, count).await,
        None => run_trace(&args).await,
    }
}

async fn run_trace(args: &Args) -> anyhow::Result<()> {
    let config = args.session_config();
    let resolver = HickoryResolver::new();
    let reactor = TokioReactor::new();
    let observer = ReportObserver::new(args.numeric);

    let mut session = Session::new(args.target.clone(), config, resolver, reactor, observer)?;
    let result = session.start().await?;

    if args.json {
        let json_hops: Vec<_> = result
            .hops
            .iter()
            .map(|hop| {
                serde_json::json!({
                    "hop": hop.hop_number,
                    "router": hop.router.map(|ip| ip.to_string()),
                    "rtt_ms": hop.rtt.map(|d| d.as_secs_f64() * 1000.0),
                    "is_destination": hop.is_destination,
                    "is_timeout": hop.is_timeout,
                })
            })
            .collect();
        let doc = serde_json::json!({
            "target": result.target_hostname,
            "target_address": result.target_address.map(|ip| ip.to_string()),
            "reached_target": result.reached_target,
            "actual_hops": result.actual_hops,
            "hops": json_hops,
            "statistics": {
                "probes_sent": result.statistics.probes_sent,
                "responses_received": result.statistics.responses_received,
                "timeouts": result.statistics.timeouts,
                "loss_pct": result.statistics.loss_pct,
            },
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    }

    Ok(())
}

async fn run_ping(args: &Args, interval_ms: u64, timeout_ms: u64, count: Option<usize>) -> anyhow::Result<()> {
    let config = args.ping_config(interval_ms, timeout_ms);
    let resolver = HickoryResolver::new();
    let reactor = TokioReactor::new();
    let report = PingReportObserver::new(args.target.clone());

    let mut pinger = tracepulse::ContinuousPinger::new(args.target.clone(), config, resolver, reactor)?;

    match count {
        Some(n) => {
            for _ in 0..n {
                let outcome = pinger.ping_once().await?;
                report.report(&outcome);
                tokio::time::sleep(std::time::Duration::from_millis(interval_ms)).await;
            }
        }
        None => {
            pinger.ping(|outcome| report.report(&outcome)).await?;
        }
    }

    Ok(())
}
