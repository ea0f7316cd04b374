//! Text-report rendering: an [`Observer`] that prints each hop as it
//! completes and a final statistics summary, in the column-oriented style a
//! terminal traceroute report uses.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::EngineError;
use crate::hop::HopResult;
use crate::observer::Observer;
use crate::session::SessionResult;
use crate::statistics::StatisticsSnapshot;

fn duration_to_ms_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_optional_ip(addr: Option<IpAddr>) -> String {
    match addr {
        Some(ip) => ip.to_string(),
        None => "???".to_string(),
    }
}

/// Renders a trace as plain text to stdout, one line per hop as it
/// completes, with a final summary line once the session finishes.
///
/// `numeric` skips hostname resolution entirely — intermediate-hop names
/// are never resolved inside the engine, so a non-numeric report only ever
/// has an address to show anyway; the flag exists for forward compatibility
/// with a reverse-DNS-enriching wrapper observer.
pub struct ReportObserver {
    numeric: bool,
    target: Mutex<String>,
}

impl ReportObserver {
    pub fn new(numeric: bool) -> Self {
        Self {
            numeric,
            target: Mutex::new(String::new()),
        }
    }

    fn format_hop_line(&self, hop: &HopResult) -> String {
        let host = if hop.is_timeout {
            "*".to_string()
        } else {
            format_optional_ip(hop.router)
        };
        let rtt = match (hop.is_timeout, hop.rtt) {
            (true, _) => "   ???".to_string(),
            (false, Some(rtt)) => format!("{:6.1}", duration_to_ms_f64(rtt)),
            (false, None) => "   ???".to_string(),
        };
        let marker = if hop.is_destination { " (destination)" } else { "" };
        format!(
            "{:2}.|-- {:20} {} ms{}",
            hop.hop_number, host, rtt, marker
        )
    }
}

impl Observer for ReportObserver {
    fn on_started(&self, address: IpAddr) {
        *self.target.lock().unwrap() = address.to_string();
        println!(
            "Start: {}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("HOST: localhost -> {address}");
        println!();
    }

    fn on_failed(&self, error: &EngineError) {
        eprintln!("tracepulse: {error}");
    }

    fn on_probe_sent(&self, hop: u8, sequence: u16) {
        tracing::debug!(hop, sequence, "probe sent");
    }

    fn on_response(&self, hop: u8, rtt: Duration) {
        tracing::debug!(hop, rtt_ms = duration_to_ms_f64(rtt), "reply received");
    }

    fn on_hop_timeout(&self, hop: u8) {
        tracing::debug!(hop, "hop timed out");
    }

    fn on_hop_completed(&self, result: &HopResult) {
        let _ = self.numeric; // reserved for a future reverse-DNS wrapper
        println!("{}", self.format_hop_line(result));
    }

    fn on_statistics(&self, _statistics: &StatisticsSnapshot) {}

    fn on_finished(&self, result: &SessionResult) {
        println!();
        if result.reached_target {
            println!(
                "Reached {} in {} hops ({:.1} ms)",
                result.target_hostname,
                result.actual_hops,
                duration_to_ms_f64(result.total_time)
            );
        } else {
            println!(
                "Did not reach {} within {} hops ({:.1} ms)",
                result.target_hostname,
                result.max_hops,
                duration_to_ms_f64(result.total_time)
            );
        }
        let stats = &result.statistics;
        println!(
            "{} probes sent, {} replies, {} timeouts, {:.1}% loss",
            stats.probes_sent, stats.responses_received, stats.timeouts, stats.loss_pct
        );
        if let (Some(min), Some(avg), Some(max)) = (stats.min_latency, stats.avg_latency, stats.max_latency) {
            println!(
                "rtt min/avg/max = {:.1}/{:.1}/{:.1} ms",
                duration_to_ms_f64(min),
                duration_to_ms_f64(avg),
                duration_to_ms_f64(max)
            );
        }
    }
}

/// Renders each continuous-ping echo as a single line, `ping`-style.
pub struct PingReportObserver {
    target: String,
}

impl PingReportObserver {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }

    pub fn report(&self, outcome: &crate::pinger::EchoOutcome) {
        match outcome {
            crate::pinger::EchoOutcome::Reply { rtt } => {
                println!("reply from {}: time={:.1} ms", self.target, duration_to_ms_f64(*rtt));
            }
            crate::pinger::EchoOutcome::Timeout => {
                println!("request timeout for {}", self.target);
            }
            crate::pinger::EchoOutcome::Diagnostic { description } => {
                println!("{} : {}", self.target, description);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn format_hop_line_shows_star_on_timeout() {
        let observer = ReportObserver::new(true);
        let hop = HopResult {
            hop_number: 3,
            router: None,
            rtt: None,
            is_destination: false,
            is_timeout: true,
            sequence: 0,
            probe_index: 0,
            observed_at: SystemTime::now(),
        };
        assert!(observer.format_hop_line(&hop).contains('*'));
    }

    #[test]
    fn format_hop_line_marks_destination() {
        let observer = ReportObserver::new(true);
        let hop = HopResult {
            hop_number: 5,
            router: Some("93.184.216.34".parse().unwrap()),
            rtt: Some(Duration::from_millis(12)),
            is_destination: true,
            is_timeout: false,
            sequence: 0,
            probe_index: 0,
            observed_at: SystemTime::now(),
        };
        assert!(observer.format_hop_line(&hop).contains("(destination)"));
    }
}
