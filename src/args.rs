use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::family::AddressStyle;
use crate::pinger::PingConfig;
use crate::session::SessionConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "tracepulse")]
#[command(about = "A traceroute and continuous-ping engine built on raw/datagram ICMP sockets")]
#[command(version)]
pub struct Args {
    /// Target hostname or IP address
    pub target: String,

    /// Maximum number of hops
    #[arg(short = 'M', long, default_value = "30")]
    pub max_hops: u8,

    /// Per-hop timeout in milliseconds
    #[arg(long, default_value = "5000")]
    pub timeout: u64,

    /// Probes sent per hop
    #[arg(short, long, default_value = "3")]
    pub probes: u8,

    /// Wait time between probes in milliseconds
    #[arg(short, long, default_value = "10")]
    pub inter_probe_gap: u64,

    /// Restrict to one address family
    #[arg(short, long, value_enum, default_value = "any")]
    pub family: FamilyArg,

    /// Show IP addresses instead of resolving hostnames
    #[arg(short, long)]
    pub numeric: bool,

    /// Use an unprivileged ICMP datagram socket instead of a raw socket
    #[arg(long)]
    pub unprivileged: bool,

    /// Emit the final result as JSON instead of a text report
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub mode: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Mode {
    /// Continuously ping the target instead of tracing the path to it
    Ping {
        /// Interval between echoes in milliseconds
        #[arg(short, long, default_value = "1000")]
        interval: u64,

        /// Reply timeout in milliseconds
        #[arg(short, long, default_value = "2000")]
        timeout: u64,

        /// Stop after this many echoes (default: run until interrupted)
        #[arg(short, long)]
        count: Option<usize>,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyArg {
    Any,
    V4,
    V6,
}

impl From<FamilyArg> for AddressStyle {
    fn from(value: FamilyArg) -> Self {
        match value {
            FamilyArg::Any => AddressStyle::Any,
            FamilyArg::V4 => AddressStyle::V4Only,
            FamilyArg::V6 => AddressStyle::V6Only,
        }
    }
}

impl Args {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_hops: self.max_hops,
            per_hop_timeout: Duration::from_millis(self.timeout),
            probes_per_hop: self.probes,
            inter_probe_gap: Duration::from_millis(self.inter_probe_gap),
            address_style: self.family.into(),
            unprivileged: self.unprivileged,
        }
    }

    pub fn ping_config(&self, interval_ms: u64, timeout_ms: u64) -> PingConfig {
        PingConfig {
            interval: Duration::from_millis(interval_ms),
            reply_timeout: Duration::from_millis(timeout_ms),
            address_style: self.family.into(),
            unprivileged: self.unprivileged,
            ..PingConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let args = Args::try_parse_from(["tracepulse", "example.com"]).unwrap();
        assert_eq!(args.target, "example.com");
        assert_eq!(args.max_hops, 30);
        assert_eq!(args.timeout, 5000);
        assert_eq!(args.probes, 3);
        assert!(!args.numeric);
        assert!(args.mode.is_none());
    }

    #[test]
    fn custom_values() {
        let args = Args::try_parse_from([
            "tracepulse",
            "--max-hops",
            "50",
            "--timeout",
            "2000",
            "--probes",
            "1",
            "--numeric",
            "google.com",
        ])
        .unwrap();

        assert_eq!(args.target, "google.com");
        assert_eq!(args.max_hops, 50);
        assert_eq!(args.timeout, 2000);
        assert_eq!(args.probes, 1);
        assert!(args.numeric);
    }

    #[test]
    fn ping_subcommand_parses() {
        let args = Args::try_parse_from(["tracepulse", "example.com", "ping", "-i", "500", "-c", "5"]).unwrap();
        match args.mode {
            Some(Mode::Ping { interval, count, .. }) => {
                assert_eq!(interval, 500);
                assert_eq!(count, Some(5));
            }
            _ => panic!("expected Ping mode"),
        }
    }

    #[test]
    fn session_config_reflects_args() {
        let args = Args::try_parse_from(["tracepulse", "--max-hops", "10", "example.com"]).unwrap();
        let config = args.session_config();
        assert_eq!(config.max_hops, 10);
        assert!(config.validate().is_ok());
    }
}
