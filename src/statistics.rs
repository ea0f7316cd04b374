//! Aggregate sent/received/timeout counters and derive latency statistics.
//!
//! `Statistics` is pure bookkeeping: it has no notion of hops or sessions,
//! only counts and an ordered list of observed latencies, so both
//! [`crate::session::Session`] and [`crate::pinger::ContinuousPinger`] can
//! share it.

use std::time::Duration;

/// Running counters plus the ordered latencies they were derived from.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    probes_sent: u64,
    responses_received: u64,
    timeouts: u64,
    latencies: Vec<Duration>,
}

/// A point-in-time, read-only view suitable for handing to an `Observer`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticsSnapshot {
    pub probes_sent: u64,
    pub responses_received: u64,
    pub timeouts: u64,
    pub loss_pct: f64,
    pub min_latency: Option<Duration>,
    pub avg_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self) {
        self.probes_sent += 1;
    }

    pub fn record_response(&mut self, rtt: Duration) {
        self.responses_received += 1;
        self.latencies.push(rtt);
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn probes_sent(&self) -> u64 {
        self.probes_sent
    }

    pub fn responses_received(&self) -> u64 {
        self.responses_received
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    /// Reset every counter and the latency history; used when a session
    /// transitions back to `Idle`/`Stopped` before a fresh `start`.
    pub fn reset(&mut self) {
        self.probes_sent = 0;
        self.responses_received = 0;
        self.timeouts = 0;
        self.latencies.clear();
    }

    /// Derive a snapshot. Pure function of the counters and the ordered
    /// latency list — never mutates `self`.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let loss_pct = if self.probes_sent > 0 {
            let lost = self.probes_sent.saturating_sub(self.responses_received);
            (lost as f64 / self.probes_sent as f64) * 100.0
        } else {
            0.0
        };

        let (min_latency, avg_latency, max_latency) = if self.latencies.is_empty() {
            (None, None, None)
        } else {
            let min = *self.latencies.iter().min().unwrap();
            let max = *self.latencies.iter().max().unwrap();
            let sum: Duration = self.latencies.iter().sum();
            let avg = sum / self.latencies.len() as u32;
            (Some(min), Some(avg), Some(max))
        };

        StatisticsSnapshot {
            probes_sent: self.probes_sent,
            responses_received: self.responses_received,
            timeouts: self.timeouts,
            loss_pct,
            min_latency,
            avg_latency,
            max_latency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_statistics_have_no_latencies_and_zero_loss() {
        let snap = Statistics::new().snapshot();
        assert_eq!(snap.probes_sent, 0);
        assert_eq!(snap.loss_pct, 0.0);
        assert!(snap.min_latency.is_none());
    }

    #[test]
    fn loss_percentage_reflects_dropped_replies() {
        // 10 echoes sent, replies #4 and #7 dropped.
        let mut stats = Statistics::new();
        let rtts_ms = [10u64, 12, 11, 0 /*dropped*/, 13, 9, 0 /*dropped*/, 14, 10, 11];
        for rtt_ms in rtts_ms {
            stats.record_sent();
            if rtt_ms == 0 {
                stats.record_timeout();
            } else {
                stats.record_response(Duration::from_millis(rtt_ms));
            }
        }

        let snap = stats.snapshot();
        assert_eq!(snap.probes_sent, 10);
        assert_eq!(snap.responses_received, 8);
        assert_eq!(snap.timeouts, 2);
        assert_eq!(snap.loss_pct, 20.0);
        assert_eq!(snap.min_latency, Some(Duration::from_millis(9)));
        assert_eq!(snap.max_latency, Some(Duration::from_millis(14)));
    }

    #[test]
    fn reset_clears_everything() {
        let mut stats = Statistics::new();
        stats.record_sent();
        stats.record_response(Duration::from_millis(5));
        stats.reset();
        let snap = stats.snapshot();
        assert_eq!(snap.probes_sent, 0);
        assert_eq!(snap.responses_received, 0);
        assert!(snap.avg_latency.is_none());
    }

    #[test]
    fn invariant_responses_plus_timeouts_never_exceeds_sent() {
        let mut stats = Statistics::new();
        stats.record_sent();
        stats.record_response(Duration::from_millis(1));
        let snap = stats.snapshot();
        assert!(snap.responses_received + snap.timeouts <= snap.probes_sent);
    }
}
