//! Per-hop TTL escalation, probe emission cadence, destination detection and
//! progression: the first reply for a hop advances the session, and any
//! reply for a hop the session has already left behind is dropped to
//! preserve the non-decreasing hop-number ordering a completed trace must
//! have.
//!
//! `HopController` is a synchronous state machine; it owns no I/O. `Session`
//! owns the socket, the `ProbeTable` and the timer handle; `HopController`
//! only ever *returns* what happened so `Session` can act on it.

use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use crate::probe_table::ProbeRecord;

/// One per-hop (or per-probe) result. Created exactly once per reply or
/// per timed-out hop; never mutated after emission.
#[derive(Debug, Clone, PartialEq)]
pub struct HopResult {
    pub hop_number: u8,
    pub router: Option<IpAddr>,
    pub rtt: Option<Duration>,
    pub is_destination: bool,
    pub is_timeout: bool,
    pub sequence: u16,
    pub probe_index: u8,
    pub observed_at: SystemTime,
}

/// What kind of classified reply provoked [`HopController::on_reply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    EchoReply,
    TimeExceeded,
    Unreachable,
}

/// What `Session` should do after a classified reply is processed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyOutcome {
    pub result: HopResult,
    pub next: NextAction,
}

/// What `Session` should do after a per-hop timer fires.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerOutcome {
    pub result: Option<HopResult>,
    pub next: NextAction,
}

/// The progression decision a `HopController` call resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Move on to this hop (may be `> max_hops`, in which case `Session`
    /// must finish with `reached_target = false` per step 1 of "Enter hop").
    Advance(u8),
    /// The destination has replied; the session is done.
    Finish { reached_target: bool },
}

/// Plan for entering a new hop: what TTL/hop-limit to set on the socket and
/// how many probes to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnterHopPlan {
    pub hop: u8,
    pub ttl: u8,
    pub probes_per_hop: u8,
}

/// Per-hop TTL/timeout state machine.
#[derive(Debug)]
pub struct HopController {
    current_hop: u8,
    max_hops: u8,
    probes_per_hop: u8,
    per_hop_timeout: Duration,
}

impl HopController {
    pub fn new(max_hops: u8, probes_per_hop: u8, per_hop_timeout: Duration) -> Self {
        Self {
            current_hop: 0,
            max_hops,
            probes_per_hop,
            per_hop_timeout,
        }
    }

    pub fn current_hop(&self) -> u8 {
        self.current_hop
    }

    pub fn per_hop_timeout(&self) -> Duration {
        self.per_hop_timeout
    }

    /// Attempt to enter `hop`. Returns `None` and leaves state untouched if
    /// `hop` exceeds `max_hops` — `Session` must finish in that case.
    pub fn enter_hop(&mut self, hop: u8) -> Option<EnterHopPlan> {
        if hop > self.max_hops || hop == 0 {
            return None;
        }
        self.current_hop = hop;
        Some(EnterHopPlan {
            hop,
            ttl: hop,
            probes_per_hop: self.probes_per_hop,
        })
    }

    /// Process a classified reply whose matching [`ProbeRecord`] was found
    /// in the `ProbeTable`. Returns `None` if `record.hop` is not the
    /// current hop (the hop has already advanced past it) — such replies
    /// are dropped silently rather than re-ordered.
    pub fn on_reply(
        &mut self,
        now_wallclock: SystemTime,
        record: ProbeRecord,
        rtt: Duration,
        kind: ReplyKind,
        router: Option<IpAddr>,
    ) -> Option<ReplyOutcome> {
        if record.hop != self.current_hop {
            return None;
        }

        let is_destination = kind == ReplyKind::EchoReply;
        let result = HopResult {
            hop_number: record.hop,
            router,
            rtt: Some(rtt),
            is_destination,
            is_timeout: false,
            sequence: record.sequence,
            probe_index: record.probe_index,
            observed_at: now_wallclock,
        };

        let next = if is_destination {
            NextAction::Finish { reached_target: true }
        } else {
            NextAction::Advance(self.current_hop.saturating_add(1))
        };

        Some(ReplyOutcome { result, next })
    }

    /// Process a per-hop timer firing for `hop`. Returns `None` (ignore) if
    /// the session has already moved past `hop`.
    pub fn on_timer(
        &mut self,
        hop: u8,
        now_wallclock: SystemTime,
        collected: Vec<ProbeRecord>,
    ) -> Option<TimerOutcome> {
        if hop != self.current_hop {
            return None;
        }

        let result = collected.into_iter().next().map(|first| HopResult {
            hop_number: hop,
            router: None,
            rtt: Some(self.per_hop_timeout),
            is_destination: false,
            is_timeout: true,
            sequence: first.sequence,
            probe_index: first.probe_index,
            observed_at: now_wallclock,
        });

        Some(TimerOutcome {
            result,
            next: NextAction::Advance(hop.saturating_add(1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn record(hop: u8, seq: u16) -> ProbeRecord {
        ProbeRecord {
            sequence: seq,
            hop,
            probe_index: 0,
            sent_at: Instant::now(),
        }
    }

    #[test]
    fn enter_hop_rejects_beyond_max() {
        let mut ctl = HopController::new(2, 3, Duration::from_secs(1));
        assert!(ctl.enter_hop(1).is_some());
        assert!(ctl.enter_hop(3).is_none());
    }

    #[test]
    fn on_reply_for_non_destination_advances() {
        let mut ctl = HopController::new(30, 1, Duration::from_secs(1));
        ctl.enter_hop(1).unwrap();
        let outcome = ctl
            .on_reply(
                SystemTime::now(),
                record(1, 10),
                Duration::from_millis(5),
                ReplyKind::TimeExceeded,
                Some("10.0.0.1".parse().unwrap()),
            )
            .unwrap();
        assert!(!outcome.result.is_destination);
        assert_eq!(outcome.next, NextAction::Advance(2));
    }

    #[test]
    fn on_reply_for_destination_finishes() {
        let mut ctl = HopController::new(30, 1, Duration::from_secs(1));
        ctl.enter_hop(3).unwrap();
        let outcome = ctl
            .on_reply(
                SystemTime::now(),
                record(3, 20),
                Duration::from_millis(20),
                ReplyKind::EchoReply,
                Some("93.184.216.34".parse().unwrap()),
            )
            .unwrap();
        assert!(outcome.result.is_destination);
        assert_eq!(outcome.next, NextAction::Finish { reached_target: true });
    }

    #[test]
    fn late_reply_for_hop_already_left_is_dropped() {
        let mut ctl = HopController::new(30, 1, Duration::from_secs(1));
        ctl.enter_hop(1).unwrap();
        ctl.enter_hop(2).unwrap(); // advanced past hop 1
        let outcome = ctl.on_reply(
            SystemTime::now(),
            record(1, 10),
            Duration::from_millis(5),
            ReplyKind::TimeExceeded,
            None,
        );
        assert!(outcome.is_none());
    }

    #[test]
    fn on_timer_with_no_collected_probes_still_advances() {
        let mut ctl = HopController::new(30, 1, Duration::from_secs(1));
        ctl.enter_hop(2).unwrap();
        let outcome = ctl.on_timer(2, SystemTime::now(), Vec::new()).unwrap();
        assert!(outcome.result.is_none());
        assert_eq!(outcome.next, NextAction::Advance(3));
    }

    #[test]
    fn on_timer_with_collected_probes_emits_timeout_result() {
        let mut ctl = HopController::new(30, 2, Duration::from_secs(1));
        ctl.enter_hop(2).unwrap();
        let collected = vec![record(2, 5), record(2, 6)];
        let outcome = ctl.on_timer(2, SystemTime::now(), collected).unwrap();
        let result = outcome.result.unwrap();
        assert!(result.is_timeout);
        assert!(result.router.is_none());
        assert_eq!(outcome.next, NextAction::Advance(3));
    }

    #[test]
    fn on_timer_for_stale_hop_is_ignored() {
        let mut ctl = HopController::new(30, 1, Duration::from_secs(1));
        ctl.enter_hop(1).unwrap();
        ctl.enter_hop(2).unwrap();
        assert!(ctl.on_timer(1, SystemTime::now(), Vec::new()).is_none());
    }
}
