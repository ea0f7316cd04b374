//! Bookkeeping for probes that have been sent but not yet resolved into a
//! [`crate::hop::HopResult`], keyed by the 16-bit sequence number stamped
//! into each probe's ICMP header.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One outstanding probe: a hop/index pair stamped with its send time,
/// keyed externally by its 16-bit sequence number.
#[derive(Debug, Clone, Copy)]
pub struct ProbeRecord {
    pub sequence: u16,
    pub hop: u8,
    pub probe_index: u8,
    pub sent_at: Instant,
}

/// Maps outstanding sequence numbers to their probe record.
#[derive(Debug, Default)]
pub struct ProbeTable {
    entries: HashMap<u16, ProbeRecord>,
}

impl ProbeTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert a probe record. A pre-existing entry for the same sequence
    /// (only possible across a sequence-counter wrap) is evicted and logged.
    pub fn record(&mut self, sequence: u16, hop: u8, probe_index: u8, sent_at: Instant) {
        if let Some(evicted) = self.entries.insert(
            sequence,
            ProbeRecord {
                sequence,
                hop,
                probe_index,
                sent_at,
            },
        ) {
            tracing::warn!(
                sequence,
                evicted_hop = evicted.hop,
                evicted_probe_index = evicted.probe_index,
                "sequence collision in probe table, evicting stale entry"
            );
        }
    }

    /// Remove and return the record for `sequence`, if still outstanding.
    pub fn take(&mut self, sequence: u16) -> Option<ProbeRecord> {
        self.entries.remove(&sequence)
    }

    /// Remove and return every record belonging to `hop`, in no particular
    /// order. Used when a per-hop timer fires.
    pub fn collect_for_hop(&mut self, hop: u8) -> Vec<ProbeRecord> {
        let matching: Vec<u16> = self
            .entries
            .values()
            .filter(|r| r.hop == hop)
            .map(|r| r.sequence)
            .collect();
        matching
            .into_iter()
            .filter_map(|seq| self.entries.remove(&seq))
            .collect()
    }

    /// Drop any record older than `max_age`, returning how many were swept.
    /// Bounds memory when a probe never elicits any classification at all
    /// (e.g. a firewall drops both the probe and the error it would have
    /// provoked).
    pub fn sweep(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, record| now.saturating_duration_since(record.sent_at) < max_age);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn record_and_take_round_trip() {
        let mut table = ProbeTable::new();
        let now = Instant::now();
        table.record(5, 2, 0, now);
        let rec = table.take(5).expect("record should be present");
        assert_eq!(rec.hop, 2);
        assert_eq!(rec.probe_index, 0);
        assert!(table.take(5).is_none());
    }

    #[test]
    fn collect_for_hop_removes_only_matching_entries() {
        let mut table = ProbeTable::new();
        let now = Instant::now();
        table.record(1, 3, 0, now);
        table.record(2, 3, 1, now);
        table.record(3, 4, 0, now);

        let collected = table.collect_for_hop(3);
        assert_eq!(collected.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.take(3).is_some());
    }

    #[test]
    fn sweep_evicts_only_stale_entries() {
        let mut table = ProbeTable::new();
        let old = Instant::now();
        table.record(1, 1, 0, old);
        sleep(Duration::from_millis(20));
        table.record(2, 1, 1, Instant::now());

        let removed = table.sweep(Instant::now(), Duration::from_millis(10));
        assert_eq!(removed, 1);
        assert_eq!(table.len(), 1);
        assert!(table.take(2).is_some());
    }

    #[test]
    fn record_collision_evicts_previous_entry() {
        let mut table = ProbeTable::new();
        let now = Instant::now();
        table.record(7, 1, 0, now);
        table.record(7, 9, 2, now);
        let rec = table.take(7).unwrap();
        assert_eq!(rec.hop, 9);
        assert_eq!(rec.probe_index, 2);
    }
}
