//! The `Observer` capability: the session's only way of telling the outside
//! world anything. Every method fires on the reactor thread, in emission
//! order. `Observer` is held by `Session` as a non-owning handle so the
//! session can be dropped without the observer's cooperation.

use std::net::IpAddr;
use std::time::Duration;

use crate::error::EngineError;
use crate::hop::HopResult;
use crate::session::SessionResult;
use crate::statistics::StatisticsSnapshot;

/// Receives every event a [`crate::session::Session`] or
/// [`crate::pinger::ContinuousPinger`] emits. Implementors MUST NOT call
/// back into the emitting session's `start`/`stop` from within a callback —
/// doing so is undefined behavior.
pub trait Observer {
    /// The session has a bound socket and is about to start probing.
    fn on_started(&self, address: IpAddr);

    /// Terminal failure; no further events follow for this run.
    fn on_failed(&self, error: &EngineError);

    /// Informational: a probe was just sent.
    fn on_probe_sent(&self, hop: u8, sequence: u16);

    /// Informational: a reply with a valid RTT arrived.
    fn on_response(&self, hop: u8, rtt: Duration);

    /// Informational: a hop's per-hop timer fired with outstanding probes.
    fn on_hop_timeout(&self, hop: u8);

    /// Authoritative per-hop result — the source of truth for a trace's
    /// progress, unlike the informational callbacks above.
    fn on_hop_completed(&self, result: &HopResult);

    /// Fires after any change to `probes_sent`/`responses_received`/`timeouts`.
    fn on_statistics(&self, statistics: &StatisticsSnapshot);

    /// Terminal success.
    fn on_finished(&self, result: &SessionResult);
}
