//! The TTL-escalating trace session: owns the socket, the probe table and
//! the per-hop timer, and drives `HopController` by feeding it classified
//! replies and timer ticks.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::codec::{Classification, IcmpCodec, ProbePayload};
use crate::error::{EngineError, Result};
use crate::family::{AddrFamily, AddressStyle};
use crate::hop::{HopController, HopResult, NextAction, ReplyKind};
use crate::observer::Observer;
use crate::probe_table::ProbeTable;
use crate::reactor::Reactor;
use crate::resolver::Resolver;
use crate::socket::{ProbeSocket, SocketOpener, SystemSocketOpener};
use crate::statistics::{Statistics, StatisticsSnapshot};

/// How stale a `ProbeTable` entry has to be before a sweep discards it,
/// independent of the per-hop timer — bounds memory if a probe's reply and
/// the hop timeout both get lost.
const PROBE_SWEEP_AGE: Duration = Duration::from_secs(30);
const RECV_BUF_LEN: usize = 1500;

/// Tunables for one trace. Every field has the default the engine uses when
/// a caller doesn't override it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_hops: u8,
    pub per_hop_timeout: Duration,
    pub probes_per_hop: u8,
    pub inter_probe_gap: Duration,
    pub address_style: AddressStyle,
    /// Use an unprivileged datagram ICMP socket instead of a raw one.
    pub unprivileged: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_hops: 30,
            per_hop_timeout: Duration::from_secs(5),
            probes_per_hop: 3,
            inter_probe_gap: Duration::from_millis(10),
            address_style: AddressStyle::Any,
            unprivileged: false,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=255).contains(&self.max_hops) {
            return Err(EngineError::InvalidConfiguration(
                "max_hops must be between 1 and 255".into(),
            ));
        }
        if !(1..=10).contains(&self.probes_per_hop) {
            return Err(EngineError::InvalidConfiguration(
                "probes_per_hop must be between 1 and 10".into(),
            ));
        }
        if self.per_hop_timeout.is_zero() {
            return Err(EngineError::InvalidConfiguration(
                "per_hop_timeout must be greater than zero".into(),
            ));
        }
        if self.per_hop_timeout > Duration::from_secs(60) {
            return Err(EngineError::InvalidConfiguration(
                "per_hop_timeout must be at most 60 seconds".into(),
            ));
        }
        Ok(())
    }
}

/// Everything a finished (or stopped) trace leaves behind.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub target_hostname: String,
    pub target_address: Option<IpAddr>,
    pub max_hops: u8,
    pub actual_hops: u8,
    pub total_time: Duration,
    pub hops: Vec<HopResult>,
    pub reached_target: bool,
    pub statistics: StatisticsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Resolving,
    Running,
    Finished,
    Failed,
    Stopped,
}

/// A cheaply-clonable request to stop a running [`Session`] from outside the
/// task driving it.
#[derive(Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// One TTL-escalating trace from the local host to a resolved target.
///
/// Generic over the capabilities it needs from the outside world —
/// [`Resolver`], [`Reactor`], [`Observer`] and [`SocketOpener`] — so tests
/// can supply deterministic doubles for all four without touching a real
/// socket or DNS resolver.
pub struct Session<Res: Resolver, Rea: Reactor, Obs: Observer, So: SocketOpener = SystemSocketOpener> {
    target_hostname: String,
    config: SessionConfig,
    identifier: u16,
    resolver: Res,
    reactor: Rea,
    observer: Obs,
    socket_opener: So,
    state: SessionState,
    next_sequence: u16,
    wrapped: bool,
    probe_table: ProbeTable,
    statistics: Statistics,
    hops: Vec<HopResult>,
    target_address: Option<IpAddr>,
    cancel: CancellationToken,
}

impl<Res: Resolver, Rea: Reactor, Obs: Observer> Session<Res, Rea, Obs, SystemSocketOpener> {
    pub fn new(
        target_hostname: impl Into<String>,
        config: SessionConfig,
        resolver: Res,
        reactor: Rea,
        observer: Obs,
    ) -> Result<Self> {
        Self::with_socket_opener(target_hostname, config, resolver, reactor, observer, SystemSocketOpener)
    }
}

impl<Res: Resolver, Rea: Reactor, Obs: Observer, So: SocketOpener> Session<Res, Rea, Obs, So> {
    /// Like [`Session::new`], but with an explicit [`SocketOpener`] —
    /// the hook tests use to inject a scripted socket.
    pub fn with_socket_opener(
        target_hostname: impl Into<String>,
        config: SessionConfig,
        resolver: Res,
        reactor: Rea,
        observer: Obs,
        socket_opener: So,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            target_hostname: target_hostname.into(),
            config,
            identifier: rand::random(),
            resolver,
            reactor,
            observer,
            socket_opener,
            state: SessionState::Idle,
            next_sequence: 0,
            wrapped: false,
            probe_table: ProbeTable::new(),
            statistics: Statistics::new(),
            hops: Vec::new(),
            target_address: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Override the auto-generated session identifier (useful for tests
    /// that need deterministic wire bytes).
    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Resolving | SessionState::Running)
    }

    /// A clonable handle any task can use to request this session stop.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Stop-from-here: synchronous, idempotent, safe to call from any state.
    /// Returns `NotRunning` only when the session never started.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == SessionState::Idle {
            return Err(EngineError::NotRunning);
        }
        self.cancel.cancel();
        Ok(())
    }

    fn next_sequence(&mut self) -> u16 {
        let seq = self.next_sequence;
        let (next, wrapped) = self.next_sequence.overflowing_add(1);
        self.next_sequence = next;
        if wrapped {
            self.wrapped = true;
        }
        seq
    }

    /// Resolve the target, bind a socket and run hops 1..=max_hops (or until
    /// the destination replies, or the session is stopped).
    pub async fn start(&mut self) -> Result<SessionResult> {
        if matches!(self.state, SessionState::Resolving | SessionState::Running) {
            return Err(EngineError::AlreadyRunning);
        }

        self.state = SessionState::Resolving;
        self.statistics.reset();
        self.probe_table.clear();
        self.hops.clear();
        self.next_sequence = 0;
        self.wrapped = false;
        let start_time = Instant::now();

        let candidates = match self
            .resolver
            .resolve(&self.target_hostname, self.config.address_style)
            .await
        {
            Ok(c) => c,
            Err(err) => {
                self.state = SessionState::Failed;
                self.observer.on_failed(&err);
                return Err(err);
            }
        };
        let dest = match candidates.first() {
            Some(dest) => *dest,
            None => {
                let err = EngineError::ResolutionFailed {
                    hostname: self.target_hostname.clone(),
                    style: self.config.address_style,
                };
                self.state = SessionState::Failed;
                self.observer.on_failed(&err);
                return Err(err);
            }
        };
        let family = AddrFamily::of(&dest.ip());

        let socket = match self.socket_opener.open(family, self.config.unprivileged) {
            Ok(s) => s,
            Err(err) => {
                self.state = SessionState::Failed;
                self.observer.on_failed(&err);
                return Err(err);
            }
        };

        self.target_address = Some(dest.ip());
        self.state = SessionState::Running;
        self.observer.on_started(dest.ip());

        let codec = IcmpCodec::new(self.identifier, self.config.unprivileged);
        let mut controller = HopController::new(
            self.config.max_hops,
            self.config.probes_per_hop,
            self.config.per_hop_timeout,
        );

        let (reached_target, stopped) =
            self.run_hops(socket.as_ref(), &codec, &mut controller, dest, family).await;

        self.state = if stopped {
            SessionState::Stopped
        } else {
            SessionState::Finished
        };

        let result = SessionResult {
            target_hostname: self.target_hostname.clone(),
            target_address: self.target_address,
            max_hops: self.config.max_hops,
            actual_hops: self.hops.iter().map(|h| h.hop_number).max().unwrap_or(0),
            total_time: start_time.elapsed(),
            hops: self.hops.clone(),
            reached_target,
            statistics: self.statistics.snapshot(),
        };
        self.observer.on_finished(&result);
        Ok(result)
    }

    async fn run_hops(
        &mut self,
        socket: &dyn ProbeSocket,
        codec: &IcmpCodec,
        controller: &mut HopController,
        dest: SocketAddr,
        family: AddrFamily,
    ) -> (bool, bool) {
        let mut hop = 1u8;
        loop {
            if self.cancel.is_cancelled() {
                return (false, true);
            }

            let plan = match controller.enter_hop(hop) {
                Some(plan) => plan,
                None => return (false, false),
            };

            if let Err(e) = socket.set_ttl(plan.ttl) {
                self.observer.on_failed(&EngineError::SystemError(e));
                return (false, false);
            }

            for probe_index in 0..plan.probes_per_hop {
                let sequence = self.next_sequence();
                let payload = ProbePayload::now(plan.hop, probe_index);
                let packet = codec.build_echo(family, sequence, &payload);

                match socket.send_to(&packet, dest) {
                    Ok(_) => {
                        self.probe_table
                            .record(sequence, plan.hop, probe_index, Instant::now());
                        self.statistics.record_sent();
                        self.observer.on_statistics(&self.statistics.snapshot());
                        self.observer.on_probe_sent(plan.hop, sequence);
                    }
                    Err(e) => {
                        tracing::warn!(hop = plan.hop, probe_index, error = %e, "probe send failed");
                    }
                }

                if probe_index + 1 < plan.probes_per_hop {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return (false, true),
                        _ = self.reactor.sleep(self.config.inter_probe_gap) => {}
                    }
                }
            }

            self.probe_table.sweep(Instant::now(), PROBE_SWEEP_AGE);

            match self
                .await_hop_resolution(socket, codec, controller, plan.hop, family)
                .await
            {
                HopWait::Next(NextAction::Advance(next_hop)) => {
                    hop = next_hop;
                }
                HopWait::Next(NextAction::Finish { reached_target }) => {
                    return (reached_target, false);
                }
                HopWait::Stopped => return (false, true),
            }
        }
    }

    async fn await_hop_resolution(
        &mut self,
        socket: &dyn ProbeSocket,
        codec: &IcmpCodec,
        controller: &mut HopController,
        hop: u8,
        family: AddrFamily,
    ) -> HopWait {
        let deadline = Instant::now() + controller.per_hop_timeout();
        let mut buf = [0u8; RECV_BUF_LEN];

        loop {
            let now = Instant::now();
            if now >= deadline {
                let collected = self.probe_table.collect_for_hop(hop);
                let outcome = controller
                    .on_timer(hop, SystemTime::now(), collected)
                    .expect("hop matches controller's current hop by construction");
                if let Some(result) = outcome.result {
                    self.observer.on_hop_timeout(hop);
                    self.emit_hop_result(result);
                }
                return HopWait::Next(outcome.next);
            }

            let remaining = deadline - now;
            tokio::select! {
                _ = self.cancel.cancelled() => return HopWait::Stopped,
                _ = self.reactor.sleep(remaining) => continue,
                ready = self.reactor.wait_readable(socket.raw_fd()) => {
                    if ready.is_err() {
                        continue;
                    }
                    loop {
                        let (len, from) = match socket.try_recv(&mut buf) {
                            Ok(pair) => pair,
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                            Err(_) => break,
                        };
                        if let Some(action) =
                            self.handle_datagram(codec, controller, family, &buf[..len], from.ip())
                        {
                            return HopWait::Next(action);
                        }
                    }
                }
            }
        }
    }

    /// Classify one inbound datagram and feed it to `controller`. Returns
    /// `Some` only when the reply belongs to the hop currently being waited
    /// on; replies for any other hop (already advanced past, or foreign)
    /// are consumed silently.
    fn handle_datagram(
        &mut self,
        codec: &IcmpCodec,
        controller: &mut HopController,
        family: AddrFamily,
        datagram: &[u8],
        from: IpAddr,
    ) -> Option<NextAction> {
        let (sequence, kind) = match codec.classify(family, datagram) {
            Classification::EchoReply { seq, .. } => (seq, ReplyKind::EchoReply),
            Classification::TimeExceeded { inner_seq, .. } => (inner_seq, ReplyKind::TimeExceeded),
            Classification::Unreachable { inner_seq, .. } => (inner_seq, ReplyKind::Unreachable),
            Classification::Other | Classification::Malformed => return None,
        };

        let record = self.probe_table.take(sequence)?;
        let rtt = Instant::now().saturating_duration_since(record.sent_at);

        let outcome = controller.on_reply(SystemTime::now(), record, rtt, kind, Some(from))?;
        self.observer.on_response(record.hop, rtt);
        self.emit_hop_result(outcome.result);
        Some(outcome.next)
    }

    fn emit_hop_result(&mut self, result: HopResult) {
        if result.is_timeout {
            self.statistics.record_timeout();
        } else {
            self.statistics.record_response(result.rtt.unwrap_or_default());
        }
        self.observer.on_statistics(&self.statistics.snapshot());
        self.observer.on_hop_completed(&result);
        self.hops.push(result);
    }
}

enum HopWait {
    Next(NextAction),
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hop::HopResult as Hop;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    struct FixedResolver(SocketAddr);

    impl Resolver for FixedResolver {
        async fn resolve(&self, _hostname: &str, _style: AddressStyle) -> Result<Vec<SocketAddr>> {
            Ok(vec![self.0])
        }
    }

    #[derive(Clone, Default)]
    struct ImmediateReactor;

    impl Reactor for ImmediateReactor {
        async fn wait_readable(&self, _fd: std::os::fd::RawFd) -> std::io::Result<()> {
            tokio::task::yield_now().await;
            Ok(())
        }

        async fn sleep(&self, delay: Duration) {
            tokio::time::sleep(delay.min(Duration::from_millis(2))).await;
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        hops: Mutex<Vec<Hop>>,
        finished: Mutex<Option<SessionResult>>,
    }

    impl Observer for RecordingObserver {
        fn on_started(&self, _address: IpAddr) {}
        fn on_failed(&self, _error: &EngineError) {}
        fn on_probe_sent(&self, _hop: u8, _sequence: u16) {}
        fn on_response(&self, _hop: u8, _rtt: Duration) {}
        fn on_hop_timeout(&self, _hop: u8) {}
        fn on_hop_completed(&self, result: &Hop) {
            self.hops.lock().unwrap().push(result.clone());
        }
        fn on_statistics(&self, _statistics: &StatisticsSnapshot) {}
        fn on_finished(&self, result: &SessionResult) {
            *self.finished.lock().unwrap() = Some(result.clone());
        }
    }

    fn config_for_test() -> SessionConfig {
        SessionConfig {
            max_hops: 3,
            per_hop_timeout: Duration::from_millis(30),
            probes_per_hop: 1,
            inter_probe_gap: Duration::from_millis(1),
            address_style: AddressStyle::Any,
            unprivileged: false,
        }
    }

    #[test]
    fn session_rejects_invalid_config() {
        let bad = SessionConfig {
            max_hops: 0,
            ..SessionConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn session_rejects_timeout_over_60s() {
        let bad = SessionConfig {
            per_hop_timeout: Duration::from_secs(61),
            ..SessionConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn session_accepts_timeout_at_60s_boundary() {
        let ok = SessionConfig {
            per_hop_timeout: Duration::from_secs(60),
            ..SessionConfig::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn stop_before_start_is_not_running() {
        let resolver = FixedResolver(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)), 0));
        let mut session = Session::new(
            "9.9.9.9",
            config_for_test(),
            resolver,
            ImmediateReactor,
            RecordingObserver::default(),
        )
        .unwrap();
        assert!(matches!(session.stop(), Err(EngineError::NotRunning)));
    }
}
