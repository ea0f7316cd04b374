//! Continuous and one-shot ping against a single, already-known host — the
//! "just keep pinging this address" sibling of a TTL-escalating [`Session`].

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crate::codec::{Classification, IcmpCodec, ProbePayload};
use crate::error::{EngineError, Result};
use crate::family::{AddrFamily, AddressStyle};
use crate::probe_table::ProbeTable;
use crate::reactor::Reactor;
use crate::resolver::Resolver;
use crate::socket::{ProbeSocket, SocketOpener, SystemSocketOpener};
use crate::statistics::{Statistics, StatisticsSnapshot};

const RECV_BUF_LEN: usize = 1500;

#[derive(Debug, Clone)]
pub struct PingConfig {
    pub interval: Duration,
    pub reply_timeout: Duration,
    pub address_style: AddressStyle,
    pub unprivileged: bool,
    pub latency_history_capacity: usize,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            reply_timeout: Duration::from_secs(2),
            address_style: AddressStyle::Any,
            unprivileged: false,
            latency_history_capacity: 100,
        }
    }
}

impl PingConfig {
    pub fn validate(&self) -> Result<()> {
        // An interval of 0 is a valid, documented mode: it suppresses
        // periodic emission so `ping` sends exactly one echo.
        if self.reply_timeout.is_zero() {
            return Err(EngineError::InvalidConfiguration(
                "reply_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// A single echo's outcome, including a best-effort human-readable
/// description of whatever non-reply ICMP traffic arrived instead.
#[derive(Debug, Clone, PartialEq)]
pub enum EchoOutcome {
    Reply { rtt: Duration },
    Timeout,
    Diagnostic { description: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PingerState {
    Idle,
    ContinuousRunning,
    SingleInProgress,
}

/// Pings one resolved target repeatedly, or one echo at a time, sharing the
/// same wire codec and probe bookkeeping a [`crate::session::Session`] uses.
///
/// Generic over [`SocketOpener`] the same way `Session` is, so tests can
/// inject a scripted socket in place of a real kernel ICMP one.
pub struct ContinuousPinger<Res: Resolver, Rea: Reactor, So: SocketOpener = SystemSocketOpener> {
    target_hostname: String,
    config: PingConfig,
    identifier: u16,
    resolver: Res,
    reactor: Rea,
    socket_opener: So,
    state: PingerState,
    next_sequence: u16,
    probe_table: ProbeTable,
    statistics: Statistics,
    latency_history: VecDeque<Duration>,
    stop_requested: bool,
}

impl<Res: Resolver, Rea: Reactor> ContinuousPinger<Res, Rea, SystemSocketOpener> {
    pub fn new(target_hostname: impl Into<String>, config: PingConfig, resolver: Res, reactor: Rea) -> Result<Self> {
        Self::with_socket_opener(target_hostname, config, resolver, reactor, SystemSocketOpener)
    }
}

impl<Res: Resolver, Rea: Reactor, So: SocketOpener> ContinuousPinger<Res, Rea, So> {
    /// Like [`ContinuousPinger::new`], but with an explicit [`SocketOpener`].
    pub fn with_socket_opener(
        target_hostname: impl Into<String>,
        config: PingConfig,
        resolver: Res,
        reactor: Rea,
        socket_opener: So,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            target_hostname: target_hostname.into(),
            config,
            identifier: rand::random(),
            resolver,
            reactor,
            socket_opener,
            state: PingerState::Idle,
            next_sequence: 0,
            probe_table: ProbeTable::new(),
            statistics: Statistics::new(),
            latency_history: VecDeque::new(),
            stop_requested: false,
        })
    }

    /// Override the auto-generated identifier (useful for tests that need
    /// deterministic wire bytes).
    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    pub fn latency_history(&self) -> impl Iterator<Item = &Duration> {
        self.latency_history.iter()
    }

    /// Request that a running `ping` loop stop after its current echo.
    /// Idempotent; safe to call whether or not a loop is running.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    fn next_sequence(&mut self) -> u16 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }

    fn record_latency(&mut self, rtt: Duration) {
        self.latency_history.push_back(rtt);
        while self.latency_history.len() > self.config.latency_history_capacity {
            self.latency_history.pop_front();
        }
    }

    async fn resolve_and_open(&self) -> Result<(SocketAddr, Box<dyn ProbeSocket>, AddrFamily)> {
        let candidates = self
            .resolver
            .resolve(&self.target_hostname, self.config.address_style)
            .await?;
        let dest = *candidates
            .first()
            .ok_or_else(|| EngineError::ResolutionFailed {
                hostname: self.target_hostname.clone(),
                style: self.config.address_style,
            })?;
        let family = AddrFamily::of(&dest.ip());
        let socket = self.socket_opener.open(family, self.config.unprivileged)?;
        Ok((dest, socket, family))
    }

    /// Ping `target` once per `interval` until `stop()` is called,
    /// reporting each echo's outcome to `on_echo`. An `interval` of zero
    /// suppresses periodic emission: exactly one echo is sent and `ping`
    /// returns without looping.
    pub async fn ping(&mut self, mut on_echo: impl FnMut(EchoOutcome)) -> Result<()> {
        if self.state != PingerState::Idle {
            return Err(EngineError::ContinuousRunning);
        }
        self.state = PingerState::ContinuousRunning;
        self.stop_requested = false;

        let (dest, socket, family) = match self.resolve_and_open().await {
            Ok(v) => v,
            Err(err) => {
                self.state = PingerState::Idle;
                return Err(err);
            }
        };
        let codec = IcmpCodec::new(self.identifier, self.config.unprivileged);

        if self.config.interval.is_zero() {
            let outcome = self
                .send_and_await(socket.as_ref(), &codec, dest, family, self.config.reply_timeout)
                .await;
            on_echo(outcome);
            self.state = PingerState::Idle;
            return Ok(());
        }

        while !self.stop_requested {
            let outcome = self
                .send_and_await(socket.as_ref(), &codec, dest, family, self.config.reply_timeout)
                .await;
            on_echo(outcome);
            self.reactor.sleep(self.config.interval).await;
        }

        self.state = PingerState::Idle;
        Ok(())
    }

    /// Send and wait for exactly one echo, independent of any running
    /// `ping` loop. Fails with `ContinuousRunning` if a continuous loop is
    /// active, or `AlreadyInProgress` if another single echo is in flight.
    pub async fn ping_once(&mut self) -> Result<EchoOutcome> {
        match self.state {
            PingerState::Idle => {}
            PingerState::ContinuousRunning => return Err(EngineError::ContinuousRunning),
            PingerState::SingleInProgress => return Err(EngineError::AlreadyInProgress),
        }
        self.state = PingerState::SingleInProgress;

        let (dest, socket, family) = match self.resolve_and_open().await {
            Ok(v) => v,
            Err(err) => {
                self.state = PingerState::Idle;
                return Err(err);
            }
        };
        let codec = IcmpCodec::new(self.identifier, self.config.unprivileged);

        let outcome = self
            .send_and_await(socket.as_ref(), &codec, dest, family, self.config.reply_timeout)
            .await;
        self.state = PingerState::Idle;
        Ok(outcome)
    }

    async fn send_and_await(
        &mut self,
        socket: &dyn ProbeSocket,
        codec: &IcmpCodec,
        dest: SocketAddr,
        family: AddrFamily,
        timeout: Duration,
    ) -> EchoOutcome {
        let sequence = self.next_sequence();
        let payload = ProbePayload::now(0, 0);
        let packet = codec.build_echo(family, sequence, &payload);

        self.statistics.record_sent();
        if let Err(e) = socket.send_to(&packet, dest) {
            tracing::warn!(error = %e, "ping send failed");
            return EchoOutcome::Diagnostic {
                description: format!("send failed: {e}"),
            };
        }
        self.probe_table.record(sequence, 0, 0, Instant::now());

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; RECV_BUF_LEN];

        loop {
            let now = Instant::now();
            if now >= deadline {
                self.probe_table.take(sequence);
                self.statistics.record_timeout();
                return EchoOutcome::Timeout;
            }

            let remaining = deadline - now;
            tokio::select! {
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
                        if let Some(outcome) = self.classify_one(codec, family, &buf[..len], sequence, from.ip()) {
                            return outcome;
                        }
                    }
                }
            }
        }
    }

    fn classify_one(
        &mut self,
        codec: &IcmpCodec,
        family: AddrFamily,
        datagram: &[u8],
        expected_sequence: u16,
        from: IpAddr,
    ) -> Option<EchoOutcome> {
        match codec.classify(family, datagram) {
            Classification::EchoReply { seq, .. } if seq == expected_sequence => {
                let record = self.probe_table.take(seq)?;
                let rtt = Instant::now().saturating_duration_since(record.sent_at);
                self.statistics.record_response(rtt);
                self.record_latency(rtt);
                Some(EchoOutcome::Reply { rtt })
            }
            Classification::EchoReply { .. } => None,
            Classification::TimeExceeded { .. } => Some(EchoOutcome::Diagnostic {
                description: format!("Time Exceeded from {from}"),
            }),
            Classification::Unreachable { code, .. } => Some(EchoOutcome::Diagnostic {
                description: format!("Destination Unreachable (code {code}) from {from}"),
            }),
            Classification::Other | Classification::Malformed => None,
        }
    }
}
