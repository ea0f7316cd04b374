//! Error taxonomy for the probe engine.
//!
//! Each variant corresponds to a row in the engine's error table: a flat,
//! non-hierarchical set of conditions with a fixed propagation policy.
//! Conditions that are recoverable (per-hop timeout, partial send, a
//! malformed or foreign reply) never construct an `EngineError` — they are
//! handled locally and logged via `tracing`.

use std::io;
use std::net::IpAddr;

use thiserror::Error;

/// Fatal and caller-recoverable error conditions for [`crate::session::Session`]
/// and [`crate::pinger::ContinuousPinger`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The resolver rejected the hostname outright.
    #[error("invalid hostname {hostname:?}: {reason}")]
    InvalidHostname { hostname: String, reason: String },

    /// The resolver returned no address compatible with the requested
    /// [`crate::family::AddressStyle`].
    #[error("failed to resolve {hostname:?} for {style:?}")]
    ResolutionFailed {
        hostname: String,
        style: crate::family::AddressStyle,
    },

    /// `sendto`/`recvfrom` reported a network-reachability error.
    #[error("network error on {address:?}: {source}")]
    NetworkError {
        address: Option<IpAddr>,
        #[source]
        source: io::Error,
    },

    /// A syscall reported `ETIMEDOUT` directly (rare under non-blocking I/O;
    /// per-hop timeouts are handled as [`crate::hop::HopResult`], not here).
    #[error("socket operation timed out: {0}")]
    Timeout(#[source] io::Error),

    /// Any other syscall errno not covered above.
    #[error("system error: {0}")]
    SystemError(#[source] io::Error),

    /// [`crate::session::SessionConfig::validate`] or
    /// [`crate::pinger::PingConfig::validate`] rejected the configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `start` was invoked while the session was already `Resolving` or
    /// `Running`.
    #[error("session is already running")]
    AlreadyRunning,

    /// A stop-only operation was invoked while the session was `Idle`.
    #[error("session is not running")]
    NotRunning,

    /// [`crate::pinger::ContinuousPinger`] is already running a continuous
    /// `ping` loop and cannot start a `ping_once` probe concurrently.
    #[error("continuous ping is already running")]
    ContinuousRunning,

    /// A second `ping_once` call arrived while one was already in flight.
    #[error("a single ping is already in progress")]
    AlreadyInProgress,
}

impl EngineError {
    /// True for the two caller-recoverable signals that `start`/`stop` may
    /// return without tearing down any engine state.
    pub fn is_caller_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadyRunning
                | EngineError::NotRunning
                | EngineError::ContinuousRunning
                | EngineError::AlreadyInProgress
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
