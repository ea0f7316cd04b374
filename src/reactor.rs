//! The `Reactor` capability: readiness-driven I/O and one-shot timers,
//! kept external to the core so the engine never touches an event loop or
//! a platform timer API directly. The suspension points the engine awaits
//! (socket readability, a timer, the inter-probe gap sleep) are expressed
//! as plain `async fn`s rather than callback registration, since `.await`
//! is itself the suspension point in Rust's async model — cancellation is
//! then just "drop the future", which is exactly what happens to any
//! in-flight reactor wait when a session is torn down.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use tokio::io::unix::AsyncFd;

/// External readiness/timer facility a [`crate::session::Session`] is
/// generic over.
pub trait Reactor: Send + Sync {
    /// Suspend until `fd` is readable.
    fn wait_readable(&self, fd: RawFd) -> impl std::future::Future<Output = io::Result<()>> + Send;

    /// Suspend for `delay`. A one-shot timer in spec.md's vocabulary;
    /// dropping the returned future is the cancellation path.
    fn sleep(&self, delay: Duration) -> impl std::future::Future<Output = ()> + Send;
}

/// `Reactor` backed directly by the `tokio` runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioReactor;

impl TokioReactor {
    pub fn new() -> Self {
        Self
    }
}

/// Lightweight `AsRawFd` wrapper so a bare fd can be registered with
/// [`tokio::io::unix::AsyncFd`] without tokio taking ownership of the
/// underlying socket (`Session` owns the socket; the reactor only watches
/// it).
struct BorrowedFd(RawFd);

impl AsRawFd for BorrowedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Reactor for TokioReactor {
    async fn wait_readable(&self, fd: RawFd) -> io::Result<()> {
        let async_fd = AsyncFd::new(BorrowedFd(fd))?;
        let mut guard = async_fd.readable().await?;
        guard.clear_ready();
        Ok(())
    }

    async fn sleep(&self, delay: Duration) {
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_returns_after_delay() {
        let reactor = TokioReactor::new();
        let start = std::time::Instant::now();
        reactor.sleep(Duration::from_millis(5)).await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn zero_delay_sleep_yields_without_blocking() {
        let reactor = TokioReactor::new();
        reactor.sleep(Duration::ZERO).await;
    }
}
