//! The `Resolver` capability: hostname → candidate socket address list.
//! Kept entirely external to the probe/hop machinery so the core never
//! touches DNS directly.

use std::net::{IpAddr, SocketAddr};

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::error::EngineError;
use crate::family::AddressStyle;

/// Resolves a hostname (or parses a literal address) into candidate
/// addresses, filtered by the requested [`AddressStyle`].
pub trait Resolver {
    /// Resolve `hostname` to a non-empty list of candidate addresses
    /// compatible with `style`, or an `EngineError::{InvalidHostname,
    /// ResolutionFailed}`.
    fn resolve(
        &self,
        hostname: &str,
        style: AddressStyle,
    ) -> impl std::future::Future<Output = Result<Vec<SocketAddr>, EngineError>> + Send;
}

/// `Resolver` backed by `hickory-resolver`'s `TokioAsyncResolver`.
pub struct HickoryResolver {
    inner: TokioAsyncResolver,
}

impl HickoryResolver {
    pub fn new() -> Self {
        Self {
            inner: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }

    /// Reverse-resolve `addr` to a hostname, best-effort. Not part of the
    /// `Resolver` trait: the core never performs reverse DNS on its own
    /// behalf; this exists purely for the presentation shell's
    /// `--numeric`-off hop naming.
    pub async fn reverse_lookup(&self, addr: IpAddr) -> Option<String> {
        let lookup = self.inner.reverse_lookup(addr).await.ok()?;
        lookup.iter().next().map(|name| name.to_string())
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for HickoryResolver {
    async fn resolve(
        &self,
        hostname: &str,
        style: AddressStyle,
    ) -> Result<Vec<SocketAddr>, EngineError> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            let candidate = SocketAddr::new(ip, 0);
            if style.accepts(&candidate) {
                return Ok(vec![candidate]);
            }
            return Err(EngineError::ResolutionFailed {
                hostname: hostname.to_string(),
                style,
            });
        }

        let response = self
            .inner
            .lookup_ip(hostname)
            .await
            .map_err(|e| EngineError::InvalidHostname {
                hostname: hostname.to_string(),
                reason: e.to_string(),
            })?;

        let candidates: Vec<SocketAddr> = response
            .iter()
            .map(|ip| SocketAddr::new(ip, 0))
            .filter(|addr| style.accepts(addr))
            .collect();

        if candidates.is_empty() {
            return Err(EngineError::ResolutionFailed {
                hostname: hostname.to_string(),
                style,
            });
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver(Vec<SocketAddr>);

    impl Resolver for FixedResolver {
        async fn resolve(
            &self,
            _hostname: &str,
            style: AddressStyle,
        ) -> Result<Vec<SocketAddr>, EngineError> {
            let matching: Vec<_> = self.0.iter().copied().filter(|a| style.accepts(a)).collect();
            if matching.is_empty() {
                return Err(EngineError::ResolutionFailed {
                    hostname: "test".into(),
                    style,
                });
            }
            Ok(matching)
        }
    }

    #[tokio::test]
    async fn v4_only_rejects_v6_candidates() {
        let resolver = FixedResolver(vec!["::1:0".parse().unwrap_or_else(|_| {
            SocketAddr::new("::1".parse().unwrap(), 0)
        })]);
        let result = resolver.resolve("example.invalid", AddressStyle::V4Only).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn any_style_accepts_first_candidate() {
        let addr: SocketAddr = "93.184.216.34:0".parse().unwrap();
        let resolver = FixedResolver(vec![addr]);
        let result = resolver.resolve("example.invalid", AddressStyle::Any).await.unwrap();
        assert_eq!(result[0], addr);
    }
}
