//! Port resolution and availability probing.
//!
//! The port is resolved once at startup from, in order of precedence, an
//! explicit override, a random pick from the tunnel range, or the default.
//! It is then probed with a throwaway listener so that a busy port produces
//! an actionable message rather than a late bind failure.

use crate::error::StartupError;
use rand::Rng;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::Range;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub const DEFAULT_PORT: u16 = 3000;

/// Ports picked when tunnelling, away from common local services.
pub const TUNNEL_PORT_RANGE: Range<u16> = 30000..60000;

/// Range used for the alternative port offered on a conflict.
pub const SUGGESTION_PORT_RANGE: Range<u16> = 3000..12000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    Explicit,
    TunnelRandom,
    Default,
}

/// The port chosen for this run and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub port: u16,
    pub source: PortSource,
}

/// Resolve the listening port using the thread-local RNG.
pub fn resolve_port(override_value: Option<&str>, tunnel: bool) -> PortBinding {
    resolve_port_with(override_value, tunnel, &mut rand::thread_rng())
}

/// Resolve the listening port. Pure apart from the supplied RNG.
///
/// An override only counts when it parses as a positive port number;
/// anything else falls through as if it were absent.
pub fn resolve_port_with<R: Rng>(
    override_value: Option<&str>,
    tunnel: bool,
    rng: &mut R,
) -> PortBinding {
    if let Some(port) = override_value.and_then(parse_port_override) {
        return PortBinding {
            port,
            source: PortSource::Explicit,
        };
    }

    if tunnel {
        return PortBinding {
            port: rng.gen_range(TUNNEL_PORT_RANGE),
            source: PortSource::TunnelRandom,
        };
    }

    PortBinding {
        port: DEFAULT_PORT,
        source: PortSource::Default,
    }
}

fn parse_port_override(value: &str) -> Option<u16> {
    value.trim().parse::<u16>().ok().filter(|port| *port > 0)
}

fn listen_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

/// Bind and immediately release a listener on `port`.
pub async fn probe_port(port: u16) -> std::io::Result<()> {
    let tester = TcpListener::bind(listen_addr(port)).await?;
    debug!(port, "port probe succeeded");
    drop(tester);
    Ok(())
}

/// Probe `port`, mapping failures onto startup errors.
///
/// `retry_args` is the argument tail appended to the suggested retry command.
pub async fn ensure_port_available(port: u16, retry_args: &str) -> Result<(), StartupError> {
    probe_port(port)
        .await
        .map_err(|err| classify_bind_error(err, port, retry_args, StartupError::PortProbe))
}

/// Bind the real listener. A conflict here takes the same path as the probe,
/// since another process may grab the port between probe and bind.
pub async fn bind_listener(port: u16, retry_args: &str) -> Result<TcpListener, StartupError> {
    let listener = TcpListener::bind(listen_addr(port))
        .await
        .map_err(|err| classify_bind_error(err, port, retry_args, StartupError::Bind))?;
    info!(port, "listener bound");
    Ok(listener)
}

fn classify_bind_error(
    err: std::io::Error,
    port: u16,
    retry_args: &str,
    other: fn(std::io::Error) -> StartupError,
) -> StartupError {
    if err.kind() == ErrorKind::AddrInUse {
        port_in_use(port, retry_args, &mut rand::thread_rng())
    } else {
        other(err)
    }
}

pub(crate) fn port_in_use<R: Rng>(port: u16, retry_args: &str, rng: &mut R) -> StartupError {
    let suggestion = rng.gen_range(SUGGESTION_PORT_RANGE);
    let retry_command = format!("PORT={} {} {}", suggestion, env!("CARGO_PKG_NAME"), retry_args)
        .trim_end()
        .to_string();
    StartupError::PortInUse {
        port,
        suggestion,
        retry_command,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn explicit_override_wins_over_tunnel() {
        let mut rng = StdRng::seed_from_u64(7);
        let binding = resolve_port_with(Some("8123"), true, &mut rng);
        assert_eq!(binding.port, 8123);
        assert_eq!(binding.source, PortSource::Explicit);
    }

    #[test]
    fn explicit_override_without_tunnel() {
        let binding = resolve_port(Some("8123"), false);
        assert_eq!(
            binding,
            PortBinding {
                port: 8123,
                source: PortSource::Explicit
            }
        );
    }

    #[test]
    fn invalid_overrides_fall_through() {
        for value in ["", "0", "-5", "abc", "8123abc", "70000"] {
            let binding = resolve_port(Some(value), false);
            assert_eq!(binding.port, DEFAULT_PORT, "override {value:?}");
            assert_eq!(binding.source, PortSource::Default);
        }
    }

    #[test]
    fn default_without_override_or_tunnel() {
        assert_eq!(resolve_port(None, false).port, 3000);
    }

    #[test]
    fn tunnel_ports_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let binding = resolve_port_with(None, true, &mut rng);
            assert_eq!(binding.source, PortSource::TunnelRandom);
            assert!(TUNNEL_PORT_RANGE.contains(&binding.port), "{}", binding.port);
        }
    }

    #[test]
    fn port_in_use_suggests_retry() {
        let mut rng = StdRng::seed_from_u64(1);
        match port_in_use(3000, "notes.md --localtunnel", &mut rng) {
            StartupError::PortInUse {
                port,
                suggestion,
                retry_command,
            } => {
                assert_eq!(port, 3000);
                assert!(SUGGESTION_PORT_RANGE.contains(&suggestion));
                assert_eq!(
                    retry_command,
                    format!("PORT={suggestion} webedit notes.md --localtunnel")
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn probe_detects_busy_port() {
        let holder = TcpListener::bind(listen_addr(0)).await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let err = ensure_port_available(port, "notes.md").await.unwrap_err();
        assert!(matches!(err, StartupError::PortInUse { port: p, .. } if p == port));

        let err = bind_listener(port, "notes.md").await.unwrap_err();
        assert!(matches!(err, StartupError::PortInUse { .. }));
    }

    #[tokio::test]
    async fn probe_releases_free_port() {
        let port = {
            let tmp = TcpListener::bind(listen_addr(0)).await.unwrap();
            tmp.local_addr().unwrap().port()
        };

        ensure_port_available(port, "notes.md").await.unwrap();
        let listener = bind_listener(port, "notes.md").await.unwrap();
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }
}
