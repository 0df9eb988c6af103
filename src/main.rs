//! Webedit - edit a single file in the browser.
//!
//! Usage:
//!   webedit notes.md                  # Serve on localhost:3000
//!   webedit notes.md --localtunnel    # Also expose through localtunnel
//!   PORT=8123 webedit notes.md        # Explicit port

use clap::Parser;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use webedit::config::{Cli, ServerConfig};
use webedit::consent::ConsentGate;
use webedit::error::{StartupError, TargetError};
use webedit::lifecycle::{self, ShutdownReason};
use webedit::port;
use webedit::server::{self, AppState};
use webedit::session::SessionCoordinator;
use webedit::target::{self, TerminalPrompt};
use webedit::tunnel::{self, LocalTunnel};

const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_cli(Cli::parse());

    match run(config).await {
        Ok(reason) => {
            info!(?reason, "exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(config: ServerConfig) -> Result<ShutdownReason, StartupError> {
    let port = config.port.port;
    let retry_args = config.retry_args();
    info!(port, source = ?config.port.source, "resolved port");

    port::ensure_port_available(port, &retry_args).await?;

    let path = target::resolve_target_path(config.target_arg.as_deref()).map_err(|source| {
        TargetError::Access {
            path: config.target_arg.clone().unwrap_or_default(),
            source,
        }
    })?;
    // Runs before the listener exists, so blocking on the prompt is fine.
    let target = target::ensure_target_file(&path, &mut TerminalPrompt)?;

    let listener = port::bind_listener(port, &retry_args).await?;

    let sessions = Arc::new(SessionCoordinator::new(config.close_debounce));
    let (shutdown, supervisor) = lifecycle::channel(sessions.clone());
    let state = AppState {
        target: Arc::new(target),
        sessions,
        consent: ConsentGate::new(config.tunnel_domain.clone()),
        shutdown: shutdown.clone(),
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(server::run_server(listener, state, async move {
        let _ = stop_rx.await;
    }));

    print_banner(&config, &path);
    if config.tunnel.is_none() && config.open_browser {
        open_browser(format!("http://localhost:{}", port));
    }

    if let Some(tunnel_config) = config.tunnel.clone() {
        let tunnel = LocalTunnel::new(reqwest::Client::new(), tunnel_config);
        tokio::spawn(tunnel::run_negotiator(
            tunnel,
            port,
            config.password_url.clone(),
            shutdown.clone(),
            config.exit_on_tunnel_close,
        ));
    }

    let reason = tokio::select! {
        reason = supervisor.run() => reason,
        _ = tokio::signal::ctrl_c() => ShutdownReason::Interrupted,
        result = &mut server => {
            return match result {
                Ok(Ok(())) => Ok(ShutdownReason::Interrupted),
                Ok(Err(err)) => Err(StartupError::Server(err)),
                Err(err) => Err(StartupError::Server(std::io::Error::other(err))),
            };
        }
    };

    let _ = stop_tx.send(());
    match tokio::time::timeout(SERVER_STOP_TIMEOUT, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => return Err(StartupError::Server(err)),
        Ok(Err(err)) => warn!(error = %err, "server task failed"),
        Err(_) => warn!("server did not stop in time, exiting anyway"),
    }
    Ok(reason)
}

fn print_banner(config: &ServerConfig, path: &Path) {
    let port = config.port.port;
    println!("Editing {}", path.display());

    if config.tunnel.is_some() {
        println!("Opening tunnel for http://localhost:{} ...", port);
        return;
    }

    println!("Open http://localhost:{} to edit in browser", port);
    let lan = lan_addresses();
    if !lan.is_empty() {
        println!();
        println!("Local network access:");
        for ip in lan {
            println!("  http://{}:{}", ip, port);
        }
    }
    println!();
    println!("Not able to access http://localhost:{} ?", port);
    let args = format!("{} --localtunnel", config.retry_args());
    println!(
        "Try tunneling it with localtunnel: {} {}",
        env!("CARGO_PKG_NAME"),
        args.trim_start()
    );
}

/// Every non-loopback IPv4 address on this machine, in interface order.
fn lan_addresses() -> Vec<Ipv4Addr> {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => lan_ipv4(
            interfaces
                .into_iter()
                .filter(|iface| !iface.is_loopback())
                .map(|iface| iface.ip()),
        ),
        Err(err) => {
            warn!(error = %err, "could not list network interfaces");
            Vec::new()
        }
    }
}

fn lan_ipv4(addrs: impl IntoIterator<Item = IpAddr>) -> Vec<Ipv4Addr> {
    let mut out = Vec::new();
    for addr in addrs {
        if let IpAddr::V4(ip) = addr {
            if !ip.is_loopback() && !ip.is_unspecified() && !out.contains(&ip) {
                out.push(ip);
            }
        }
    }
    out
}

/// Launch the system browser off the runtime; `xdg-open` can block.
fn open_browser(url: String) {
    tokio::task::spawn_blocking(move || {
        if let Err(err) = open::that(&url) {
            warn!(error = %err, %url, "failed to open browser");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn lan_ipv4_keeps_every_routable_v4_address() {
        let addrs = [
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
        ];
        assert_eq!(
            lan_ipv4(addrs),
            vec![Ipv4Addr::new(192, 168, 1, 20), Ipv4Addr::new(10, 0, 0, 5)]
        );
    }

    #[test]
    fn lan_addresses_never_lists_loopback() {
        assert!(lan_addresses().iter().all(|ip| !ip.is_loopback()));
    }
}
