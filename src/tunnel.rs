//! Public exposure through a localtunnel relay.
//!
//! The relay assigns a public URL and a TCP port on its host. The client
//! keeps a pool of connections open to that port and pipes each one to the
//! local listener. Visitors must enter a password that the provider serves
//! from a fixed endpoint, which is fetched once the tunnel is up.

use crate::error::TunnelError;
use crate::lifecycle::{ShutdownHandle, ShutdownReason};
use serde::Deserialize;
use std::time::Duration;
use tokio::io::copy_bidirectional;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TUNNEL_HOST: &str = "https://localtunnel.me";
pub const PASSWORD_URL: &str = "https://loca.lt/mytunnelpassword";

const DEFAULT_MAX_CONNECTIONS: usize = 10;

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Base URL of the relay's provisioning API.
    pub host: String,
    /// Requested subdomain, if any.
    pub subdomain: Option<String>,
    /// Address the local listener answers on.
    pub local_host: String,
    /// Pause between reconnect attempts.
    pub retry_delay: Duration,
    /// Consecutive failures after which a connection slot gives up.
    pub max_failures: u32,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_TUNNEL_HOST.to_string(),
            subdomain: None,
            local_host: "127.0.0.1".to_string(),
            retry_delay: Duration::from_secs(1),
            max_failures: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TunnelAssignment {
    id: String,
    port: u16,
    max_conn_count: Option<usize>,
    url: String,
}

/// An open public exposure of the local port.
#[derive(Debug)]
pub struct TunnelLease {
    pub id: String,
    pub url: String,
    stop: watch::Sender<bool>,
    closed: watch::Receiver<bool>,
}

impl TunnelLease {
    /// Resolves once every relay connection has given up or `close` was called.
    pub async fn closed(&mut self) {
        let _ = self.closed.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn close(&self) {
        let _ = self.stop.send(true);
    }
}

impl Drop for TunnelLease {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Clone)]
pub struct LocalTunnel {
    client: reqwest::Client,
    config: TunnelConfig,
}

impl LocalTunnel {
    pub fn new(client: reqwest::Client, config: TunnelConfig) -> Self {
        Self { client, config }
    }

    fn assignment_url(&self) -> String {
        let base = self.config.host.trim_end_matches('/');
        match &self.config.subdomain {
            Some(subdomain) => format!("{}/{}", base, subdomain),
            None => format!("{}/?new", base),
        }
    }

    fn relay_host(&self) -> Result<String, TunnelError> {
        let url = url::Url::parse(&self.config.host)
            .map_err(|e| TunnelError::InvalidHost(format!("{}: {}", self.config.host, e)))?;
        url.host_str()
            .map(str::to_string)
            .ok_or_else(|| TunnelError::InvalidHost(self.config.host.clone()))
    }

    /// Ask the relay for a public URL and start piping it to `local_port`.
    pub async fn open(&self, local_port: u16) -> Result<TunnelLease, TunnelError> {
        let relay_host = self.relay_host()?;
        let response = self.client.get(self.assignment_url()).send().await?;
        if !response.status().is_success() {
            return Err(TunnelError::Status(response.status()));
        }
        let assignment: TunnelAssignment = response.json().await?;
        let connections = assignment
            .max_conn_count
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        info!(
            id = %assignment.id,
            url = %assignment.url,
            relay_port = assignment.port,
            connections,
            "tunnel assigned"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);

        let mut workers = JoinSet::new();
        for slot in 0..connections {
            let link = RelayLink {
                slot,
                remote: (relay_host.clone(), assignment.port),
                local: (self.config.local_host.clone(), local_port),
                retry_delay: self.config.retry_delay,
                max_failures: self.config.max_failures,
            };
            workers.spawn(link.run(stop_rx.clone()));
        }

        tokio::spawn(async move {
            while workers.join_next().await.is_some() {}
            let _ = closed_tx.send(true);
        });

        Ok(TunnelLease {
            id: assignment.id,
            url: assignment.url,
            stop: stop_tx,
            closed: closed_rx,
        })
    }
}

/// One pooled connection slot between the relay and the local listener.
struct RelayLink {
    slot: usize,
    remote: (String, u16),
    local: (String, u16),
    retry_delay: Duration,
    max_failures: u32,
}

impl RelayLink {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut failures = 0u32;
        loop {
            if *stop.borrow() {
                return;
            }

            match self.pipe_once(&mut stop).await {
                Some(true) => failures = 0,
                Some(false) => {
                    failures += 1;
                    if failures >= self.max_failures {
                        warn!(slot = self.slot, failures, "relay connection giving up");
                        return;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => {}
                        _ = stop.changed() => return,
                    }
                }
                None => return,
            }
        }
    }

    /// Connect both ends and pipe until either side closes.
    ///
    /// Returns whether any traffic flowed, or `None` when stopped.
    async fn pipe_once(&self, stop: &mut watch::Receiver<bool>) -> Option<bool> {
        let (host, port) = (&self.remote.0, self.remote.1);
        let connect = tokio::select! {
            result = TcpStream::connect((host.as_str(), port)) => result,
            _ = stop.changed() => return None,
        };
        let mut remote = match connect {
            Ok(stream) => stream,
            Err(err) => {
                warn!(slot = self.slot, error = %err, "connection refused: {}:{} (check your firewall settings)", host, port);
                return Some(false);
            }
        };

        let mut local = match TcpStream::connect((self.local.0.as_str(), self.local.1)).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(slot = self.slot, error = %err, "local listener unreachable");
                return Some(false);
            }
        };

        tokio::select! {
            result = copy_bidirectional(&mut remote, &mut local) => match result {
                Ok((up, down)) => {
                    debug!(slot = self.slot, up, down, "relay connection finished");
                    Some(up > 0 || down > 0)
                }
                Err(err) => {
                    debug!(slot = self.slot, error = %err, "relay connection dropped");
                    Some(false)
                }
            },
            _ = stop.changed() => None,
        }
    }
}

/// Fetch the visitor password from the provider's well-known endpoint.
pub async fn fetch_password(client: &reqwest::Client, url: &str) -> Result<String, TunnelError> {
    let response = client
        .get(url)
        .header(reqwest::header::CACHE_CONTROL, "no-store")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(TunnelError::Status(response.status()));
    }
    Ok(response.text().await?.trim().to_string())
}

/// Open the tunnel, report its URL and password, and follow its closure.
///
/// Password failures are reported and otherwise ignored. When
/// `exit_on_close` is set, closure of the tunnel requests a shutdown.
pub async fn run_negotiator(
    tunnel: LocalTunnel,
    local_port: u16,
    password_url: String,
    shutdown: ShutdownHandle,
    exit_on_close: bool,
) {
    let mut lease = match tunnel.open(local_port).await {
        Ok(lease) => lease,
        Err(err) => {
            error!(error = %err, "failed to open tunnel");
            eprintln!("Failed to open tunnel: {}", err);
            if exit_on_close {
                shutdown.shutdown_now(ShutdownReason::TunnelClosed);
            }
            return;
        }
    };

    println!();
    println!("Open {} to edit in browser", lease.url);
    match fetch_password(&tunnel.client, &password_url).await {
        Ok(password) => println!("Local tunnel password: {}", password),
        Err(err) => {
            warn!(error = %err, "failed to fetch tunnel password");
            eprintln!(
                "Failed to fetch tunnel password ({}). Retrieve it from {}",
                err, password_url
            );
        }
    }

    lease.closed().await;
    info!(id = %lease.id, "tunnel closed");
    println!("Tunnel closed");
    if exit_on_close {
        shutdown.shutdown_now(ShutdownReason::TunnelClosed);
    }
}
