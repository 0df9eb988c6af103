//! Command line surface and resolved runtime configuration.

use crate::consent::DEFAULT_TUNNEL_DOMAIN;
use crate::port::{resolve_port, PortBinding};
use crate::session::DEFAULT_CLOSE_DEBOUNCE;
use crate::tunnel::{TunnelConfig, DEFAULT_TUNNEL_HOST, PASSWORD_URL};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "webedit")]
#[command(about = "Edit a single file in the browser")]
pub struct Cli {
    /// File to edit (default: current directory, which is rejected)
    pub target: Option<PathBuf>,

    /// Expose the editor publicly through localtunnel
    #[arg(long)]
    pub localtunnel: bool,

    /// Port to listen on; ignored unless it is a positive port number
    #[arg(long, env = "PORT")]
    pub port: Option<String>,

    /// Exit when the public tunnel closes instead of only logging it
    #[arg(long)]
    pub exit_on_tunnel_close: bool,

    /// Tunnel provisioning server
    #[arg(long, default_value = DEFAULT_TUNNEL_HOST)]
    pub tunnel_host: String,

    /// Request a specific tunnel subdomain
    #[arg(long)]
    pub subdomain: Option<String>,

    /// Grace period after a session closes before the process exits
    #[arg(long, default_value_t = DEFAULT_CLOSE_DEBOUNCE.as_millis() as u64)]
    pub debounce_ms: u64,

    /// Do not open the editor in the default browser
    #[arg(long)]
    pub no_open: bool,
}

/// Everything the startup sequence needs, resolved from the CLI.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Target path as given on the command line, if any.
    pub target_arg: Option<PathBuf>,
    pub port: PortBinding,
    pub tunnel: Option<TunnelConfig>,
    pub password_url: String,
    pub tunnel_domain: String,
    pub exit_on_tunnel_close: bool,
    pub close_debounce: Duration,
    /// Launch the local editor URL in a browser (direct mode only).
    pub open_browser: bool,
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> Self {
        let port = resolve_port(cli.port.as_deref(), cli.localtunnel);
        let tunnel = cli.localtunnel.then(|| TunnelConfig {
            host: cli.tunnel_host,
            subdomain: cli.subdomain,
            ..TunnelConfig::default()
        });
        Self {
            target_arg: cli.target,
            port,
            tunnel,
            password_url: PASSWORD_URL.to_string(),
            tunnel_domain: DEFAULT_TUNNEL_DOMAIN.to_string(),
            exit_on_tunnel_close: cli.exit_on_tunnel_close,
            close_debounce: Duration::from_millis(cli.debounce_ms),
            open_browser: !cli.no_open,
        }
    }

    /// Arguments to repeat in a suggested retry command.
    pub fn retry_args(&self) -> String {
        let mut args = self
            .target_arg
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        if self.tunnel.is_some() {
            args.push_str(" --localtunnel");
        }
        args.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortSource;

    #[test]
    fn defaults_without_flags() {
        let cli = Cli::parse_from(["webedit", "notes.md"]);
        let config = ServerConfig::from_cli(Cli { port: None, ..cli });
        assert_eq!(config.target_arg, Some(PathBuf::from("notes.md")));
        assert_eq!(config.port.port, 3000);
        assert!(config.tunnel.is_none());
        assert!(!config.exit_on_tunnel_close);
        assert_eq!(config.close_debounce, Duration::from_millis(1000));
        assert_eq!(config.retry_args(), "notes.md");
        assert!(config.open_browser);
    }

    #[test]
    fn no_open_disables_browser_launch() {
        let cli = Cli::parse_from(["webedit", "notes.md", "--no-open"]);
        let config = ServerConfig::from_cli(Cli { port: None, ..cli });
        assert!(!config.open_browser);
        assert_eq!(config.retry_args(), "notes.md");
    }

    #[test]
    fn explicit_port_beats_tunnel_range() {
        let cli = Cli::parse_from(["webedit", "notes.md", "--localtunnel", "--port", "8123"]);
        let config = ServerConfig::from_cli(cli);
        assert_eq!(config.port.port, 8123);
        assert_eq!(config.port.source, PortSource::Explicit);
        assert_eq!(config.retry_args(), "notes.md --localtunnel");
    }

    #[test]
    fn tunnel_flags_populate_tunnel_config() {
        let cli = Cli::parse_from([
            "webedit",
            "notes.md",
            "--localtunnel",
            "--subdomain",
            "notes",
            "--tunnel-host",
            "https://tunnel.example.com",
            "--exit-on-tunnel-close",
        ]);
        let config = ServerConfig::from_cli(Cli { port: None, ..cli });
        let tunnel = config.tunnel.expect("tunnel config");
        assert_eq!(tunnel.host, "https://tunnel.example.com");
        assert_eq!(tunnel.subdomain.as_deref(), Some("notes"));
        assert!(config.exit_on_tunnel_close);
        assert_eq!(config.port.source, PortSource::TunnelRandom);
    }
}
