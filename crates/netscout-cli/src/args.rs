//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// NetScout - adaptive TCP reconnaissance
#[derive(Parser, Debug)]
#[command(
    name = "netscout",
    version,
    about = "Adaptive TCP reconnaissance with tiered scanning and service detection",
    after_help = "EXAMPLES:\n\
    # Scan the common ports of a host\n\
    netscout scan 192.168.1.10\n\n\
    # Specific ports with service detection and JSON output\n\
    netscout scan -p 22,80,443 --json 192.168.1.10\n\n\
    # Re-scan ignoring the cache, consenting to a silent target\n\
    netscout scan -p 1-1000 --force --yes 203.0.113.5\n\n\
    # Run the HTTP/WebSocket service\n\
    netscout serve --bind 0.0.0.0:8080"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity (-v, -vv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan a single target and stream results to the terminal
    Scan(ScanArgs),
    /// Serve the HTTP API, SSE stream, and WebSocket channel
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
pub struct ScanArgs {
    /// Target host (IP literal or hostname)
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Port specification: 80, 1-1000, 22-25,80,443
    #[arg(short = 'p', long, value_name = "PORTS", default_value = "1-1000")]
    pub ports: String,

    /// Per-probe connect timeout in seconds
    #[arg(long, value_name = "SECS", default_value = "1.0")]
    pub timeout: f64,

    /// Initial worker pool size
    #[arg(short = 'c', long, value_name = "N", default_value = "50")]
    pub concurrency: usize,

    /// Disable the active service-detection probe set
    #[arg(long)]
    pub no_enhanced: bool,

    /// Pin concurrency and timeout instead of adapting to loss
    #[arg(long)]
    pub no_adaptive: bool,

    /// Skip the cache and re-probe (a completed scan still stores)
    #[arg(long)]
    pub force: bool,

    /// Consent to scanning a target that answers on no sentinel port
    #[arg(short = 'y', long = "yes")]
    pub consent: bool,

    /// Emit events as JSON lines instead of formatted output
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Listen address override
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// SQLite history database override
    #[arg(long, value_name = "FILE")]
    pub database: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_scan_defaults() {
        let args = Args::parse_from(["netscout", "scan", "10.0.0.1"]);
        match args.command {
            Command::Scan(scan) => {
                assert_eq!(scan.target, "10.0.0.1");
                assert_eq!(scan.ports, "1-1000");
                assert_eq!(scan.concurrency, 50);
                assert!(!scan.force);
            }
            other => panic!("expected scan, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_flags() {
        let args = Args::parse_from([
            "netscout", "scan", "-p", "22,80", "--force", "--yes", "--json", "10.0.0.1",
        ]);
        match args.command {
            Command::Scan(scan) => {
                assert_eq!(scan.ports, "22,80");
                assert!(scan.force);
                assert!(scan.consent);
                assert!(scan.json);
            }
            other => panic!("expected scan, got {:?}", other),
        }
    }

    #[test]
    fn test_serve_args() {
        let args = Args::parse_from(["netscout", "serve", "--bind", "0.0.0.0:9999"]);
        match args.command {
            Command::Serve(serve) => assert_eq!(serve.bind.as_deref(), Some("0.0.0.0:9999")),
            other => panic!("expected serve, got {:?}", other),
        }
    }
}
