//! NetScout CLI
//!
//! One-shot scans rendered to the terminal and the `serve` entry point
//! for the HTTP/WebSocket service.

mod args;
mod output;

use anyhow::Context;
use args::{Args, Command, ScanArgs, ServeArgs};
use clap::Parser;
use netscout_core::{ChannelSink, Error, PortSet, ServerConfig};
use netscout_scanner::{ScanEngine, ScanRequest};
use output::EventPrinter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit codes: 0 success, 2 validation, 3 unresolvable, 4 aborted,
/// 130 cancelled
fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::EmptyTarget
        | Error::Placeholder(_)
        | Error::InvalidPortSpec(_)
        | Error::Config(_) => 2,
        Error::Unresolvable(_) => 3,
        Error::Cancelled => 130,
        _ => 4,
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let code = match args.command {
        Command::Scan(scan_args) => run_scan(scan_args).await,
        Command::Serve(serve_args) => run_serve(serve_args).await,
    };
    std::process::exit(code);
}

async fn run_scan(args: ScanArgs) -> i32 {
    let ports = match PortSet::parse(&args.ports) {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("error: {}", e);
            return exit_code_for(&e);
        }
    };

    let mut request = ScanRequest::new(args.target.clone(), ports);
    request.config.timeout_s = args.timeout;
    request.config.initial_concurrency = args.concurrency;
    request.config.enhanced_service_detection = !args.no_enhanced;
    request.config.adaptive = !args.no_adaptive;
    request.config.force = args.force;
    request.consent = args.consent;
    request.original_command = Some(std::env::args().collect::<Vec<_>>().join(" "));

    let engine = Arc::new(ScanEngine::builder().build());
    let cancel = CancellationToken::new();

    // Ctrl-C cancels cooperatively; workers stop between probes
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrlc_cancel.cancel();
        }
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink::new(tx));

    let scan_engine = Arc::clone(&engine);
    let scan = tokio::spawn(async move { scan_engine.scan(request, sink, cancel).await });

    let mut printer = EventPrinter::new(args.json);
    while let Some(event) = rx.recv().await {
        printer.handle(&event);
    }

    match scan.await {
        Ok(Ok(_record)) => 0,
        Ok(Err(e)) => {
            if !matches!(e, Error::Disallowed(_)) {
                eprintln!("error: {}", e);
            }
            exit_code_for(&e)
        }
        Err(join_err) => {
            eprintln!("error: scan task failed: {}", join_err);
            4
        }
    }
}

async fn run_serve(args: ServeArgs) -> i32 {
    let result = async {
        let mut config = match &args.config {
            Some(path) => ServerConfig::load_from_file(path)
                .with_context(|| format!("loading {:?}", path))?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = args.bind {
            config.bind = bind;
        }
        if let Some(database) = args.database {
            config.database_path = Some(database);
        }

        netscout_server::serve(config)
            .await
            .context("server exited")?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    }
}
