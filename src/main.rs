//! multidb-gateway - Main entry point.
//!
//! Serves the gateway's MCP tools over stdio or streamable HTTP against the
//! active instance named in the JSON configuration file.

use clap::Parser;
use multidb_gateway::config::{Cli, TransportMode, load_config};
use multidb_gateway::gateway::Gateway;
use multidb_gateway::transport::{HttpTransport, StdioTransport, Transport};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_NAME: &str = "multidb-gateway.log";

/// Initialize the tracing subscriber. Logs go to `log_file` when given,
/// otherwise to stderr (stdout carries the stdio transport).
fn init_tracing(cli: &Cli, log_file: Option<File>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = tracing_subscriber::registry().with(filter);

    match (log_file, cli.json_logs) {
        (Some(file), true) => subscriber
            .with(fmt::layer().json().with_ansi(false).with_writer(Mutex::new(file)))
            .init(),
        (Some(file), false) => subscriber
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .init(),
        (None, true) => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        (None, false) => subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// `logPath` may name a directory (the log file goes inside) or a file.
fn open_log_file(path: &Path) -> std::io::Result<File> {
    let file_path: PathBuf = if path.is_dir() || path.extension().is_none() {
        std::fs::create_dir_all(path)?;
        path.join(LOG_FILE_NAME)
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        path.to_path_buf()
    };
    OpenOptions::new().create(true).append(true).open(file_path)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("Usage: multidb-gateway --config <path-to-dbconfig.json>");
            eprintln!("       GATEWAY_CONFIG=/etc/dbconfig.json multidb-gateway --transport http");
            std::process::exit(1);
        }
    };

    let log_file = match config.log_path.as_deref().map(open_log_file).transpose() {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Warning: cannot open log file, logging to stderr: {}", e);
            None
        }
    };
    init_tracing(&cli, log_file);

    info!(
        transport = %cli.transport,
        backend = %config.backend,
        "Starting multidb-gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let gateway = Arc::new(Gateway::new(config)?);
    match gateway.describe_active_instance() {
        Ok(instance) => info!(
            instance_id = %instance.instance_id,
            engine = %instance.engine,
            address = %format!("{}:{}", instance.host, instance.port),
            "Active instance selected"
        ),
        Err(e) => error!(error = %e, "No usable instance; commands will fail until the configuration is fixed"),
    }

    let result = match cli.transport {
        TransportMode::Stdio => {
            info!("Using stdio transport");
            StdioTransport::new(gateway).run().await
        }
        TransportMode::Http => {
            info!(
                host = %cli.http_host,
                port = cli.http_port,
                endpoint = %cli.mcp_endpoint,
                "Using HTTP transport"
            );
            HttpTransport::new(gateway, &cli.http_host, cli.http_port, &cli.mcp_endpoint)
                .run()
                .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
