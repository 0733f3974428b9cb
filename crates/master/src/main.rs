// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! wardend: the warden cluster master daemon.

use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use warden_master::adapters::UnixAgentDb;
use warden_master::{env, Config, Master};

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("wardend failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match env::log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "wardend.log");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

#[tokio::main]
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match env::config_path() {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    std::fs::create_dir_all(&config.paths.base_dir)?;

    let agentdb = Arc::new(UnixAgentDb::new(config.agentdb.socket.clone()));
    let master = Master::new(config, agentdb);

    let listener = TcpListener::bind(env::bind_addr()).await?;
    info!(addr = %env::bind_addr(), "wardend starting");

    tokio::spawn(Arc::clone(&master).file_status_update());
    spawn_queue_drains(&master);

    let server = tokio::spawn(Arc::clone(&master).run(listener));
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    master.shutdown();
    server.await?;
    Ok(())
}

/// Drain the DAPI and SendSync queues. A full deployment hands these
/// receivers to the embedded local API server instead.
fn spawn_queue_drains(master: &Arc<Master>) {
    if let Some(mut rx) = master.take_dapi_requests() {
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                debug!(node = %request.node, "DAPI request queued without a local API backend");
            }
        });
    }
    if let Some(mut rx) = master.take_sendsync_requests() {
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                debug!(node = %request.node, "SendSync request queued without a local API backend");
            }
        });
    }
}
