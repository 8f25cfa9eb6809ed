// Copyright (C) 2025 Flexible Power Alliance Network
// SPDX-License-Identifier: AGPL-3.0-or-later
//! defpi echo service
//!
//! Runs inside a process started by the orchestrator. Every text message a
//! peer sends on an `echo` connection comes back with the configured prefix.

mod echo;

use anyhow::Result;
use defpi_service::{DefPiParams, RuntimeConfig, ServiceRuntime};
use tracing::{error, info};

use crate::echo::EchoService;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("defpi_service=info".parse()?)
                .add_directive("defpi_echo=info".parse()?),
        )
        .init();

    info!("Starting defpi echo service");

    let config = RuntimeConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;
    let params = DefPiParams::from_env()?;

    info!(
        control_addr = %config.control_addr,
        process_id = %params.process_id,
        orchestrator = %params.orchestrator_host,
        "Configuration loaded"
    );

    let service = EchoService::new();
    let interface = service.interface()?;

    let runtime = ServiceRuntime::builder(service)
        .interface(interface)
        .params(params)
        .config(config)
        .build()?
        .start()
        .await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, shutting down...");
        }
        _ = runtime.stopped() => {
            info!("Orchestrator stopped the process, shutting down...");
        }
    }

    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}
