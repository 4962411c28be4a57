// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Carepass Core - Coupon Allocation and Messaging Quota Kernel
//!
//! Loads coupon pools, connects to the store and serves the HTTP API.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use carepass_core::config::Config;
use carepass_core::dispatch::HttpSmsTransport;
use carepass_core::persistence;
use carepass_core::pool::PoolRegistry;
use carepass_core::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("carepass_core=info".parse()?),
        )
        .init();

    info!("Starting Carepass Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        pool_dir = ?config.pool_dir,
        sources = config.coupon_sources.len(),
        start_offset = config.coupon_start_offset,
        monthly_limit = config.monthly_send_limit,
        "Configuration loaded"
    );

    // Connect to database and run migrations
    info!("Connecting to database...");
    let persistence = persistence::connect(&config.database_url).await?;
    info!("Database connection established");

    let pools = Arc::new(PoolRegistry::load_dir(
        &config.pool_dir,
        &config.coupon_sources,
    ));

    let transport = HttpSmsTransport::new(config.sms.clone())?;
    if !transport.is_configured() {
        warn!("SMS gateway not configured; notifications will be rejected");
    }

    let state = Arc::new(AppState::new(
        persistence,
        pools,
        Arc::new(transport),
        config.coupon_start_offset,
        config.monthly_send_limit,
    ));

    info!("Carepass Core initialized successfully");

    server::run_server(config.http_addr, state).await?;

    info!("Shutdown complete");
    Ok(())
}
