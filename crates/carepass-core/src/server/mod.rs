// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP server for carepass-core.
//!
//! Exposes the allocator, the quota guard and the notification flow to the
//! storefront backend over JSON.

pub mod handlers;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

use crate::error::CoreError;

pub use state::AppState;

/// Build the router for the kernel's HTTP surface.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/coupons/{source_id}/reservations",
            post(handlers::reserve_coupon).get(handlers::list_reservations),
        )
        .route(
            "/reservations/{id}",
            get(handlers::get_reservation).delete(handlers::release_reservation),
        )
        .route("/reservations/{id}/sent", post(handlers::mark_reservation_sent))
        .route("/quota/{recipient}", get(handlers::check_allowance))
        .route("/quota/{recipient}/sends", post(handlers::record_send))
        .route("/notifications", post(handlers::send_notification))
        .with_state(state)
}

/// Serve the router until Ctrl+C (or SIGTERM on Unix).
#[instrument(skip(state))]
pub async fn run_server(bind_addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// HTTP status for each error code.
pub fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::PoolExhausted { .. } => StatusCode::CONFLICT,
        CoreError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        CoreError::StoreFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::TransportFault { .. } => StatusCode::BAD_GATEWAY,
        CoreError::DeliveredNotRecorded { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::ConfigurationMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::ReservationNotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::InvalidReservationState { .. } => StatusCode::CONFLICT,
        CoreError::ValidationError { .. } => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(code = self.error_code(), error = %self, "Request failed");
        }
        (status, Json(self.to_error_body())).into_response()
    }
}
