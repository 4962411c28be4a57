// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP handlers.
//!
//! Each handler is a thin shell over one kernel operation; errors are
//! returned as [`CoreError`] and rendered by its `IntoResponse` impl.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::flow::{NotificationOutcome, OrderNotification};
use crate::persistence::{Persistence, QuotaCounterRecord, ReservationLedger, ReservationRecord};
use crate::quota::Allowance;

use super::AppState;

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded".
    pub status: &'static str,
    /// Whether the store answered.
    pub database: bool,
    /// Server version.
    pub version: String,
    /// Uptime in milliseconds.
    pub uptime_ms: i64,
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    debug!("Health check requested");

    let database = state.persistence.health_check_db().await.unwrap_or(false);
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if database { "ok" } else { "degraded" },
            database,
            version: state.version.clone(),
            uptime_ms: state.uptime_ms(),
        }),
    )
}

// ============================================================================
// Reservations
// ============================================================================

/// Body of `POST /coupons/{source_id}/reservations`.
#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    /// Order the coupon is claimed for.
    pub order_id: String,
    /// Contact the coupon will be sent to.
    pub recipient_contact: String,
}

/// `POST /coupons/{source_id}/reservations`
pub async fn reserve_coupon(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<String>,
    Json(request): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<ReservationRecord>)> {
    require("order_id", &request.order_id)?;

    match state
        .allocator
        .reserve(&source_id, &request.order_id, &request.recipient_contact)
        .await?
    {
        Some(record) => Ok((StatusCode::CREATED, Json(record))),
        None => Err(CoreError::PoolExhausted { source_id }),
    }
}

/// `GET /coupons/{source_id}/reservations`
pub async fn list_reservations(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<String>,
) -> Result<Json<Vec<ReservationRecord>>> {
    let records = state.persistence.list_reservations(&source_id).await?;
    Ok(Json(records))
}

/// `GET /reservations/{id}`
pub async fn get_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationRecord>> {
    state
        .persistence
        .get_reservation(&id)
        .await?
        .map(Json)
        .ok_or(CoreError::ReservationNotFound { reservation_id: id })
}

/// `POST /reservations/{id}/sent`
pub async fn mark_reservation_sent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationRecord>> {
    state.allocator.mark_sent(&id).await?;
    get_reservation(State(state), Path(id)).await
}

/// `DELETE /reservations/{id}`
pub async fn release_reservation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    if state.allocator.release(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CoreError::ReservationNotFound { reservation_id: id })
    }
}

// ============================================================================
// Quota
// ============================================================================

/// `?metered=` query parameter; metered unless stated otherwise.
#[derive(Debug, Deserialize)]
pub struct MeteredQuery {
    /// Whether the flow counts against the monthly quota.
    #[serde(default = "metered_default")]
    pub metered: bool,
}

fn metered_default() -> bool {
    true
}

/// `GET /quota/{recipient}`
pub async fn check_allowance(
    State(state): State<Arc<AppState>>,
    Path(recipient): Path<String>,
    Query(query): Query<MeteredQuery>,
) -> Result<Json<Allowance>> {
    require("recipient", &recipient)?;
    let allowance = state
        .guard
        .check_allowance(&recipient, query.metered)
        .await?;
    Ok(Json(allowance))
}

/// Response of `POST /quota/{recipient}/sends`.
#[derive(Debug, Serialize)]
pub struct RecordSendResponse {
    /// False for unmetered flows.
    pub recorded: bool,
    /// Counter after the increment.
    pub counter: Option<QuotaCounterRecord>,
}

/// `POST /quota/{recipient}/sends`
pub async fn record_send(
    State(state): State<Arc<AppState>>,
    Path(recipient): Path<String>,
    Query(query): Query<MeteredQuery>,
) -> Result<Json<RecordSendResponse>> {
    require("recipient", &recipient)?;
    let counter = state.guard.record_send(&recipient, query.metered).await?;
    Ok(Json(RecordSendResponse {
        recorded: counter.is_some(),
        counter,
    }))
}

// ============================================================================
// Notifications
// ============================================================================

/// `POST /notifications`
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    Json(notification): Json<OrderNotification>,
) -> Result<Json<NotificationOutcome>> {
    let outcome = state.flow.send_order_notification(notification).await?;
    Ok(Json(outcome))
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::ValidationError {
            field: field.to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}
