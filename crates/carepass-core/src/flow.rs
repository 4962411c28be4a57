// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Order notification flow.
//!
//! Ties the allocator, the quota guard and the transport together:
//!
//! 1. reserve a coupon (when the notification carries one)
//! 2. check the recipient's allowance
//! 3. render and send the message
//! 4. mark the coupon sent and count the send
//!
//! Anything that fails before the transport accepts the message releases the
//! reserved coupon. A failure after acceptance is reported as
//! `DeliveredNotRecorded` so callers can tell it apart from "not sent".

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::allocator::CouponAllocator;
use crate::dispatch::{NotificationTransport, TransportError};
use crate::error::{CoreError, Result};
use crate::persistence::{
    QuotaCounterRecord, QuotaLedger, ReservationLedger, ReservationRecord, ReservationStatus,
};
use crate::quota::QuotaGuard;

/// Placeholder replaced with the reserved coupon number.
pub const COUPON_PLACEHOLDER: &str = "{coupon}";
/// Placeholder replaced with the coupon's expiry date.
pub const EXPIRY_PLACEHOLDER: &str = "{expiry}";

/// A notification tied to a storefront order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderNotification {
    /// Order the message belongs to.
    pub order_id: String,
    /// Phone number or address the transport delivers to.
    pub recipient: String,
    /// Message text; may contain `{coupon}` and `{expiry}`.
    pub template: String,
    /// Pool to draw a coupon from, if any.
    #[serde(default)]
    pub coupon_source: Option<String>,
    /// Fail with `PoolExhausted` instead of sending without a coupon.
    #[serde(default)]
    pub require_coupon: bool,
    /// Whether the send counts against the monthly quota.
    #[serde(default = "default_metered")]
    pub metered: bool,
}

fn default_metered() -> bool {
    true
}

/// Result of a delivered notification.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationOutcome {
    /// Transport-side message identifier.
    pub dispatch_id: String,
    /// Text that was sent.
    pub message: String,
    /// The coupon delivered with the message, now marked sent.
    pub reservation: Option<ReservationRecord>,
    /// Quota counter after the send; `None` for unmetered flows.
    pub quota: Option<QuotaCounterRecord>,
}

/// Runs [`OrderNotification`]s through reserve, quota, send and bookkeeping.
pub struct NotificationFlow<R: ReservationLedger + ?Sized, Q: QuotaLedger + ?Sized> {
    allocator: CouponAllocator<R>,
    guard: QuotaGuard<Q>,
    transport: Arc<dyn NotificationTransport>,
}

impl<R: ReservationLedger + ?Sized, Q: QuotaLedger + ?Sized> Clone for NotificationFlow<R, Q> {
    fn clone(&self) -> Self {
        Self {
            allocator: self.allocator.clone(),
            guard: self.guard.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<R: ReservationLedger + ?Sized, Q: QuotaLedger + ?Sized> NotificationFlow<R, Q> {
    /// Create a flow.
    pub fn new(
        allocator: CouponAllocator<R>,
        guard: QuotaGuard<Q>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self {
            allocator,
            guard,
            transport,
        }
    }

    /// Send one order notification.
    #[instrument(skip(self, notification), fields(order_id = %notification.order_id, metered = notification.metered))]
    pub async fn send_order_notification(
        &self,
        notification: OrderNotification,
    ) -> Result<NotificationOutcome> {
        validate(&notification)?;

        let reservation = match notification.coupon_source.as_deref() {
            Some(source_id) => {
                let reserved = self
                    .allocator
                    .reserve(source_id, &notification.order_id, &notification.recipient)
                    .await?;
                if reserved.is_none() {
                    if notification.require_coupon {
                        return Err(CoreError::PoolExhausted {
                            source_id: source_id.to_string(),
                        });
                    }
                    warn!(source_id, "Pool exhausted, sending without coupon");
                }
                reserved
            }
            None => None,
        };

        if let Err(e) = self
            .guard
            .check_allowance(&notification.recipient, notification.metered)
            .await
        {
            self.compensate(reservation.as_ref()).await;
            return Err(e);
        }

        let message = render_message(&notification.template, reservation.as_ref());

        let receipt = match self.transport.send(&notification.recipient, &message).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(error = %e, "Notification not sent");
                self.compensate(reservation.as_ref()).await;
                return Err(transport_error(&notification.recipient, e));
            }
        };
        let dispatch_id = receipt.dispatch_id;

        // The message is out: both bookkeeping steps run even if one fails.
        let mut failed = Vec::new();

        let reservation = match reservation {
            Some(mut record) => {
                let sent_at = Utc::now();
                match self.allocator.mark_sent_at(&record.id, sent_at).await {
                    Ok(()) => {
                        record.status = ReservationStatus::Sent.as_str().to_string();
                        record.sent_at = Some(sent_at);
                    }
                    Err(e) => failed.push(("mark_sent", e)),
                }
                Some(record)
            }
            None => None,
        };

        let quota = match self
            .guard
            .record_send(&notification.recipient, notification.metered)
            .await
        {
            Ok(quota) => quota,
            Err(e) => {
                failed.push(("record_send", e));
                None
            }
        };

        if !failed.is_empty() {
            return Err(not_recorded(&dispatch_id, failed));
        }

        info!(dispatch_id = %dispatch_id, "Order notification delivered");
        Ok(NotificationOutcome {
            dispatch_id,
            message,
            reservation,
            quota,
        })
    }

    async fn compensate(&self, reservation: Option<&ReservationRecord>) {
        let Some(record) = reservation else {
            return;
        };
        if let Err(e) = self.allocator.release(&record.id).await {
            error!(
                reservation_id = %record.id,
                coupon_number = record.coupon_number,
                error = %e,
                "Failed to release coupon after aborted notification"
            );
        }
    }
}

fn validate(notification: &OrderNotification) -> Result<()> {
    for (field, value) in [
        ("order_id", &notification.order_id),
        ("recipient", &notification.recipient),
        ("template", &notification.template),
    ] {
        if value.trim().is_empty() {
            return Err(CoreError::ValidationError {
                field: field.to_string(),
                message: "must not be empty".to_string(),
            });
        }
    }
    Ok(())
}

/// Fill `{coupon}` and `{expiry}`. Without a coupon both become empty.
pub fn render_message(template: &str, reservation: Option<&ReservationRecord>) -> String {
    let (coupon, expiry) = match reservation {
        Some(r) => (
            r.coupon_number.to_string(),
            r.expiry_date
                .map(|d| d.format("%d %b %Y").to_string())
                .unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    };
    template
        .replace(COUPON_PLACEHOLDER, &coupon)
        .replace(EXPIRY_PLACEHOLDER, &expiry)
}

fn transport_error(recipient: &str, err: TransportError) -> CoreError {
    match err {
        TransportError::NotConfigured(var) => CoreError::ConfigurationMissing(var.to_string()),
        other => CoreError::TransportFault {
            recipient: recipient.to_string(),
            details: other.to_string(),
        },
    }
}

fn not_recorded(dispatch_id: &str, failed: Vec<(&str, CoreError)>) -> CoreError {
    let operation = failed
        .iter()
        .map(|(op, _)| *op)
        .collect::<Vec<_>>()
        .join(", ");
    let details = failed
        .iter()
        .map(|(op, e)| format!("{op}: {e}"))
        .collect::<Vec<_>>()
        .join("; ");
    error!(dispatch_id, operation = %operation, details = %details, "Delivered notification not recorded");
    CoreError::DeliveredNotRecorded {
        dispatch_id: dispatch_id.to_string(),
        operation,
        details,
    }
}
