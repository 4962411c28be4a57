// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coupon allocation.
//!
//! The allocator walks a source's pool in order and tries to write a
//! reservation row for each candidate. The ledger's unique index on
//! `(source_id, coupon_number)` decides who wins a coupon: a rejected insert
//! means another order holds it, so the allocator moves on to the next one.
//! There is no existence check before the insert and no in-process lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::persistence::{
    InsertOutcome, ReservationChange, ReservationLedger, ReservationRecord, ReservationStatus,
};
use crate::pool::PoolRegistry;

/// Leading pool entries skipped by default: allocation starts at the 50th coupon.
pub const DEFAULT_START_OFFSET: usize = 49;

/// Claims coupons from the shared pools against a reservation ledger.
pub struct CouponAllocator<L: ReservationLedger + ?Sized> {
    ledger: Arc<L>,
    pools: Arc<PoolRegistry>,
    start_offset: usize,
}

impl<L: ReservationLedger + ?Sized> Clone for CouponAllocator<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            pools: self.pools.clone(),
            start_offset: self.start_offset,
        }
    }
}

impl<L: ReservationLedger + ?Sized> CouponAllocator<L> {
    /// Create an allocator starting at [`DEFAULT_START_OFFSET`].
    pub fn new(ledger: Arc<L>, pools: Arc<PoolRegistry>) -> Self {
        Self::with_start_offset(ledger, pools, DEFAULT_START_OFFSET)
    }

    /// Create an allocator that skips the first `start_offset` pool entries.
    pub fn with_start_offset(ledger: Arc<L>, pools: Arc<PoolRegistry>, start_offset: usize) -> Self {
        Self {
            ledger,
            pools,
            start_offset,
        }
    }

    /// Configured start offset.
    pub fn start_offset(&self) -> usize {
        self.start_offset
    }

    /// Pools this allocator draws from.
    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    /// Claim the first free coupon of `source_id` for an order.
    ///
    /// Returns `Ok(None)` when every candidate from the start offset on is
    /// taken, or the source has no pool. Store failures other than the
    /// uniqueness rejection abort the scan and propagate.
    #[instrument(skip(self, recipient_contact), fields(start_offset = self.start_offset))]
    pub async fn reserve(
        &self,
        source_id: &str,
        order_id: &str,
        recipient_contact: &str,
    ) -> Result<Option<ReservationRecord>> {
        let candidates = self.pools.pool(source_id).candidates_from(self.start_offset);
        if candidates.is_empty() {
            warn!("No coupon candidates for source");
            return Ok(None);
        }

        let mut skipped = 0usize;
        for entry in candidates {
            let record = ReservationRecord {
                id: Uuid::new_v4().to_string(),
                source_id: source_id.to_string(),
                code_id: entry.code_id,
                coupon_number: entry.coupon_number,
                expiry_date: entry.expiry_date,
                order_id: order_id.to_string(),
                recipient_contact: recipient_contact.to_string(),
                status: ReservationStatus::Reserved.as_str().to_string(),
                reserved_at: Utc::now(),
                sent_at: None,
            };

            match self.ledger.insert_reservation(&record).await? {
                InsertOutcome::Inserted => {
                    info!(
                        reservation_id = %record.id,
                        coupon_number = record.coupon_number,
                        skipped,
                        "Coupon reserved"
                    );
                    return Ok(Some(record));
                }
                InsertOutcome::AlreadyTaken => {
                    skipped += 1;
                    debug!(coupon_number = entry.coupon_number, "Coupon already taken");
                }
            }
        }

        warn!(scanned = skipped, "Coupon pool exhausted");
        Ok(None)
    }

    /// Mark a reservation as delivered.
    ///
    /// Fails with `InvalidReservationState` when the reservation is already
    /// sent; the original `sent_at` is never overwritten.
    #[instrument(skip(self))]
    pub async fn mark_sent(&self, reservation_id: &str) -> Result<()> {
        self.mark_sent_at(reservation_id, Utc::now()).await
    }

    /// [`mark_sent`](Self::mark_sent) with an explicit timestamp.
    pub async fn mark_sent_at(&self, reservation_id: &str, sent_at: DateTime<Utc>) -> Result<()> {
        match self
            .ledger
            .mark_reservation_sent(reservation_id, sent_at)
            .await?
        {
            ReservationChange::Applied => {
                info!(reservation_id, "Reservation marked sent");
                Ok(())
            }
            ReservationChange::NotFound => Err(CoreError::ReservationNotFound {
                reservation_id: reservation_id.to_string(),
            }),
            ReservationChange::NotReserved => Err(CoreError::InvalidReservationState {
                reservation_id: reservation_id.to_string(),
                expected: ReservationStatus::Reserved.as_str().to_string(),
                actual: ReservationStatus::Sent.as_str().to_string(),
            }),
        }
    }

    /// Release a reserved coupon back to its pool.
    ///
    /// Returns `false` when there was nothing to release (already released or
    /// never existed). Sent reservations cannot be released.
    #[instrument(skip(self))]
    pub async fn release(&self, reservation_id: &str) -> Result<bool> {
        match self.ledger.delete_reservation(reservation_id).await? {
            ReservationChange::Applied => {
                info!(reservation_id, "Reservation released");
                Ok(true)
            }
            ReservationChange::NotFound => {
                debug!(reservation_id, "Nothing to release");
                Ok(false)
            }
            ReservationChange::NotReserved => Err(CoreError::InvalidReservationState {
                reservation_id: reservation_id.to_string(),
                expected: ReservationStatus::Reserved.as_str().to_string(),
                actual: ReservationStatus::Sent.as_str().to_string(),
            }),
        }
    }
}
