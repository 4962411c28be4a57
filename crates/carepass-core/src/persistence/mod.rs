// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for carepass-core.
//!
//! Two ledgers back the kernel:
//!
//! - the reservation ledger, whose unique index on `(source_id, coupon_number)`
//!   is the only thing standing between two orders and the same coupon;
//! - the quota ledger, whose atomic increment-or-create keeps concurrent sends
//!   from losing updates.
//!
//! Neither trait offers an "exists?" probe for the write paths. Callers insert
//! and let the store decide.

pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::CoreError;

/// Reservation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Claimed by an order, message not yet delivered.
    Reserved,
    /// Delivered to the recipient; immutable from here on.
    Sent,
}

impl ReservationStatus {
    /// Returns the string representation stored in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Sent => "sent",
        }
    }

    /// Parse a status from its stored form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(Self::Reserved),
            "sent" => Some(Self::Sent),
            _ => None,
        }
    }
}

/// Reservation record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ReservationRecord {
    /// Reservation ID (UUID).
    pub id: String,
    /// Pool the coupon came from.
    pub source_id: String,
    /// Pool-internal identity of the coupon.
    pub code_id: i64,
    /// Externally visible coupon code.
    pub coupon_number: i64,
    /// Last redeemable day, copied from the pool entry.
    pub expiry_date: Option<NaiveDate>,
    /// Order this coupon was claimed for.
    pub order_id: String,
    /// Contact the coupon will be sent to.
    pub recipient_contact: String,
    /// Stored status (reserved, sent).
    pub status: String,
    /// When the coupon was claimed.
    pub reserved_at: DateTime<Utc>,
    /// When the coupon was delivered.
    pub sent_at: Option<DateTime<Utc>>,
}

impl ReservationRecord {
    /// Parsed status. Unknown strings read as `Reserved`.
    pub fn status(&self) -> ReservationStatus {
        ReservationStatus::parse(&self.status).unwrap_or(ReservationStatus::Reserved)
    }
}

/// Quota counter record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct QuotaCounterRecord {
    /// Normalized recipient key.
    pub recipient_key: String,
    /// Calendar year of the period (UTC).
    pub period_year: i32,
    /// Calendar month of the period, 0-based (UTC).
    pub period_month: i32,
    /// Sends recorded in the period.
    pub count: i64,
    /// When the last send was recorded.
    pub last_sent_at: DateTime<Utc>,
}

/// Key of a quota counter row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    /// Normalized recipient key.
    pub recipient_key: String,
    /// Calendar year (UTC).
    pub period_year: i32,
    /// Calendar month, 0-based (UTC).
    pub period_month: i32,
}

/// Result of attempting to create a reservation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row written; the coupon belongs to the caller.
    Inserted,
    /// The store rejected the row on its uniqueness constraint.
    AlreadyTaken,
}

/// Result of a conditional update or delete on a reserved row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationChange {
    /// The row was reserved and the change was applied.
    Applied,
    /// No row with that ID.
    NotFound,
    /// The row exists but is no longer reserved.
    NotReserved,
}

/// Durable record of which coupons are taken.
#[async_trait]
pub trait ReservationLedger: Send + Sync {
    /// Insert a new reservation row.
    ///
    /// Must return [`InsertOutcome::AlreadyTaken`] when, and only when, the
    /// store's uniqueness constraint on `(source_id, coupon_number)` rejects
    /// the row. Every other failure is an error.
    async fn insert_reservation(
        &self,
        record: &ReservationRecord,
    ) -> Result<InsertOutcome, CoreError>;

    /// Move a reserved row to sent.
    async fn mark_reservation_sent(
        &self,
        reservation_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<ReservationChange, CoreError>;

    /// Delete a reserved row, freeing its coupon number.
    async fn delete_reservation(&self, reservation_id: &str)
    -> Result<ReservationChange, CoreError>;

    /// Look up a reservation by ID.
    async fn get_reservation(
        &self,
        reservation_id: &str,
    ) -> Result<Option<ReservationRecord>, CoreError>;

    /// Reservations for a source in coupon order.
    async fn list_reservations(&self, source_id: &str)
    -> Result<Vec<ReservationRecord>, CoreError>;
}

/// Durable per-recipient, per-month send counters.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Atomically add `delta` to the counter, creating it if absent.
    async fn increment_quota(
        &self,
        key: &QuotaKey,
        delta: i64,
        sent_at: DateTime<Utc>,
    ) -> Result<QuotaCounterRecord, CoreError>;

    /// Read the counter for a key without modifying it.
    async fn get_quota(&self, key: &QuotaKey) -> Result<Option<QuotaCounterRecord>, CoreError>;
}

/// A store that backs both ledgers.
#[async_trait]
pub trait Persistence: ReservationLedger + QuotaLedger {
    /// Cheap connectivity probe.
    async fn health_check_db(&self) -> Result<bool, CoreError>;
}

/// Connect to the database named by `database_url` and run migrations.
///
/// `sqlite:` URLs select the SQLite backend; anything else is treated as
/// PostgreSQL.
pub async fn connect(database_url: &str) -> Result<Arc<dyn Persistence>, CoreError> {
    if database_url.starts_with("sqlite:") {
        info!("Using SQLite persistence");
        let persistence = SqlitePersistence::connect(database_url).await?;
        Ok(Arc::new(persistence))
    } else {
        info!("Using PostgreSQL persistence");
        let persistence = PostgresPersistence::connect(database_url).await?;
        Ok(Arc::new(persistence))
    }
}

/// Classify an insert failure: unique violations become `AlreadyTaken`.
pub(crate) fn classify_insert(
    result: Result<impl Sized, sqlx::Error>,
) -> Result<InsertOutcome, CoreError> {
    match result {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Ok(InsertOutcome::AlreadyTaken)
        }
        Err(e) => Err(CoreError::store("insert_reservation", e)),
    }
}
