// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence for carepass-core.
//!
//! Provides the storage access functions for coupon reservations and quota
//! counters, plus the [`PostgresPersistence`] wrapper implementing the ledger
//! traits on top of them.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::CoreError;
use crate::migrations;

use super::{
    InsertOutcome, Persistence, QuotaCounterRecord, QuotaKey, QuotaLedger, ReservationChange,
    ReservationLedger, ReservationRecord, classify_insert,
};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    ///
    /// The caller is responsible for running [`migrations::run_postgres`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, verify the connection and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::store("connect", e))?;

        migrations::run_postgres(&pool).await?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Reservation Operations
// ============================================================================

/// Insert a reservation row, reporting a unique violation as `AlreadyTaken`.
pub async fn insert_reservation(
    pool: &PgPool,
    record: &ReservationRecord,
) -> Result<InsertOutcome, CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO coupon_reservations
            (id, source_id, code_id, coupon_number, expiry_date, order_id,
             recipient_contact, status, reserved_at, sent_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(&record.id)
    .bind(&record.source_id)
    .bind(record.code_id)
    .bind(record.coupon_number)
    .bind(record.expiry_date)
    .bind(&record.order_id)
    .bind(&record.recipient_contact)
    .bind(&record.status)
    .bind(record.reserved_at)
    .bind(record.sent_at)
    .execute(pool)
    .await;

    classify_insert(result)
}

/// Mark a reserved row as sent.
pub async fn mark_reservation_sent(
    pool: &PgPool,
    reservation_id: &str,
    sent_at: DateTime<Utc>,
) -> Result<ReservationChange, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE coupon_reservations
        SET status = 'sent', sent_at = $2
        WHERE id = $1 AND status = 'reserved'
        "#,
    )
    .bind(reservation_id)
    .bind(sent_at)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(ReservationChange::Applied);
    }
    reservation_change_for_miss(pool, reservation_id).await
}

/// Delete a reserved row. Sent rows are kept as history.
pub async fn delete_reservation(
    pool: &PgPool,
    reservation_id: &str,
) -> Result<ReservationChange, CoreError> {
    let result = sqlx::query(
        r#"
        DELETE FROM coupon_reservations
        WHERE id = $1 AND status = 'reserved'
        "#,
    )
    .bind(reservation_id)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(ReservationChange::Applied);
    }
    reservation_change_for_miss(pool, reservation_id).await
}

async fn reservation_change_for_miss(
    pool: &PgPool,
    reservation_id: &str,
) -> Result<ReservationChange, CoreError> {
    let exists: Option<String> =
        sqlx::query_scalar("SELECT status FROM coupon_reservations WHERE id = $1")
            .bind(reservation_id)
            .fetch_optional(pool)
            .await?;

    Ok(match exists {
        None => ReservationChange::NotFound,
        Some(_) => ReservationChange::NotReserved,
    })
}

/// Get a reservation by ID.
pub async fn get_reservation(
    pool: &PgPool,
    reservation_id: &str,
) -> Result<Option<ReservationRecord>, CoreError> {
    let record = sqlx::query_as::<_, ReservationRecord>(
        r#"
        SELECT id, source_id, code_id, coupon_number, expiry_date, order_id,
               recipient_contact, status, reserved_at, sent_at
        FROM coupon_reservations
        WHERE id = $1
        "#,
    )
    .bind(reservation_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// List reservations for a source ordered by coupon number.
pub async fn list_reservations(
    pool: &PgPool,
    source_id: &str,
) -> Result<Vec<ReservationRecord>, CoreError> {
    let records = sqlx::query_as::<_, ReservationRecord>(
        r#"
        SELECT id, source_id, code_id, coupon_number, expiry_date, order_id,
               recipient_contact, status, reserved_at, sent_at
        FROM coupon_reservations
        WHERE source_id = $1
        ORDER BY coupon_number ASC
        "#,
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

// ============================================================================
// Quota Operations
// ============================================================================

/// Add `delta` to a quota counter, creating the row on first use.
///
/// Uses ON CONFLICT so concurrent increments for the same key serialize on
/// the row instead of racing in application code.
pub async fn increment_quota(
    pool: &PgPool,
    key: &QuotaKey,
    delta: i64,
    sent_at: DateTime<Utc>,
) -> Result<QuotaCounterRecord, CoreError> {
    let record = sqlx::query_as::<_, QuotaCounterRecord>(
        r#"
        INSERT INTO quota_counters
            (recipient_key, period_year, period_month, count, last_sent_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (recipient_key, period_year, period_month) DO UPDATE
        SET count = quota_counters.count + EXCLUDED.count,
            last_sent_at = EXCLUDED.last_sent_at
        RETURNING recipient_key, period_year, period_month, count, last_sent_at
        "#,
    )
    .bind(&key.recipient_key)
    .bind(key.period_year)
    .bind(key.period_month)
    .bind(delta)
    .bind(sent_at)
    .fetch_one(pool)
    .await
    .map_err(|e| CoreError::store("increment_quota", e))?;

    Ok(record)
}

/// Get a quota counter.
pub async fn get_quota(
    pool: &PgPool,
    key: &QuotaKey,
) -> Result<Option<QuotaCounterRecord>, CoreError> {
    let record = sqlx::query_as::<_, QuotaCounterRecord>(
        r#"
        SELECT recipient_key, period_year, period_month, count, last_sent_at
        FROM quota_counters
        WHERE recipient_key = $1 AND period_year = $2 AND period_month = $3
        "#,
    )
    .bind(&key.recipient_key)
    .bind(key.period_year)
    .bind(key.period_month)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Check database connectivity.
pub async fn health_check_db(pool: &PgPool) -> Result<bool, CoreError> {
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(pool).await?;
    Ok(row.0 == 1)
}

// ============================================================================
// Trait implementations
// ============================================================================

#[async_trait::async_trait]
impl ReservationLedger for PostgresPersistence {
    async fn insert_reservation(
        &self,
        record: &ReservationRecord,
    ) -> Result<InsertOutcome, CoreError> {
        insert_reservation(&self.pool, record).await
    }

    async fn mark_reservation_sent(
        &self,
        reservation_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<ReservationChange, CoreError> {
        mark_reservation_sent(&self.pool, reservation_id, sent_at).await
    }

    async fn delete_reservation(
        &self,
        reservation_id: &str,
    ) -> Result<ReservationChange, CoreError> {
        delete_reservation(&self.pool, reservation_id).await
    }

    async fn get_reservation(
        &self,
        reservation_id: &str,
    ) -> Result<Option<ReservationRecord>, CoreError> {
        get_reservation(&self.pool, reservation_id).await
    }

    async fn list_reservations(
        &self,
        source_id: &str,
    ) -> Result<Vec<ReservationRecord>, CoreError> {
        list_reservations(&self.pool, source_id).await
    }
}

#[async_trait::async_trait]
impl QuotaLedger for PostgresPersistence {
    async fn increment_quota(
        &self,
        key: &QuotaKey,
        delta: i64,
        sent_at: DateTime<Utc>,
    ) -> Result<QuotaCounterRecord, CoreError> {
        increment_quota(&self.pool, key, delta, sent_at).await
    }

    async fn get_quota(&self, key: &QuotaKey) -> Result<Option<QuotaCounterRecord>, CoreError> {
        get_quota(&self.pool, key).await
    }
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn health_check_db(&self) -> Result<bool, CoreError> {
        health_check_db(&self.pool).await
    }
}
