// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::CoreError;
use crate::migrations;

use super::{
    InsertOutcome, Persistence, QuotaCounterRecord, QuotaKey, QuotaLedger, ReservationChange,
    ReservationLedger, ReservationRecord, classify_insert,
};

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The caller is responsible for running [`migrations::run_sqlite`].
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect using a `sqlite:` URL, creating the file if needed, and migrate.
    ///
    /// `sqlite::memory:` is limited to a single connection, since every
    /// in-memory connection would otherwise open its own empty database.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| CoreError::store("connect", e))?
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if url.contains(":memory:") {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| CoreError::store("connect", format!("Failed to connect to SQLite: {e}")))?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Fresh, migrated in-memory database.
    pub async fn in_memory() -> Result<Self, CoreError> {
        Self::connect("sqlite::memory:").await
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::store(
                    "create_dir",
                    format!("Failed to create directory {:?}: {}", parent, e),
                )
            })?;
        }

        Self::connect(&format!("sqlite:{}", path.to_string_lossy())).await
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn reservation_status(&self, reservation_id: &str) -> Result<ReservationChange, CoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM coupon_reservations WHERE id = ?")
                .bind(reservation_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match status {
            None => ReservationChange::NotFound,
            Some(_) => ReservationChange::NotReserved,
        })
    }
}

#[async_trait::async_trait]
impl ReservationLedger for SqlitePersistence {
    async fn insert_reservation(
        &self,
        record: &ReservationRecord,
    ) -> Result<InsertOutcome, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO coupon_reservations
                (id, source_id, code_id, coupon_number, expiry_date, order_id,
                 recipient_contact, status, reserved_at, sent_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
        .execute(&self.pool)
        .await;

        classify_insert(result)
    }

    async fn mark_reservation_sent(
        &self,
        reservation_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<ReservationChange, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE coupon_reservations
            SET status = 'sent', sent_at = ?
            WHERE id = ? AND status = 'reserved'
            "#,
        )
        .bind(sent_at)
        .bind(reservation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(ReservationChange::Applied);
        }
        self.reservation_status(reservation_id).await
    }

    async fn delete_reservation(
        &self,
        reservation_id: &str,
    ) -> Result<ReservationChange, CoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM coupon_reservations
            WHERE id = ? AND status = 'reserved'
            "#,
        )
        .bind(reservation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(ReservationChange::Applied);
        }
        self.reservation_status(reservation_id).await
    }

    async fn get_reservation(
        &self,
        reservation_id: &str,
    ) -> Result<Option<ReservationRecord>, CoreError> {
        let record = sqlx::query_as::<_, ReservationRecord>(
            r#"
            SELECT id, source_id, code_id, coupon_number, expiry_date, order_id,
                   recipient_contact, status, reserved_at, sent_at
            FROM coupon_reservations
            WHERE id = ?
            "#,
        )
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_reservations(
        &self,
        source_id: &str,
    ) -> Result<Vec<ReservationRecord>, CoreError> {
        let records = sqlx::query_as::<_, ReservationRecord>(
            r#"
            SELECT id, source_id, code_id, coupon_number, expiry_date, order_id,
                   recipient_contact, status, reserved_at, sent_at
            FROM coupon_reservations
            WHERE source_id = ?
            ORDER BY coupon_number ASC
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[async_trait::async_trait]
impl QuotaLedger for SqlitePersistence {
    async fn increment_quota(
        &self,
        key: &QuotaKey,
        delta: i64,
        sent_at: DateTime<Utc>,
    ) -> Result<QuotaCounterRecord, CoreError> {
        let record = sqlx::query_as::<_, QuotaCounterRecord>(
            r#"
            INSERT INTO quota_counters
                (recipient_key, period_year, period_month, count, last_sent_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(recipient_key, period_year, period_month) DO UPDATE SET
                count = quota_counters.count + excluded.count,
                last_sent_at = excluded.last_sent_at
            RETURNING recipient_key, period_year, period_month, count, last_sent_at
            "#,
        )
        .bind(&key.recipient_key)
        .bind(key.period_year)
        .bind(key.period_month)
        .bind(delta)
        .bind(sent_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::store("increment_quota", e))?;

        Ok(record)
    }

    async fn get_quota(&self, key: &QuotaKey) -> Result<Option<QuotaCounterRecord>, CoreError> {
        let record = sqlx::query_as::<_, QuotaCounterRecord>(
            r#"
            SELECT recipient_key, period_year, period_month, count, last_sent_at
            FROM quota_counters
            WHERE recipient_key = ? AND period_year = ? AND period_month = ?
            "#,
        )
        .bind(&key.recipient_key)
        .bind(key.period_year)
        .bind(key.period_month)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::ReservationStatus;
    use chrono::NaiveDate;
    use uuid::Uuid;

    async fn test_persistence() -> SqlitePersistence {
        SqlitePersistence::in_memory()
            .await
            .expect("Failed to create in-memory SQLite persistence")
    }

    fn reservation(source_id: &str, coupon_number: i64) -> ReservationRecord {
        ReservationRecord {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            code_id: coupon_number - 1000,
            coupon_number,
            expiry_date: NaiveDate::from_ymd_opt(2026, 12, 31),
            order_id: format!("order-{coupon_number}"),
            recipient_contact: "+919876543210".to_string(),
            status: ReservationStatus::Reserved.as_str().to_string(),
            reserved_at: Utc::now(),
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_reservation() {
        let persistence = test_persistence().await;
        let record = reservation("lab-a", 1001);

        let outcome = persistence.insert_reservation(&record).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);

        let stored = persistence
            .get_reservation(&record.id)
            .await
            .unwrap()
            .expect("Reservation should exist");
        assert_eq!(stored.coupon_number, 1001);
        assert_eq!(stored.expiry_date, record.expiry_date);
        assert_eq!(stored.status(), ReservationStatus::Reserved);
        assert!(stored.sent_at.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_coupon_reports_already_taken() {
        let persistence = test_persistence().await;

        let first = reservation("lab-a", 1001);
        let second = reservation("lab-a", 1001);
        let other_source = reservation("lab-b", 1001);

        assert_eq!(
            persistence.insert_reservation(&first).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            persistence.insert_reservation(&second).await.unwrap(),
            InsertOutcome::AlreadyTaken
        );
        // Same number in a different pool is a different coupon.
        assert_eq!(
            persistence.insert_reservation(&other_source).await.unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_mark_sent_only_applies_to_reserved_rows() {
        let persistence = test_persistence().await;
        let record = reservation("lab-a", 1001);
        persistence.insert_reservation(&record).await.unwrap();

        let change = persistence
            .mark_reservation_sent(&record.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(change, ReservationChange::Applied);

        let again = persistence
            .mark_reservation_sent(&record.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(again, ReservationChange::NotReserved);

        let missing = persistence
            .mark_reservation_sent("missing", Utc::now())
            .await
            .unwrap();
        assert_eq!(missing, ReservationChange::NotFound);

        let stored = persistence.get_reservation(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), ReservationStatus::Sent);
        assert!(stored.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_frees_coupon_number() {
        let persistence = test_persistence().await;
        let record = reservation("lab-a", 1001);
        persistence.insert_reservation(&record).await.unwrap();

        let change = persistence.delete_reservation(&record.id).await.unwrap();
        assert_eq!(change, ReservationChange::Applied);
        assert!(persistence.get_reservation(&record.id).await.unwrap().is_none());

        let retry = reservation("lab-a", 1001);
        assert_eq!(
            persistence.insert_reservation(&retry).await.unwrap(),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_delete_keeps_sent_rows() {
        let persistence = test_persistence().await;
        let record = reservation("lab-a", 1001);
        persistence.insert_reservation(&record).await.unwrap();
        persistence
            .mark_reservation_sent(&record.id, Utc::now())
            .await
            .unwrap();

        let change = persistence.delete_reservation(&record.id).await.unwrap();
        assert_eq!(change, ReservationChange::NotReserved);
        assert!(persistence.get_reservation(&record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_reservations_in_coupon_order() {
        let persistence = test_persistence().await;
        for number in [1003, 1001, 1002] {
            persistence
                .insert_reservation(&reservation("lab-a", number))
                .await
                .unwrap();
        }
        persistence
            .insert_reservation(&reservation("lab-b", 1000))
            .await
            .unwrap();

        let numbers: Vec<i64> = persistence
            .list_reservations("lab-a")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.coupon_number)
            .collect();
        assert_eq!(numbers, vec![1001, 1002, 1003]);
    }

    #[tokio::test]
    async fn test_increment_quota_creates_then_increments() {
        let persistence = test_persistence().await;
        let key = QuotaKey {
            recipient_key: "+919876543210".to_string(),
            period_year: 2026,
            period_month: 9,
        };

        assert!(persistence.get_quota(&key).await.unwrap().is_none());

        let first = persistence.increment_quota(&key, 1, Utc::now()).await.unwrap();
        assert_eq!(first.count, 1);

        let second = persistence.increment_quota(&key, 1, Utc::now()).await.unwrap();
        assert_eq!(second.count, 2);
        assert!(second.last_sent_at >= first.last_sent_at);

        let stored = persistence.get_quota(&key).await.unwrap().unwrap();
        assert_eq!(stored.count, 2);
        assert_eq!(stored.period_month, 9);
    }

    #[tokio::test]
    async fn test_health_check() {
        let persistence = test_persistence().await;
        assert!(persistence.health_check_db().await.unwrap());
    }

    #[tokio::test]
    async fn test_from_path_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/carepass.db");

        let persistence = SqlitePersistence::from_path(&path).await.unwrap();
        assert!(persistence.health_check_db().await.unwrap());
        assert!(path.exists());
    }
}
