// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for carepass-core.
//!
//! Both backends get the same two tables:
//!
//! - `coupon_reservations`: one row per handed-out coupon, `status` either
//!   `reserved` or `sent`. The unique index on `(source_id, coupon_number)`
//!   is the only thing keeping two concurrent reservations off the same
//!   coupon; releasing a coupon deletes its row.
//! - `quota_counters`: one send counter per normalized recipient per
//!   calendar month, keyed by `(recipient_key, period_year, period_month)`
//!   with a 0-based month. Increments are single upserts on that key.
//!
//! The persistence constructors run these on connect; call them directly
//! when sharing a pool created elsewhere.
//!
//! # Example
//!
//! ```ignore
//! use sqlx::PgPool;
//! use carepass_core::migrations;
//!
//! let pool = PgPool::connect(&database_url).await?;
//! migrations::run_postgres(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// PostgreSQL migrator with all kernel migrations embedded.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// SQLite migrator with all kernel migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run PostgreSQL migrations.
///
/// Applies all pending migrations to the database. Safe to call multiple times;
/// already-applied migrations are skipped.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}

/// Run SQLite migrations.
///
/// Applies all pending migrations to the database. Safe to call multiple times;
/// already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
