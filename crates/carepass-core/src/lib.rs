// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Carepass Core - Coupon Allocation and Messaging Quota Kernel
//!
//! This crate hands out single-use discount coupons from pre-issued pools and
//! caps how many metered messages a recipient receives per calendar month.
//! Both guarantees are enforced by the store, so any number of server
//! processes can share one database.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Storefront backend (orders)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ HTTP (feature "server")
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        NotificationFlow                                  │
//! │   reserve ──► check_allowance ──► send ──► mark_sent ──► record_send     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │                    │                  │
//!        ▼                    ▼                  ▼
//! ┌───────────────┐   ┌───────────────┐   ┌─────────────────────────────┐
//! │CouponAllocator│   │  QuotaGuard   │   │  NotificationTransport      │
//! │ PoolRegistry  │   │               │   │  (HTTP SMS gateway)         │
//! └───────────────┘   └───────────────┘   └─────────────────────────────┘
//!        │                    │
//!        ▼                    ▼
//! ┌─────────────────────────────────────────┐
//! │     PostgreSQL / SQLite (sqlx)          │
//! │ coupon_reservations  quota_counters     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! | Guarantee | Enforced by |
//! |-----------|-------------|
//! | A coupon belongs to at most one live reservation | unique index on `(source_id, coupon_number)` |
//! | Concurrent sends never lose a count | `INSERT ... ON CONFLICT DO UPDATE SET count = count + 1` |
//! | Quota is checked before the transport call | [`flow::NotificationFlow`] ordering |
//! | A failed send frees its coupon | release in the flow's failure path |
//!
//! # Reservation Lifecycle
//!
//! ```text
//!   (free) ──reserve──► RESERVED ──mark_sent──► SENT
//!      ▲                   │
//!      └─────release───────┘
//! ```
//!
//! `SENT` is terminal: it is never released or re-sent.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CAREPASS_DATABASE_URL` | Yes | - | PostgreSQL or `sqlite:` connection string |
//! | `CAREPASS_HTTP_PORT` | No | `8080` | HTTP server port |
//! | `CAREPASS_POOL_DIR` | No | `data/coupons` | Directory of `<source_id>.json` pool files |
//! | `CAREPASS_COUPON_SOURCES` | No | - | Comma-separated source IDs to load |
//! | `CAREPASS_COUPON_START_OFFSET` | No | `49` | Leading pool entries to skip |
//! | `CAREPASS_MONTHLY_SEND_LIMIT` | No | `3` | Metered sends per recipient per month |
//! | `CAREPASS_SMS_API_URL` | No | - | SMS gateway endpoint |
//! | `CAREPASS_SMS_API_KEY` | No | - | SMS gateway bearer key |
//! | `CAREPASS_SMS_SENDER_ID` | No | `CAREPS` | SMS sender ID |
//! | `CAREPASS_SMS_TIMEOUT_MS` | No | `10000` | SMS gateway timeout |
//!
//! # Modules
//!
//! - [`allocator`]: Coupon reservation against the unique index
//! - [`config`]: Server configuration from environment variables
//! - [`dispatch`]: Notification transport trait and HTTP SMS client
//! - [`error`]: Error types with machine-readable codes
//! - [`flow`]: Order notification orchestration and compensation
//! - [`persistence`]: Ledger traits with PostgreSQL and SQLite backends
//! - [`pool`]: Coupon pools loaded at startup
//! - [`quota`]: Monthly per-recipient send quota

#![deny(missing_docs)]

/// Coupon allocation over the reservation ledger.
pub mod allocator;

/// Server configuration loaded from environment variables.
pub mod config;

/// Outbound transport for notifications.
pub mod dispatch;

/// Error types with HTTP status mapping.
pub mod error;

/// Order notification flow.
pub mod flow;

/// Embedded database migrations.
pub mod migrations;

/// Reservation and quota ledgers.
pub mod persistence;

/// Coupon pools.
pub mod pool;

/// Monthly send quota.
pub mod quota;

/// HTTP surface.
#[cfg(feature = "server")]
pub mod server;

pub use allocator::CouponAllocator;
pub use error::{CoreError, Result};
pub use flow::{NotificationFlow, NotificationOutcome, OrderNotification};
pub use quota::{Allowance, QuotaGuard};
