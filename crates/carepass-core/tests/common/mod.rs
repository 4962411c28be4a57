// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for carepass-core integration tests.
//!
//! Provides in-memory and file-backed stores, pool builders and a scriptable transport.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use carepass_core::dispatch::{DispatchReceipt, NotificationTransport, TransportError};
use carepass_core::persistence::SqlitePersistence;
use carepass_core::pool::{CouponPool, CouponPoolEntry, PoolRegistry};

pub const SOURCE: &str = "thyrocare";
pub const RECIPIENT: &str = "+919876543210";

/// Fresh, migrated in-memory SQLite store.
pub async fn sqlite_store() -> Arc<SqlitePersistence> {
    Arc::new(
        SqlitePersistence::in_memory()
            .await
            .expect("Failed to create in-memory store"),
    )
}

/// File-backed SQLite store with a multi-connection pool, so concurrent
/// writers actually race inside SQLite. Keep the `TempDir` alive.
pub async fn file_store() -> (tempfile::TempDir, Arc<SqlitePersistence>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = open_file_store(&dir).await;
    (dir, store)
}

/// Another handle on the database in `dir`, like a second server process.
pub async fn open_file_store(dir: &tempfile::TempDir) -> Arc<SqlitePersistence> {
    Arc::new(
        SqlitePersistence::from_path(dir.path().join("carepass.db"))
            .await
            .expect("Failed to open file store"),
    )
}

/// Registry with one pool of `size` coupons numbered `700_001..`.
pub fn registry(source_id: &str, size: i64) -> Arc<PoolRegistry> {
    Arc::new(PoolRegistry::from_pools([pool(source_id, size)]))
}

/// Pool of `size` coupons; `code_id` runs from 1.
pub fn pool(source_id: &str, size: i64) -> CouponPool {
    let entries = (1..=size)
        .map(|i| CouponPoolEntry {
            code_id: i,
            coupon_number: 700_000 + i,
            expiry_date: chrono::NaiveDate::from_ymd_opt(2026, 12, 31),
        })
        .collect();
    CouponPool::new(source_id, entries)
}

/// How the fake transport answers.
#[derive(Debug, Clone, Copy)]
pub enum TransportMode {
    Accept,
    Reject,
    Timeout,
}

/// Transport that records every message instead of sending it.
pub struct FakeTransport {
    mode: Mutex<TransportMode>,
    calls: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    pub fn new(mode: TransportMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::new(TransportMode::Accept)
    }

    pub fn set_mode(&self, mode: TransportMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Number of send attempts, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(recipient, message)` for each accepted send.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for FakeTransport {
    async fn send(&self, recipient: &str, message: &str) -> Result<DispatchReceipt, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mode = *self.mode.lock().unwrap();
        match mode {
            TransportMode::Accept => {
                self.sent
                    .lock()
                    .unwrap()
                    .push((recipient.to_string(), message.to_string()));
                Ok(DispatchReceipt {
                    dispatch_id: format!("fake-{n}"),
                })
            }
            TransportMode::Reject => Err(TransportError::Rejected {
                status: 503,
                body: "gateway down".to_string(),
            }),
            TransportMode::Timeout => Err(TransportError::Timeout),
        }
    }
}

/// Skip test if TEST_DATABASE_URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}
