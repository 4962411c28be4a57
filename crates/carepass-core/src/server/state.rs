// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared state for HTTP handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::allocator::CouponAllocator;
use crate::dispatch::NotificationTransport;
use crate::flow::NotificationFlow;
use crate::persistence::Persistence;
use crate::pool::PoolRegistry;
use crate::quota::QuotaGuard;

/// State shared by all handlers.
///
/// Contains the store, the kernel components and server metadata for
/// health checks.
pub struct AppState {
    /// Backing store for both ledgers.
    pub persistence: Arc<dyn Persistence>,
    /// Coupon allocator.
    pub allocator: CouponAllocator<dyn Persistence>,
    /// Monthly quota guard.
    pub guard: QuotaGuard<dyn Persistence>,
    /// Order notification flow.
    pub flow: NotificationFlow<dyn Persistence, dyn Persistence>,
    /// When the server started (for uptime calculation).
    pub start_time: Instant,
    /// Server version string.
    pub version: String,
}

impl AppState {
    /// Wire the kernel together over one store.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        pools: Arc<PoolRegistry>,
        transport: Arc<dyn NotificationTransport>,
        start_offset: usize,
        monthly_limit: i64,
    ) -> Self {
        let allocator = CouponAllocator::with_start_offset(persistence.clone(), pools, start_offset);
        let guard = QuotaGuard::with_limit(persistence.clone(), monthly_limit);
        let flow = NotificationFlow::new(allocator.clone(), guard.clone(), transport);

        Self {
            persistence,
            allocator,
            guard,
            flow,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Get the server uptime in milliseconds.
    pub fn uptime_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }
}
