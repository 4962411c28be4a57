// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Monthly send quota per recipient.
//!
//! Counters are keyed by `(recipient_key, year, month)` in UTC, so a new
//! calendar month starts from zero without any reset step. Increments go
//! through the store's atomic upsert; the guard never reads, adds and writes
//! back a count itself.
//!
//! Unmetered flows skip the store entirely.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{CoreError, Result};
use crate::persistence::{QuotaCounterRecord, QuotaKey, QuotaLedger};

/// Metered sends allowed per recipient per calendar month.
pub const DEFAULT_MONTHLY_LIMIT: i64 = 3;

/// A UTC calendar month. `month0` is 0-based (January = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaPeriod {
    /// Calendar year.
    pub year: i32,
    /// Calendar month, 0-based.
    pub month0: u32,
}

impl QuotaPeriod {
    /// Period containing `at`.
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month0: at.month0(),
        }
    }

    /// Ledger key for a recipient in this period.
    pub fn key_for(&self, recipient_key: &str) -> QuotaKey {
        QuotaKey {
            recipient_key: recipient_key.to_string(),
            period_year: self.year,
            period_month: self.month0 as i32,
        }
    }
}

/// Remaining allowance for a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Allowance {
    /// The flow is not metered.
    Unlimited,
    /// The flow is metered and at least one send remains.
    Metered {
        /// Sends recorded this period.
        used: i64,
        /// Sends still allowed this period.
        remaining: i64,
    },
}

impl Allowance {
    /// Remaining sends, `None` when unlimited.
    pub fn remaining(&self) -> Option<i64> {
        match self {
            Self::Unlimited => None,
            Self::Metered { remaining, .. } => Some(*remaining),
        }
    }
}

/// Normalize a contact so formatting variants share one counter.
///
/// Trims, lowercases and drops the separators people type into phone
/// numbers (space, `-`, `(`, `)`, `.` outside email addresses).
pub fn normalize_recipient(contact: &str) -> String {
    let trimmed = contact.trim().to_lowercase();
    if trimmed.contains('@') {
        return trimmed;
    }
    trimmed
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect()
}

/// Enforces the monthly ceiling against a quota ledger.
pub struct QuotaGuard<L: QuotaLedger + ?Sized> {
    ledger: Arc<L>,
    limit: i64,
}

impl<L: QuotaLedger + ?Sized> Clone for QuotaGuard<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            limit: self.limit,
        }
    }
}

impl<L: QuotaLedger + ?Sized> QuotaGuard<L> {
    /// Create a guard with [`DEFAULT_MONTHLY_LIMIT`].
    pub fn new(ledger: Arc<L>) -> Self {
        Self::with_limit(ledger, DEFAULT_MONTHLY_LIMIT)
    }

    /// Create a guard with a custom monthly limit.
    pub fn with_limit(ledger: Arc<L>, limit: i64) -> Self {
        Self { ledger, limit }
    }

    /// Configured monthly limit.
    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Check how many metered sends the recipient has left this month.
    ///
    /// Fails with `QuotaExceeded` at the ceiling. Never writes.
    pub async fn check_allowance(&self, recipient: &str, metered: bool) -> Result<Allowance> {
        self.check_allowance_at(recipient, metered, Utc::now()).await
    }

    /// [`check_allowance`](Self::check_allowance) for the period containing `now`.
    #[instrument(skip(self, recipient))]
    pub async fn check_allowance_at(
        &self,
        recipient: &str,
        metered: bool,
        now: DateTime<Utc>,
    ) -> Result<Allowance> {
        if !metered {
            return Ok(Allowance::Unlimited);
        }

        let recipient_key = normalize_recipient(recipient);
        let key = QuotaPeriod::containing(now).key_for(&recipient_key);
        let used = self
            .ledger
            .get_quota(&key)
            .await?
            .map(|counter| counter.count)
            .unwrap_or(0);

        if used >= self.limit {
            warn!(recipient_key = %recipient_key, used, limit = self.limit, "Monthly quota exhausted");
            return Err(CoreError::QuotaExceeded {
                recipient_key,
                limit: self.limit,
                used,
            });
        }

        debug!(used, remaining = self.limit - used, "Quota available");
        Ok(Allowance::Metered {
            used,
            remaining: self.limit - used,
        })
    }

    /// Count a delivered metered send. No-op for unmetered flows.
    ///
    /// Only call this after the transport confirmed the send.
    pub async fn record_send(
        &self,
        recipient: &str,
        metered: bool,
    ) -> Result<Option<QuotaCounterRecord>> {
        self.record_send_at(recipient, metered, Utc::now()).await
    }

    /// [`record_send`](Self::record_send) at an explicit time.
    #[instrument(skip(self, recipient))]
    pub async fn record_send_at(
        &self,
        recipient: &str,
        metered: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<QuotaCounterRecord>> {
        if !metered {
            return Ok(None);
        }

        let key = QuotaPeriod::containing(now).key_for(&normalize_recipient(recipient));
        let counter = self.ledger.increment_quota(&key, 1, now).await?;
        info!(
            recipient_key = %counter.recipient_key,
            count = counter.count,
            "Send recorded against quota"
        );
        Ok(Some(counter))
    }
}
