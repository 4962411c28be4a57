// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coupon pools loaded once at startup.
//!
//! Each source (typically a partner lab's coupon block) has one JSON file,
//! `<pool_dir>/<source_id>.json`, holding an ordered array of entries:
//!
//! ```json
//! [
//!   { "code_id": 1, "coupon_number": 700101, "expiry_date": "2026-12-31" },
//!   { "code_id": 2, "coupon_number": 700102 }
//! ]
//! ```
//!
//! Pools are immutable after loading and shared by reference through
//! [`PoolRegistry`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// One candidate coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponPoolEntry {
    /// Pool-internal identity.
    pub code_id: i64,
    /// Externally visible coupon code.
    pub coupon_number: i64,
    /// Last day the coupon can be redeemed.
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
}

/// Ordered, immutable coupon candidates for a single source.
#[derive(Debug, Clone, Default)]
pub struct CouponPool {
    source_id: String,
    entries: Vec<CouponPoolEntry>,
}

impl CouponPool {
    /// Build a pool from entries already in pool order.
    pub fn new(source_id: impl Into<String>, entries: Vec<CouponPoolEntry>) -> Self {
        Self {
            source_id: source_id.into(),
            entries,
        }
    }

    /// An empty pool; every reservation against it comes back empty-handed.
    pub fn empty(source_id: impl Into<String>) -> Self {
        Self::new(source_id, Vec::new())
    }

    /// Source this pool belongs to.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Entries in pool order.
    pub fn entries(&self) -> &[CouponPoolEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the pool holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidates from `offset` onwards. Empty when the offset is past the end.
    pub fn candidates_from(&self, offset: usize) -> &[CouponPoolEntry] {
        self.entries.get(offset..).unwrap_or(&[])
    }
}

/// Errors reading a pool file that exists but cannot be used.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The file could not be read.
    #[error("Failed to read pool file {path:?}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid pool document.
    #[error("Invalid pool file {path:?}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// All pools known to the process, keyed by source ID.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: HashMap<String, CouponPool>,
}

impl PoolRegistry {
    /// Build a registry from already constructed pools.
    pub fn from_pools(pools: impl IntoIterator<Item = CouponPool>) -> Self {
        Self {
            pools: pools
                .into_iter()
                .map(|pool| (pool.source_id.clone(), pool))
                .collect(),
        }
    }

    /// Load `<dir>/<source_id>.json` for every requested source.
    ///
    /// A missing or unreadable file degrades to an empty pool with a warning,
    /// so one bad source never stops the process from starting.
    pub fn load_dir(dir: impl AsRef<Path>, source_ids: &[String]) -> Self {
        let dir = dir.as_ref();
        let pools = source_ids.iter().map(|source_id| {
            let path = dir.join(format!("{source_id}.json"));
            match load_pool_file(source_id, &path) {
                Ok(Some(pool)) => {
                    info!(source_id = %source_id, entries = pool.len(), "Loaded coupon pool");
                    pool
                }
                Ok(None) => {
                    warn!(source_id = %source_id, path = ?path, "Coupon pool file missing, using empty pool");
                    CouponPool::empty(source_id.as_str())
                }
                Err(e) => {
                    warn!(source_id = %source_id, error = %e, "Coupon pool unusable, using empty pool");
                    CouponPool::empty(source_id.as_str())
                }
            }
        });
        Self::from_pools(pools.collect::<Vec<_>>())
    }

    /// Pool for a source. Unknown sources get an empty pool.
    pub fn pool(&self, source_id: &str) -> CouponPoolRef<'_> {
        match self.pools.get(source_id) {
            Some(pool) => CouponPoolRef::Loaded(pool),
            None => CouponPoolRef::Unknown,
        }
    }

    /// Source IDs with a registered pool (possibly empty).
    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }
}

/// Borrowed view of a pool lookup.
#[derive(Debug, Clone, Copy)]
pub enum CouponPoolRef<'a> {
    /// A registered pool.
    Loaded(&'a CouponPool),
    /// No pool registered for the source.
    Unknown,
}

impl<'a> CouponPoolRef<'a> {
    /// Candidates from `offset` onwards.
    pub fn candidates_from(self, offset: usize) -> &'a [CouponPoolEntry] {
        match self {
            Self::Loaded(pool) => pool.candidates_from(offset),
            Self::Unknown => &[],
        }
    }

    /// Number of entries (zero for unknown sources).
    pub fn len(self) -> usize {
        match self {
            Self::Loaded(pool) => pool.len(),
            Self::Unknown => 0,
        }
    }

    /// True when no entries are available.
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }
}

/// Read one pool file. `Ok(None)` when the file does not exist.
pub fn load_pool_file(source_id: &str, path: &Path) -> Result<Option<CouponPool>, PoolError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PoolError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let entries: Vec<CouponPoolEntry> =
        serde_json::from_str(&raw).map_err(|source| PoolError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(Some(CouponPool::new(source_id, entries)))
}
