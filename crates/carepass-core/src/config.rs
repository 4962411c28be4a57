// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::allocator::DEFAULT_START_OFFSET;
use crate::quota::DEFAULT_MONTHLY_LIMIT;

/// Default sender ID shown on outgoing SMS.
pub const DEFAULT_SMS_SENDER_ID: &str = "CAREPS";

/// carepass-core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// HTTP server address
    pub http_addr: SocketAddr,
    /// Directory holding one `<source_id>.json` coupon file per source
    pub pool_dir: PathBuf,
    /// Coupon sources to load at startup
    pub coupon_sources: Vec<String>,
    /// Number of leading pool entries the allocator skips
    pub coupon_start_offset: usize,
    /// Metered sends allowed per recipient per calendar month
    pub monthly_send_limit: i64,
    /// SMS gateway settings
    pub sms: SmsConfig,
}

/// SMS gateway settings.
///
/// URL and key are optional at startup; a send attempted without them is
/// rejected with a configuration error.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    /// Gateway endpoint accepting JSON send requests
    pub api_url: Option<String>,
    /// Bearer token for the gateway
    pub api_key: Option<String>,
    /// Sender ID
    pub sender_id: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            sender_id: DEFAULT_SMS_SENDER_ID.to_string(),
            timeout: Duration::from_millis(10_000),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CAREPASS_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `CAREPASS_HTTP_PORT`: HTTP server port (default: 8080)
    /// - `CAREPASS_POOL_DIR`: coupon file directory (default: data/coupons)
    /// - `CAREPASS_COUPON_SOURCES`: comma-separated source IDs (default: none)
    /// - `CAREPASS_COUPON_START_OFFSET`: skipped leading coupons (default: 49)
    /// - `CAREPASS_MONTHLY_SEND_LIMIT`: metered sends per month (default: 3)
    /// - `CAREPASS_SMS_API_URL`, `CAREPASS_SMS_API_KEY`: gateway access (default: unset)
    /// - `CAREPASS_SMS_SENDER_ID`: sender ID (default: CAREPS)
    /// - `CAREPASS_SMS_TIMEOUT_MS`: gateway timeout (default: 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("CAREPASS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("CAREPASS_DATABASE_URL"))?;

        let http_port: u16 = std::env::var("CAREPASS_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CAREPASS_HTTP_PORT", "must be a valid port number")
            })?;

        let pool_dir = std::env::var("CAREPASS_POOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/coupons"));

        let coupon_sources = std::env::var("CAREPASS_COUPON_SOURCES")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();

        let coupon_start_offset: usize = std::env::var("CAREPASS_COUPON_START_OFFSET")
            .unwrap_or_else(|_| DEFAULT_START_OFFSET.to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "CAREPASS_COUPON_START_OFFSET",
                    "must be a non-negative integer",
                )
            })?;

        let monthly_send_limit: i64 = std::env::var("CAREPASS_MONTHLY_SEND_LIMIT")
            .unwrap_or_else(|_| DEFAULT_MONTHLY_LIMIT.to_string())
            .parse()
            .ok()
            .filter(|limit: &i64| *limit >= 0)
            .ok_or(ConfigError::Invalid(
                "CAREPASS_MONTHLY_SEND_LIMIT",
                "must be a non-negative integer",
            ))?;

        let timeout_ms: u64 = std::env::var("CAREPASS_SMS_TIMEOUT_MS")
            .unwrap_or_else(|_| "10000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("CAREPASS_SMS_TIMEOUT_MS", "must be a positive integer")
            })?;

        let sms = SmsConfig {
            api_url: non_empty_var("CAREPASS_SMS_API_URL"),
            api_key: non_empty_var("CAREPASS_SMS_API_KEY"),
            sender_id: non_empty_var("CAREPASS_SMS_SENDER_ID")
                .unwrap_or_else(|| DEFAULT_SMS_SENDER_ID.to_string()),
            timeout: Duration::from_millis(timeout_ms),
        };

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            pool_dir,
            coupon_sources,
            coupon_start_offset,
            monthly_send_limit,
            sms,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
