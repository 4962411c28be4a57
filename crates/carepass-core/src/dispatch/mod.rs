// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbound notification transport.
//!
//! The kernel makes at most one transport call per quota-checked send and
//! never retries; retry policy, if any, belongs to the caller.

pub mod sms;

pub use sms::HttpSmsTransport;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors from a transport call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Credentials or endpoint are not configured.
    #[error("SMS transport not configured: missing {0}")]
    NotConfigured(&'static str),

    /// The gateway did not answer in time.
    #[error("SMS gateway timed out")]
    Timeout,

    /// The request never got a response.
    #[error("SMS gateway unreachable: {0}")]
    Network(String),

    /// The gateway answered with a non-success status.
    #[error("SMS gateway rejected message with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
}

/// Proof that the transport accepted a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    /// Transport-side message identifier.
    pub dispatch_id: String,
}

/// Something that can deliver a text message to a recipient.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Deliver `message` to `recipient`. One attempt, no retries.
    async fn send(&self, recipient: &str, message: &str) -> Result<DispatchReceipt, TransportError>;
}
