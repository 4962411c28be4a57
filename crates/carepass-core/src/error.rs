// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for carepass-core.
//!
//! Provides a unified error type with machine-readable codes that the HTTP
//! layer maps to response statuses.

use serde::Serialize;
use thiserror::Error;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the coupon and quota kernel.
///
/// Uniqueness violations from the reservation ledger never appear here; the
/// allocator absorbs them while scanning the pool.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// No coupon left in the pool for a flow that requires one.
    #[error("No coupons remaining for source '{source_id}'")]
    PoolExhausted {
        /// The pool that ran dry.
        source_id: String,
    },

    /// Recipient reached the monthly send ceiling.
    #[error("Recipient '{recipient_key}' reached the monthly limit of {limit} messages")]
    QuotaExceeded {
        /// Normalized recipient key.
        recipient_key: String,
        /// Configured ceiling.
        limit: i64,
        /// Sends already recorded this period.
        used: i64,
    },

    /// Ledger or counter operation failed.
    #[error("Store error during '{operation}': {details}")]
    StoreFault {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// The transport call failed or timed out. The message was not sent.
    #[error("Message to '{recipient}' was not sent: {details}")]
    TransportFault {
        /// Recipient the send was attempted for.
        recipient: String,
        /// Error details.
        details: String,
    },

    /// The transport accepted the message but the follow-up bookkeeping failed.
    #[error(
        "Message sent (dispatch '{dispatch_id}') but '{operation}' was not recorded: {details}"
    )]
    DeliveredNotRecorded {
        /// Transport-side identifier of the delivered message.
        dispatch_id: String,
        /// The bookkeeping step that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Required configuration was absent when an operation needed it.
    #[error("Missing configuration: {0}")]
    ConfigurationMissing(String),

    /// Reservation row does not exist.
    #[error("Reservation '{reservation_id}' not found")]
    ReservationNotFound {
        /// The reservation ID that was not found.
        reservation_id: String,
    },

    /// Reservation is not in the state the operation requires.
    #[error("Reservation '{reservation_id}' is in invalid state: expected '{expected}', got '{actual}'")]
    InvalidReservationState {
        /// The reservation ID.
        reservation_id: String,
        /// The expected status.
        expected: String,
        /// The actual status.
        actual: String,
    },

    /// Input validation failed.
    #[error("Validation error for '{field}': {message}")]
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },
}

/// Serialized form of an error for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl CoreError {
    /// Build a store fault for the named operation.
    pub fn store(operation: &str, details: impl ToString) -> Self {
        Self::StoreFault {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }

    /// Convert this error to the body returned to API callers.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PoolExhausted { .. } => "POOL_EXHAUSTED",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::StoreFault { .. } => "STORE_FAULT",
            Self::TransportFault { .. } => "TRANSPORT_FAULT",
            Self::DeliveredNotRecorded { .. } => "DELIVERED_NOT_RECORDED",
            Self::ConfigurationMissing(_) => "CONFIGURATION_MISSING",
            Self::ReservationNotFound { .. } => "RESERVATION_NOT_FOUND",
            Self::InvalidReservationState { .. } => "INVALID_RESERVATION_STATE",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
        }
    }

    /// Whether the message definitely did not leave the system.
    ///
    /// `DeliveredNotRecorded` is the only variant where it did.
    pub fn message_not_sent(&self) -> bool {
        !matches!(self, Self::DeliveredNotRecorded { .. })
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::store("query", err)
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::store("migrate", err)
    }
}
