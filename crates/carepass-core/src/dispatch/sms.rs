// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP SMS gateway client.
//!
//! Posts `{ "to", "from", "message" }` as JSON with a bearer key. Any 2xx is
//! a delivery; the gateway's `message_id` (when present) becomes the
//! dispatch ID.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SmsConfig;

use super::{DispatchReceipt, NotificationTransport, TransportError};

const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    from: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    message_id: Option<String>,
}

/// SMS transport backed by an HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpSmsTransport {
    client: reqwest::Client,
    config: SmsConfig,
}

impl HttpSmsTransport {
    /// Create a transport. Missing credentials are only reported when a send
    /// is attempted.
    pub fn new(config: SmsConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Whether both the endpoint and the key are set.
    pub fn is_configured(&self) -> bool {
        self.config.api_url.is_some() && self.config.api_key.is_some()
    }
}

#[async_trait]
impl NotificationTransport for HttpSmsTransport {
    async fn send(&self, recipient: &str, message: &str) -> Result<DispatchReceipt, TransportError> {
        let url = self
            .config
            .api_url
            .as_deref()
            .ok_or(TransportError::NotConfigured("CAREPASS_SMS_API_URL"))?;
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(TransportError::NotConfigured("CAREPASS_SMS_API_KEY"))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&SendRequest {
                to: recipient,
                from: &self.config.sender_id,
                message,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            warn!(status = status.as_u16(), "SMS gateway rejected message");
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // A 2xx means the gateway accepted the message even if the body is odd.
        let dispatch_id = response
            .json::<SendResponse>()
            .await
            .ok()
            .and_then(|r| r.message_id)
            .unwrap_or_else(|| format!("local-{}", Uuid::new_v4()));

        debug!(dispatch_id = %dispatch_id, "SMS accepted by gateway");
        Ok(DispatchReceipt { dispatch_id })
    }
}
