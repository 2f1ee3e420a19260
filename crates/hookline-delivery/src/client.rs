//! HTTP client for outbound webhook delivery.
//!
//! One pooled client serves all workers in a process. Redirects are never
//! followed: a 3xx response must surface to the worker as-is so it can be
//! classified as a non-success and retried. TLS verification stays on.

use std::time::Duration;

use bytes::Bytes;
use hookline_core::{SubscriptionId, WebhookId};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-attempt timeout covering connect, request, and response.
    pub timeout: Duration,

    /// User agent string for outbound requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            user_agent: "Hookline-Delivery/1.0".to_string(),
        }
    }
}

/// Request context for one delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Webhook being delivered.
    pub webhook_id: WebhookId,

    /// Subscription the webhook belongs to.
    pub subscription_id: SubscriptionId,

    /// Destination URL, read from the subscription at attempt time.
    pub url: String,

    /// JSON payload, already serialized.
    pub body: Bytes,

    /// Optional `X-Event-Type` header value.
    pub event_type: Option<String>,

    /// Optional `X-Signature` header value.
    pub signature: Option<String>,

    /// 1-based attempt number, for tracing only.
    pub attempt: u32,
}

/// Response from a delivery attempt that reached the target.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code received.
    pub status_code: u16,

    /// Whether the status is in the 2xx range.
    pub is_success: bool,

    /// Total wall time of the request.
    pub duration: Duration,
}

/// Pooled HTTP client for webhook delivery.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the underlying HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the client cannot be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// POSTs the payload to the target URL.
    ///
    /// Any HTTP response, 2xx or not, is returned as `Ok`; the caller
    /// classifies the status. Transport failures map to `Network` or
    /// `Timeout` errors.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Timeout` when the per-attempt budget elapses
    /// and `DeliveryError::Network` for other transport failures.
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();

        let span = info_span!(
            "webhook_delivery",
            webhook_id = %request.webhook_id,
            subscription_id = %request.subscription_id,
            url = %request.url,
            attempt = request.attempt,
        );

        async move {
            let mut http_request = self
                .client
                .post(&request.url)
                .header("content-type", "application/json")
                .body(request.body.clone());

            if let Some(event_type) = &request.event_type {
                http_request = http_request.header("X-Event-Type", event_type);
            }
            if let Some(signature) = &request.signature {
                http_request = http_request.header("X-Signature", signature);
            }

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {e}");

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();

            tracing::debug!(
                status = status_code,
                duration_ms = duration.as_millis(),
                "received response"
            );

            Ok(DeliveryResponse { status_code, is_success, duration })
        }
        .instrument(span)
        .await
    }
}
