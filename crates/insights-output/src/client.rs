// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of event payloads to the Insights insert API.
//!
//! One call is one POST. There is no retry: a failed payload is logged and
//! handed back to the caller as an error, and the caller drops it.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::config::Config;
use crate::constants::INSERT_KEY_HEADER;
use crate::errors::{ConfigError, TransportError};
use crate::event::Payload;
use crate::http::build_client;

/// Acknowledgement of an accepted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub status: u16,
    pub events: usize,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `payload` in a single request.
    async fn send(&self, payload: Payload) -> Result<Delivered, TransportError>;
}

#[derive(Debug, Clone)]
pub struct InsightsClient {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
}

impl InsightsClient {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let client = build_client(config.proxy().as_ref(), config.request_timeout())?;

        let mut insert_key = HeaderValue::from_str(config.insert_key.expose()).map_err(|_| {
            ConfigError::InvalidValue {
                field: "insertKey",
                value: "<redacted>".to_string(),
            }
        })?;
        insert_key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(INSERT_KEY_HEADER, insert_key);

        Ok(InsightsClient {
            client,
            endpoint: config.endpoint(),
            headers,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for InsightsClient {
    async fn send(&self, payload: Payload) -> Result<Delivered, TransportError> {
        let events = payload.len();
        let body = serde_json::to_vec(&payload).map_err(|e| {
            error!("INSIGHTS | Failed to serialize {events} events. Data dropped: {e}");
            TransportError::Payload(e)
        })?;
        trace!(request_body = %String::from_utf8_lossy(&body), "INSIGHTS | Request body");

        let start = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await;
        let elapsed = start.elapsed();

        match response {
            Ok(resp) if resp.status().is_success() => {
                let status = resp.status().as_u16();
                debug!(
                    "INSIGHTS | Sent {events} events in {} ms, response code {status}",
                    elapsed.as_millis()
                );
                Ok(Delivered { status, events })
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                warn!("INSIGHTS | Failed to send {events} events. Response code {status}: {body}");
                Err(TransportError::Status { status, body })
            }
            Err(e) => {
                error!(
                    "INSIGHTS | Failed to send {events} events after {} ms: {e}",
                    elapsed.as_millis()
                );
                Err(TransportError::Request(e))
            }
        }
    }
}
