// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// The insert API rejects payloads carrying more events than this.
pub const MAX_BATCH_ITEMS: usize = 1000;

pub const DEFAULT_BATCH_ITEMS: usize = 10;
pub const DEFAULT_BATCH_INTERVAL_SECS: f64 = 5.0;
pub const DEFAULT_EVENT_TYPE: &str = "logstashEvent";
pub const DEFAULT_PROXY_PORT: u16 = 80;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const COLLECTOR_HOST: &str = "insights-collector.newrelic.com";

/// Sent as `X-Insert-Key`; header names are case-insensitive.
pub const INSERT_KEY_HEADER: &str = "x-insert-key";

/// Attribute injected into every event with the configured event type.
pub const EVENT_TYPE_KEY: &str = "eventType";
/// Attribute injected into every event with its epoch seconds.
pub const TIMESTAMP_KEY: &str = "timestamp";
