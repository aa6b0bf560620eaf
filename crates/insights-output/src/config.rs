// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Output configuration.
//!
//! A [`Config`] can be deserialized from any serde source using the camelCase
//! option names (`accountId`, `insertKey`, `maxItems`, ...) or loaded from
//! `INSIGHTS_*` environment variables with [`Config::from_env`]. Either way it
//! must pass [`Config::validate`] before an output is built from it.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    COLLECTOR_HOST, DEFAULT_BATCH_INTERVAL_SECS, DEFAULT_BATCH_ITEMS, DEFAULT_EVENT_TYPE,
    DEFAULT_PROXY_PORT, DEFAULT_REQUEST_TIMEOUT_SECS, MAX_BATCH_ITEMS,
};
use crate::errors::ConfigError;

/// A credential that never shows up in logs.
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<redacted>)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(ConfigError::InvalidValue {
                field: "protocol",
                value: value.to_string(),
            }),
        }
    }
}

/// Forward proxy used for every request when set.
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<Secret>,
}

impl ProxyConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub account_id: String,
    pub insert_key: Secret,
    pub event_type_name: String,
    pub protocol: Protocol,
    pub proxy_host: Option<String>,
    pub proxy_port: u16,
    pub proxy_user: Option<String>,
    pub proxy_password: Option<Secret>,
    pub batch_enabled: bool,
    pub max_items: usize,
    pub max_interval_seconds: f64,
    pub request_timeout_seconds: u64,
    /// Replaces `{protocol}://insights-collector.newrelic.com`, e.g. for the EU
    /// collector or a local test server.
    pub collector_url: Option<String>,
    /// Only events carrying every one of these tags are sent.
    pub tags: Vec<String>,
    /// Events carrying any of these tags are skipped.
    pub exclude_tags: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            account_id: String::new(),
            insert_key: Secret::default(),
            event_type_name: DEFAULT_EVENT_TYPE.to_string(),
            protocol: Protocol::default(),
            proxy_host: None,
            proxy_port: DEFAULT_PROXY_PORT,
            proxy_user: None,
            proxy_password: None,
            batch_enabled: true,
            max_items: DEFAULT_BATCH_ITEMS,
            max_interval_seconds: DEFAULT_BATCH_INTERVAL_SECS,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
            collector_url: None,
            tags: Vec::new(),
            exclude_tags: Vec::new(),
        }
    }
}

impl Config {
    pub fn new(account_id: impl Into<String>, insert_key: impl Into<String>) -> Self {
        Config {
            account_id: account_id.into(),
            insert_key: Secret::new(insert_key),
            ..Config::default()
        }
    }

    /// Loads the configuration from `INSIGHTS_*` environment variables.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Config::default();

        config.account_id =
            get("INSIGHTS_ACCOUNT_ID").ok_or(ConfigError::MissingField("accountId"))?;
        config.insert_key = get("INSIGHTS_INSERT_KEY")
            .map(Secret::new)
            .ok_or(ConfigError::MissingField("insertKey"))?;

        if let Some(event_type) = get("INSIGHTS_EVENT_TYPE") {
            config.event_type_name = event_type;
        }
        if let Some(protocol) = get("INSIGHTS_PROTOCOL") {
            config.protocol = protocol.parse()?;
        }
        config.proxy_host = get("INSIGHTS_PROXY_HOST");
        if let Some(port) = get("INSIGHTS_PROXY_PORT") {
            config.proxy_port = parse_value("proxyPort", &port)?;
        }
        config.proxy_user = get("INSIGHTS_PROXY_USER");
        config.proxy_password = get("INSIGHTS_PROXY_PASSWORD").map(Secret::new);
        if let Some(batch) = get("INSIGHTS_BATCH") {
            config.batch_enabled = batch.to_lowercase() != "false";
        }
        if let Some(max_items) = get("INSIGHTS_BATCH_EVENTS") {
            config.max_items = parse_value("maxItems", &max_items)?;
        }
        if let Some(interval) = get("INSIGHTS_BATCH_TIMEOUT") {
            config.max_interval_seconds = parse_value("maxIntervalSeconds", &interval)?;
        }
        if let Some(timeout) = get("INSIGHTS_REQUEST_TIMEOUT") {
            config.request_timeout_seconds = parse_value("requestTimeoutSeconds", &timeout)?;
        }
        config.collector_url = get("INSIGHTS_COLLECTOR_URL");
        if let Some(tags) = get("INSIGHTS_TAGS") {
            config.tags = split_list(&tags);
        }
        if let Some(tags) = get("INSIGHTS_EXCLUDE_TAGS") {
            config.exclude_tags = split_list(&tags);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the settings the output cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account_id.trim().is_empty() {
            return Err(ConfigError::MissingField("accountId"));
        }
        if self.insert_key.is_empty() {
            return Err(ConfigError::MissingField("insertKey"));
        }
        if self.event_type_name.trim().is_empty() {
            return Err(ConfigError::MissingField("eventTypeName"));
        }
        if self.batch_enabled {
            validate_max_items(self.max_items)?;
            self.max_interval()?;
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        if let Some(url) = &self.collector_url {
            let url = url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: "collectorUrl",
                    value: url.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Insert API endpoint for the configured account.
    pub fn endpoint(&self) -> String {
        let prefix = match &self.collector_url {
            Some(url) => url.trim().trim_end_matches('/').to_string(),
            None => format!("{}://{COLLECTOR_HOST}", self.protocol.scheme()),
        };
        format!("{prefix}/v1/accounts/{}/events", self.account_id.trim())
    }

    pub fn max_interval(&self) -> Result<Duration, ConfigError> {
        if self.max_interval_seconds.is_nan() || self.max_interval_seconds <= 0.0 {
            return Err(ConfigError::InvalidInterval(self.max_interval_seconds));
        }
        Duration::try_from_secs_f64(self.max_interval_seconds)
            .map_err(|_| ConfigError::InvalidInterval(self.max_interval_seconds))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Proxy settings, present only when a proxy host is configured.
    pub fn proxy(&self) -> Option<ProxyConfig> {
        let host = self.proxy_host.as_ref()?.trim();
        if host.is_empty() {
            return None;
        }
        Some(ProxyConfig {
            host: host.to_string(),
            port: self.proxy_port,
            user: self.proxy_user.clone().filter(|user| !user.is_empty()),
            password: self.proxy_password.clone(),
        })
    }
}

pub(crate) fn validate_max_items(max_items: usize) -> Result<(), ConfigError> {
    if max_items > MAX_BATCH_ITEMS {
        return Err(ConfigError::BatchTooLarge { max_items });
    }
    if max_items == 0 {
        return Err(ConfigError::EmptyBatch);
    }
    Ok(())
}

fn parse_value<T: FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field,
        value: value.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}
