// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the Insights output.

/// Invalid configuration. Fatal: the output refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    MissingField(&'static str),

    #[error(
        "New Relic Insights only allows a batch size of 1000 events or less, got {max_items}"
    )]
    BatchTooLarge { max_items: usize },

    #[error("Batch size must be at least 1")]
    EmptyBatch,

    #[error("Batch interval must be a positive number of seconds, got {0}")]
    InvalidInterval(f64),

    #[error("Request timeout must be a positive number of seconds")]
    InvalidTimeout,

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Unable to build HTTP client: {0}")]
    HttpClient(String),
}

/// A single incoming event could not be turned into an Insights event.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Event has no timestamp")]
    MissingTimestamp,

    #[error("Unable to parse event timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Event is not a JSON object")]
    NotAnObject,
}

/// Failure to deliver a payload to the Insights collector.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Collector responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request to collector failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unable to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// The batch buffer rejected an event.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("Batch buffer is closed")]
    Closed,
}

/// Errors surfaced to the host pipeline by the output facade.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Output is finished and no longer accepts events")]
    Finished,
}

impl From<BufferError> for OutputError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Closed => OutputError::Finished,
        }
    }
}
