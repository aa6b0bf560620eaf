// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The output as seen by the host pipeline.
//!
//! ```text
//!   pipeline ──> InsightsOutput::receive ──> filter ──> sanitize ──┬──> BatchBuffer ──┐
//!                                                                  └──────────────────┴──> Transport
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::batch_buffer::BatchBuffer;
use crate::client::{InsightsClient, Transport};
use crate::config::Config;
use crate::errors::{ConfigError, OutputError};
use crate::event::{Payload, PipelineMessage, RawEvent};
use crate::sanitizer::sanitize;

/// Decides whether the output handles an event at all.
pub trait OutputFilter: Send + Sync {
    fn should_output(&self, event: &RawEvent) -> bool;
}

impl<F> OutputFilter for F
where
    F: Fn(&RawEvent) -> bool + Send + Sync,
{
    fn should_output(&self, event: &RawEvent) -> bool {
        self(event)
    }
}

/// Accepts events carrying all of `tags` and none of `exclude_tags`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    tags: Vec<String>,
    exclude_tags: Vec<String>,
}

impl TagFilter {
    pub fn new(tags: Vec<String>, exclude_tags: Vec<String>) -> Self {
        TagFilter { tags, exclude_tags }
    }

    pub fn from_config(config: &Config) -> Self {
        TagFilter::new(config.tags.clone(), config.exclude_tags.clone())
    }
}

impl OutputFilter for TagFilter {
    fn should_output(&self, event: &RawEvent) -> bool {
        self.tags.iter().all(|tag| event.has_tag(tag))
            && !self.exclude_tags.iter().any(|tag| event.has_tag(tag))
    }
}

pub struct InsightsOutput {
    event_type: String,
    transport: Arc<dyn Transport>,
    batch: Option<BatchBuffer>,
    filter: Box<dyn OutputFilter>,
    finished: AtomicBool,
}

impl InsightsOutput {
    /// Builds an output shipping to the Insights collector described by
    /// `config`.
    pub fn initialize(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = InsightsClient::new(&config)?;
        info!("INSIGHTS | Output initialized, URL: {}", client.endpoint());
        InsightsOutput::with_transport(config, Arc::new(client))
    }

    /// Builds an output shipping through `transport`.
    pub fn with_transport(
        config: Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let batch = if config.batch_enabled {
            let buffer = BatchBuffer::new(
                config.max_items,
                config.max_interval()?,
                Arc::clone(&transport),
            )?;
            info!(
                "INSIGHTS | Batch processing of events enabled: up to {} events every {} ms",
                buffer.max_items(),
                buffer.max_interval().as_millis()
            );
            Some(buffer)
        } else {
            None
        };

        Ok(InsightsOutput {
            filter: Box::new(TagFilter::from_config(&config)),
            event_type: config.event_type_name,
            transport,
            batch,
            finished: AtomicBool::new(false),
        })
    }

    /// Replaces the filter deciding which events are handled.
    #[must_use]
    pub fn with_filter(mut self, filter: impl OutputFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    /// Handles one event from the pipeline.
    ///
    /// Filtered-out events are ignored. A bad timestamp fails this event only.
    /// Delivery failures are logged and never returned.
    pub async fn receive(&self, event: RawEvent) -> Result<(), OutputError> {
        if !self.filter.should_output(&event) {
            trace!("INSIGHTS | Event skipped by output filter");
            return Ok(());
        }
        if self.is_finished() {
            return Err(OutputError::Finished);
        }

        let event = sanitize(&event, &self.event_type)?;
        match &self.batch {
            Some(buffer) => buffer.enqueue(event)?,
            None => {
                if let Err(e) = self.transport.send(Payload::Single(event)).await {
                    debug!("INSIGHTS | Dropped event: {e}");
                }
            }
        }
        Ok(())
    }

    /// Routes a pipeline message: events are received, the shutdown sentinel
    /// tears the output down.
    pub async fn dispatch(&self, message: PipelineMessage) -> Result<(), OutputError> {
        match message {
            PipelineMessage::Event(event) => self.receive(event).await,
            PipelineMessage::Shutdown => {
                self.shutdown().await;
                Ok(())
            }
        }
    }

    /// Shutdown signal from the pipeline.
    pub async fn shutdown(&self) {
        self.teardown().await;
    }

    /// Sends whatever is still buffered, then stops accepting events.
    pub async fn teardown(&self) {
        let flushed = match &self.batch {
            Some(buffer) => buffer.shutdown().await,
            None => 0,
        };
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("INSIGHTS | Output finished after a final flush of {flushed} events");
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_batched(&self) -> bool {
        self.batch.is_some()
    }

    /// Events waiting in the current batch.
    pub fn pending(&self) -> usize {
        self.batch.as_ref().map_or(0, BatchBuffer::len)
    }
}
