// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered output forwarding pipeline events to the New Relic Insights insert
//! API.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch_buffer;
pub mod client;
pub mod config;
pub mod constants;
pub mod errors;
pub mod event;
pub mod http;
pub mod output;
pub mod sanitizer;

pub use batch_buffer::{BatchBuffer, BufferState};
pub use client::{Delivered, InsightsClient, Transport};
pub use config::Config;
pub use event::{Payload, PipelineMessage, RawEvent, SanitizedEvent};
pub use output::{InsightsOutput, OutputFilter, TagFilter};
