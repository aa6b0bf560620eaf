// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use insights_output::{config::Config, InsightsOutput, PipelineMessage, RawEvent};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("INSIGHTS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on insights forwarder startup: {e}");
            return;
        }
    };

    let output = match InsightsOutput::initialize(config) {
        Ok(output) => output,
        Err(e) => {
            error!("Error initializing insights output: {e}");
            return;
        }
    };

    let mut lines = BufReader::new(stdin()).lines();
    let mut received: u64 = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("End of input reached");
                break;
            }
            Err(e) => {
                error!("Failed to read from stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str(&line)
            .map_err(|e| e.to_string())
            .and_then(|value| RawEvent::from_value(value).map_err(|e| e.to_string()))
        {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed event: {e}");
                continue;
            }
        };

        match output.dispatch(PipelineMessage::Event(event)).await {
            Ok(()) => received += 1,
            Err(e) => warn!("Event rejected: {e}"),
        }
    }

    if let Err(e) = output.dispatch(PipelineMessage::Shutdown).await {
        error!("Error shutting down insights output: {e}");
    }
    info!("Forwarded {received} events");
}
