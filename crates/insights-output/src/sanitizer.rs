// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Attribute name sanitization for the Insights insert API.
//!
//! Insights reserves a set of words for its query language and for its own
//! event attributes. Attributes named after one of them are renamed before the
//! event is shipped:
//!
//! - attributes the collector sets itself (`accountId`, `appId`, `timestamp`,
//!   `type`) get a `_moved` suffix,
//! - query keywords (`select`, `from`, `where`, ...) are wrapped in backticks.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{Map, Value};
use tracing::debug;

use crate::constants::{EVENT_TYPE_KEY, TIMESTAMP_KEY};
use crate::errors::ParseError;
use crate::event::{RawEvent, SanitizedEvent};

pub const MOVED_SUFFIX: &str = "_moved";
pub const QUOTE: char = '`';

/// How a reserved attribute name is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// `word` becomes `word_moved`.
    RenameSuffix,
    /// `word` becomes `` `word` ``.
    Quote,
    /// `word` becomes the given name.
    ReplaceWith(&'static str),
}

const MOVED_WORDS: [&str; 4] = ["accountId", "appId", "timestamp", "type"];

const QUOTED_WORDS: [&str; 38] = [
    "ago",
    "and",
    "as",
    "auto",
    "begin",
    "begintime",
    "compare",
    "day",
    "days",
    "end",
    "endtime",
    "explain",
    "facet",
    "from",
    "hour",
    "hours",
    "in",
    "is",
    "like",
    "limit",
    "minute",
    "minutes",
    "month",
    "months",
    "not",
    "null",
    "offset",
    "or",
    "second",
    "seconds",
    "select",
    "since",
    "timeseries",
    "until",
    "week",
    "weeks",
    "where",
    "with",
];

/// Process-wide reserved word table. Built on first use, never mutated.
pub static RESERVED_WORDS: LazyLock<HashMap<&'static str, Disposition>> = LazyLock::new(|| {
    MOVED_WORDS
        .iter()
        .map(|word| (*word, Disposition::RenameSuffix))
        .chain(QUOTED_WORDS.iter().map(|word| (*word, Disposition::Quote)))
        .collect()
});

pub fn disposition(key: &str) -> Option<Disposition> {
    RESERVED_WORDS.get(key).copied()
}

/// Returns the API-compliant name for an attribute.
pub fn sanitize_key(key: &str) -> Cow<'_, str> {
    match disposition(key) {
        None => Cow::Borrowed(key),
        Some(rule) => rewrite(key, rule),
    }
}

fn rewrite(key: &str, rule: Disposition) -> Cow<'_, str> {
    match rule {
        Disposition::RenameSuffix => Cow::Owned(format!("{key}{MOVED_SUFFIX}")),
        Disposition::Quote => Cow::Owned(format!("{QUOTE}{key}{QUOTE}")),
        Disposition::ReplaceWith(name) => Cow::Borrowed(name),
    }
}

/// Turns a pipeline event into an Insights event of type `event_type`.
///
/// `eventType` and `timestamp` are set first, so caller attributes carrying
/// those names never clobber them (`timestamp` is moved, `eventType` is not
/// reserved and would overwrite). When two attributes sanitize to the same
/// name, the later one wins.
pub fn sanitize(raw: &RawEvent, event_type: &str) -> Result<SanitizedEvent, ParseError> {
    let timestamp = raw.epoch_seconds()?;

    let mut attributes = Map::with_capacity(raw.fields().len() + 2);
    attributes.insert(EVENT_TYPE_KEY.to_string(), Value::from(event_type));
    attributes.insert(TIMESTAMP_KEY.to_string(), Value::from(timestamp));

    for (key, value) in raw.fields() {
        let name = match disposition(key) {
            None => Cow::Borrowed(key.as_str()),
            Some(rule) => {
                debug!(reserved_word = %key, "Reserved word found");
                rewrite(key, rule)
            }
        };
        attributes.insert(name.into_owned(), value.clone());
    }

    Ok(SanitizedEvent::from_map(attributes))
}
