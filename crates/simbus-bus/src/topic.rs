//! ---
//! simbus_section: "02-messaging-ipc-data-model"
//! simbus_subsection: "module"
//! simbus_type: "source"
//! simbus_scope: "code"
//! simbus_description: "Topic exchange routing key and binding pattern rules."
//! simbus_version: "v0.1.0"
//! simbus_owner: "tbd"
//! ---
//! Routing keys are dot separated words. In binding patterns `*` matches
//! exactly one word and `#` matches zero or more words.
use crate::{BusError, Result};

const SINGLE_WORD: &str = "*";
const ANY_WORDS: &str = "#";

/// True when `routing_key` is selected by the binding `pattern`.
pub fn matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&ANY_WORDS, rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&SINGLE_WORD, rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

/// Check a binding pattern before subscribing.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(invalid(pattern, "pattern must not be empty"));
    }
    if pattern.split('.').any(str::is_empty) {
        return Err(invalid(pattern, "pattern contains an empty word"));
    }
    Ok(())
}

/// Check a concrete routing key before publishing.
pub fn validate_routing_key(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(invalid(topic, "topic must not be empty"));
    }
    for word in topic.split('.') {
        if word.is_empty() {
            return Err(invalid(topic, "topic contains an empty word"));
        }
        if word == SINGLE_WORD || word == ANY_WORDS {
            return Err(invalid(topic, "wildcards are only allowed in subscriptions"));
        }
    }
    Ok(())
}

fn invalid(topic: &str, reason: &str) -> BusError {
    BusError::InvalidTopic {
        topic: topic.to_owned(),
        reason: reason.to_owned(),
    }
}
