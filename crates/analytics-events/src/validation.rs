// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event validation applied before any network or file I/O.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::AnalyticsError;
use crate::event::{Event, EventType};

/// Legal shape for event names and property keys. Leading `#` is reserved
/// for preset properties.
const KEY_PATTERN: &str = "^[a-zA-Z#][A-Za-z0-9_]{0,49}$";

static KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(KEY_PATTERN).expect("key pattern compiles"));

pub(crate) fn is_valid_key(key: &str) -> bool {
    KEY_REGEX.is_match(key)
}

/// Checks an assembled envelope.
///
/// Key and event-name shape is only enforced when the active backend is
/// stringent; the `user_add` numeric rule always applies because the
/// collector cannot accumulate anything else.
pub(crate) fn validate(event: &Event, stringent: bool) -> Result<(), AnalyticsError> {
    if stringent && !event.event_name.is_empty() && !is_valid_key(&event.event_name) {
        return Err(AnalyticsError::InvalidData(format!(
            "invalid event name: {}",
            event.event_name
        )));
    }

    for (key, value) in &event.properties {
        if stringent && !is_valid_key(key) {
            return Err(AnalyticsError::InvalidData(format!(
                "invalid property key: {key}"
            )));
        }

        if event.event_type == EventType::UserAdd && !value.is_numeric() {
            return Err(AnalyticsError::InvalidData(format!(
                "invalid property value for {key}: user_add only supports numbers"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Properties, PropertyValue};

    fn event_with(event_type: EventType, properties: Properties) -> Event {
        Event {
            account_id: "acct".to_string(),
            distinct_id: String::new(),
            event_type,
            time: "2024-03-01 10:30:00.000".to_string(),
            event_name: if event_type.is_track() {
                "signup".to_string()
            } else {
                String::new()
            },
            event_id: String::new(),
            first_check_id: String::new(),
            ip: String::new(),
            uuid: String::new(),
            app_id: String::new(),
            properties,
        }
    }

    #[test]
    fn key_pattern_accepts_letters_hash_and_underscores() {
        assert!(is_valid_key("channel"));
        assert!(is_valid_key("Channel_2"));
        assert!(is_valid_key("#lib"));
        assert!(is_valid_key(&format!("a{}", "b".repeat(49))));
    }

    #[test]
    fn key_pattern_rejects_bad_shapes() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("9lives"));
        assert!(!is_valid_key("_leading"));
        assert!(!is_valid_key("has space"));
        assert!(!is_valid_key("has-dash"));
        assert!(!is_valid_key(&format!("a{}", "b".repeat(50))));
    }

    #[test]
    fn stringent_rejects_bad_key_lenient_accepts() {
        let mut properties = Properties::new();
        properties.insert("bad-key".to_string(), PropertyValue::from(1i64));
        let event = event_with(EventType::Track, properties);

        assert!(validate(&event, true).is_err());
        assert!(validate(&event, false).is_ok());
    }

    #[test]
    fn stringent_rejects_bad_event_name() {
        let mut event = event_with(EventType::Track, Properties::new());
        event.event_name = "bad name".to_string();

        assert!(validate(&event, true).is_err());
        assert!(validate(&event, false).is_ok());
    }

    #[test]
    fn user_add_requires_numeric_values_even_when_lenient() {
        let mut properties = Properties::new();
        properties.insert("amount".to_string(), PropertyValue::from("ten"));
        let event = event_with(EventType::UserAdd, properties);

        assert!(validate(&event, false).is_err());
        assert!(validate(&event, true).is_err());
    }

    #[test]
    fn user_add_accepts_numbers() {
        let mut properties = Properties::new();
        properties.insert("amount".to_string(), PropertyValue::from(10i64));
        properties.insert("score".to_string(), PropertyValue::from(0.5f64));
        let event = event_with(EventType::UserAdd, properties);

        assert!(validate(&event, true).is_ok());
    }
}
