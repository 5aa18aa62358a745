// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The reporting façade: merges super properties, extracts reserved keys,
//! validates, and hands finished envelopes to the configured consumer.

use std::sync::{Arc, RwLock};

use chrono::Local;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::consumer::Consumer;
use crate::error::AnalyticsError;
use crate::event::{Event, EventType, Properties, PropertyValue, WIRE_TIME_FORMAT};
use crate::validation;
use crate::{LIB_NAME, SDK_VERSION};

type DynamicSuperProperties = Box<dyn Fn() -> Properties + Send + Sync>;

/// Entry point applications report through.
///
/// Cheap to share behind an `Arc`; all state is internally synchronized.
/// Super properties are merged into every track event at the lowest
/// precedence, a dynamic provider (re-evaluated per event) sits above them,
/// and event-supplied properties always win.
pub struct Analytics {
    consumer: Arc<dyn Consumer>,
    super_properties: RwLock<Properties>,
    dynamic_super_properties: RwLock<Option<DynamicSuperProperties>>,
}

impl Analytics {
    pub fn new(consumer: Arc<dyn Consumer>) -> Self {
        debug!("analytics client initialized");
        Analytics {
            consumer,
            super_properties: RwLock::new(Properties::new()),
            dynamic_super_properties: RwLock::new(None),
        }
    }

    /// Merges `properties` into the process-wide super properties.
    pub fn set_super_properties(&self, properties: Properties) {
        let mut guard = self.super_properties.write().expect("lock poisoned");
        guard.extend(properties);
    }

    pub fn get_super_properties(&self) -> Properties {
        self.super_properties.read().expect("lock poisoned").clone()
    }

    pub fn clear_super_properties(&self) {
        self.super_properties.write().expect("lock poisoned").clear();
    }

    /// Installs a provider re-evaluated for every track event. Keep it
    /// cheap; it runs on the reporting path.
    pub fn set_dynamic_super_properties<F>(&self, provider: F)
    where
        F: Fn() -> Properties + Send + Sync + 'static,
    {
        let mut guard = self
            .dynamic_super_properties
            .write()
            .expect("lock poisoned");
        *guard = Some(Box::new(provider));
    }

    fn dynamic_super_properties(&self) -> Properties {
        let guard = self.dynamic_super_properties.read().expect("lock poisoned");
        guard.as_ref().map(|provider| provider()).unwrap_or_default()
    }

    /// Reports an ordinary event.
    pub async fn track(
        &self,
        account_id: &str,
        distinct_id: &str,
        event_name: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.track_event(
            account_id,
            distinct_id,
            EventType::Track,
            event_name,
            "",
            properties,
        )
        .await
    }

    /// Reports a first-occurrence event, deduplicated by `first_check_id`.
    pub async fn track_first(
        &self,
        account_id: &str,
        distinct_id: &str,
        event_name: &str,
        first_check_id: &str,
        mut properties: Properties,
    ) -> Result<(), AnalyticsError> {
        if first_check_id.is_empty() {
            return Err(AnalyticsError::InvalidData(
                "the first check id must be provided".to_string(),
            ));
        }
        properties.insert(
            "#first_check_id".to_string(),
            PropertyValue::from(first_check_id),
        );
        self.track_event(
            account_id,
            distinct_id,
            EventType::Track,
            event_name,
            "",
            properties,
        )
        .await
    }

    /// Reports an updatable event; later events with the same `event_id`
    /// overwrite the updatable part.
    pub async fn track_update(
        &self,
        account_id: &str,
        distinct_id: &str,
        event_name: &str,
        event_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.track_event(
            account_id,
            distinct_id,
            EventType::TrackUpdate,
            event_name,
            event_id,
            properties,
        )
        .await
    }

    /// Reports an overwritable event; later events with the same
    /// `event_id` replace it entirely.
    pub async fn track_overwrite(
        &self,
        account_id: &str,
        distinct_id: &str,
        event_name: &str,
        event_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.track_event(
            account_id,
            distinct_id,
            EventType::TrackOverwrite,
            event_name,
            event_id,
            properties,
        )
        .await
    }

    async fn track_event(
        &self,
        account_id: &str,
        distinct_id: &str,
        event_type: EventType,
        event_name: &str,
        event_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        if event_name.is_empty() {
            return Err(AnalyticsError::InvalidData(
                "the event name must be provided".to_string(),
            ));
        }
        if event_id.is_empty() && event_type != EventType::Track {
            return Err(AnalyticsError::InvalidData(
                "the event id must be provided".to_string(),
            ));
        }

        let mut merged = self.get_super_properties();
        merged.extend(self.dynamic_super_properties());
        merged.insert("#lib".to_string(), PropertyValue::from(LIB_NAME));
        merged.insert("#lib_version".to_string(), PropertyValue::from(SDK_VERSION));
        merged.extend(properties);

        self.deliver(
            account_id,
            distinct_id,
            event_type,
            event_name,
            event_id,
            merged,
        )
        .await
    }

    /// Sets user properties, overwriting existing names.
    pub async fn user_set(
        &self,
        account_id: &str,
        distinct_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.user_event(account_id, distinct_id, EventType::UserSet, properties)
            .await
    }

    /// Sets user properties only where no value exists yet.
    pub async fn user_set_once(
        &self,
        account_id: &str,
        distinct_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.user_event(account_id, distinct_id, EventType::UserSetOnce, properties)
            .await
    }

    /// Removes the named user properties.
    pub async fn user_unset(
        &self,
        account_id: &str,
        distinct_id: &str,
        keys: &[&str],
    ) -> Result<(), AnalyticsError> {
        if keys.is_empty() {
            return Err(AnalyticsError::InvalidData(
                "user_unset requires at least one key".to_string(),
            ));
        }
        let properties = keys
            .iter()
            .map(|key| ((*key).to_string(), PropertyValue::from(0i64)))
            .collect();
        self.user_event(account_id, distinct_id, EventType::UserUnset, properties)
            .await
    }

    pub async fn user_unset_with_properties(
        &self,
        account_id: &str,
        distinct_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        if properties.is_empty() {
            return Err(AnalyticsError::InvalidData(
                "user_unset requires at least one key".to_string(),
            ));
        }
        self.user_event(account_id, distinct_id, EventType::UserUnset, properties)
            .await
    }

    /// Accumulates numeric user properties.
    pub async fn user_add(
        &self,
        account_id: &str,
        distinct_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.user_event(account_id, distinct_id, EventType::UserAdd, properties)
            .await
    }

    /// Appends to list-valued user properties.
    pub async fn user_append(
        &self,
        account_id: &str,
        distinct_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.user_event(account_id, distinct_id, EventType::UserAppend, properties)
            .await
    }

    /// Appends to list-valued user properties, dropping duplicates.
    pub async fn user_uniq_append(
        &self,
        account_id: &str,
        distinct_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.user_event(
            account_id,
            distinct_id,
            EventType::UserUniqAppend,
            properties,
        )
        .await
    }

    /// Deletes the user. Irreversible; already-ingested events survive.
    pub async fn user_delete(
        &self,
        account_id: &str,
        distinct_id: &str,
    ) -> Result<(), AnalyticsError> {
        self.user_event(
            account_id,
            distinct_id,
            EventType::UserDelete,
            Properties::new(),
        )
        .await
    }

    pub async fn user_delete_with_properties(
        &self,
        account_id: &str,
        distinct_id: &str,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.user_event(account_id, distinct_id, EventType::UserDelete, properties)
            .await
    }

    async fn user_event(
        &self,
        account_id: &str,
        distinct_id: &str,
        event_type: EventType,
        properties: Properties,
    ) -> Result<(), AnalyticsError> {
        self.deliver(account_id, distinct_id, event_type, "", "", properties)
            .await
    }

    /// Pushes buffered data towards the collector immediately.
    pub async fn flush(&self) -> Result<(), AnalyticsError> {
        self.consumer.flush().await
    }

    /// Flushes and shuts the consumer down.
    pub async fn close(&self) -> Result<(), AnalyticsError> {
        let result = self.consumer.close().await;
        debug!("analytics client closed");
        result
    }

    async fn deliver(
        &self,
        account_id: &str,
        distinct_id: &str,
        event_type: EventType,
        event_name: &str,
        event_id: &str,
        mut properties: Properties,
    ) -> Result<(), AnalyticsError> {
        if account_id.is_empty() && distinct_id.is_empty() {
            return Err(AnalyticsError::InvalidData(
                "account_id and distinct_id cannot both be empty".to_string(),
            ));
        }

        let ip = extract_string(&mut properties, "#ip");
        let app_id = extract_string(&mut properties, "#app_id");
        let time = extract_time(&mut properties);
        let first_check_id = extract_string(&mut properties, "#first_check_id");
        let mut uuid = extract_string(&mut properties, "#uuid");
        if uuid.is_empty() {
            uuid = Uuid::new_v4().to_string();
        }

        let event = Event {
            account_id: account_id.to_string(),
            distinct_id: distinct_id.to_string(),
            event_type,
            time,
            event_name: event_name.to_string(),
            event_id: event_id.to_string(),
            first_check_id,
            ip,
            uuid,
            app_id,
            properties,
        };

        validation::validate(&event, self.consumer.is_stringent())?;
        self.consumer.add(event).await
    }
}

/// Removes `key` from the bag and returns it as a string. A value of the
/// wrong type is dropped with a warning, matching how the collector would
/// treat it.
fn extract_string(properties: &mut Properties, key: &str) -> String {
    match properties.remove(key) {
        Some(PropertyValue::String(value)) => value,
        Some(_) => {
            warn!("invalid data type for {key}, dropping it");
            String::new()
        }
        None => String::new(),
    }
}

/// Removes `#time` and renders it. Absent or wrongly-typed values fall
/// back to "now".
fn extract_time(properties: &mut Properties) -> String {
    match properties.remove("#time") {
        Some(PropertyValue::String(value)) => value,
        Some(PropertyValue::Timestamp(time)) => time.format(WIRE_TIME_FORMAT).to_string(),
        _ => Local::now().format(WIRE_TIME_FORMAT).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Captures envelopes instead of delivering them.
    #[derive(Default)]
    struct CapturingConsumer {
        stringent: bool,
        events: StdMutex<Vec<Event>>,
    }

    impl CapturingConsumer {
        fn stringent() -> Self {
            CapturingConsumer {
                stringent: true,
                ..Default::default()
            }
        }

        fn last(&self) -> Event {
            self.events
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("an event was captured")
        }
    }

    #[async_trait]
    impl Consumer for CapturingConsumer {
        async fn add(&self, event: Event) -> Result<(), AnalyticsError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }

        async fn flush(&self) -> Result<(), AnalyticsError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), AnalyticsError> {
            Ok(())
        }

        fn is_stringent(&self) -> bool {
            self.stringent
        }
    }

    fn client() -> (Analytics, Arc<CapturingConsumer>) {
        let consumer = Arc::new(CapturingConsumer::default());
        (Analytics::new(consumer.clone()), consumer)
    }

    #[tokio::test]
    async fn both_ids_empty_is_a_validation_error() {
        let (analytics, consumer) = client();
        let err = analytics
            .track("", "", "signup", Properties::new())
            .await
            .expect_err("must fail");
        assert!(matches!(err, AnalyticsError::InvalidData(_)));
        assert!(consumer.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn track_requires_an_event_name() {
        let (analytics, _) = client();
        assert!(analytics
            .track("acct", "", "", Properties::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn track_update_requires_an_event_id() {
        let (analytics, _) = client();
        assert!(analytics
            .track_update("acct", "", "signup", "", Properties::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn preset_lib_properties_are_attached() {
        let (analytics, consumer) = client();
        analytics
            .track("acct", "", "signup", Properties::new())
            .await
            .expect("tracked");

        let event = consumer.last();
        assert_eq!(event.properties["#lib"].as_str(), Some(LIB_NAME));
        assert_eq!(event.properties["#lib_version"].as_str(), Some(SDK_VERSION));
        assert!(!event.uuid.is_empty());
        assert!(!event.time.is_empty());
    }

    #[tokio::test]
    async fn merge_precedence_event_beats_dynamic_beats_static() {
        let (analytics, consumer) = client();
        let mut statics = Properties::new();
        statics.insert("channel".to_string(), PropertyValue::from("static"));
        statics.insert("region".to_string(), PropertyValue::from("static"));
        statics.insert("tier".to_string(), PropertyValue::from("static"));
        analytics.set_super_properties(statics);

        analytics.set_dynamic_super_properties(|| {
            let mut dynamics = Properties::new();
            dynamics.insert("region".to_string(), PropertyValue::from("dynamic"));
            dynamics.insert("tier".to_string(), PropertyValue::from("dynamic"));
            dynamics
        });

        let mut event_props = Properties::new();
        event_props.insert("tier".to_string(), PropertyValue::from("event"));
        analytics
            .track("acct", "", "signup", event_props)
            .await
            .expect("tracked");

        let event = consumer.last();
        assert_eq!(event.properties["channel"].as_str(), Some("static"));
        assert_eq!(event.properties["region"].as_str(), Some("dynamic"));
        assert_eq!(event.properties["tier"].as_str(), Some("event"));
    }

    #[tokio::test]
    async fn super_properties_do_not_leak_into_user_events() {
        let (analytics, consumer) = client();
        let mut statics = Properties::new();
        statics.insert("channel".to_string(), PropertyValue::from("static"));
        analytics.set_super_properties(statics);

        let mut props = Properties::new();
        props.insert("name".to_string(), PropertyValue::from("Tom"));
        analytics
            .user_set("acct", "", props)
            .await
            .expect("user_set");

        let event = consumer.last();
        assert!(!event.properties.contains_key("channel"));
        assert!(!event.properties.contains_key("#lib"));
    }

    #[tokio::test]
    async fn reserved_keys_move_into_envelope_fields() {
        let (analytics, consumer) = client();
        let mut props = Properties::new();
        props.insert("#ip".to_string(), PropertyValue::from("10.1.2.3"));
        props.insert("#app_id".to_string(), PropertyValue::from("project-2"));
        props.insert(
            "#uuid".to_string(),
            PropertyValue::from("2e815d3f-93f0-4b52-8d4b-bd3a05a1c8f3"),
        );
        props.insert(
            "#time".to_string(),
            PropertyValue::from("2024-03-01 10:30:00.000"),
        );
        analytics
            .track("acct", "", "signup", props)
            .await
            .expect("tracked");

        let event = consumer.last();
        assert_eq!(event.ip, "10.1.2.3");
        assert_eq!(event.app_id, "project-2");
        assert_eq!(event.uuid, "2e815d3f-93f0-4b52-8d4b-bd3a05a1c8f3");
        assert_eq!(event.time, "2024-03-01 10:30:00.000");
        for key in ["#ip", "#app_id", "#uuid", "#time"] {
            assert!(!event.properties.contains_key(key), "{key} left in bag");
        }
    }

    #[tokio::test]
    async fn wrongly_typed_reserved_time_falls_back_to_now() {
        let (analytics, consumer) = client();
        let mut props = Properties::new();
        props.insert("#time".to_string(), PropertyValue::from(42i64));
        analytics
            .track("acct", "", "signup", props)
            .await
            .expect("tracked");

        let event = consumer.last();
        // Fallback renders in the wire format: "YYYY-MM-DD HH:MM:SS.mmm".
        assert_eq!(event.time.len(), 23);
        assert!(!event.properties.contains_key("#time"));
    }

    #[tokio::test]
    async fn user_unset_maps_keys_to_zero() {
        let (analytics, consumer) = client();
        analytics
            .user_unset("acct", "", &["a", "b"])
            .await
            .expect("user_unset");

        let event = consumer.last();
        assert_eq!(event.event_type, EventType::UserUnset);
        assert!(matches!(event.properties["a"], PropertyValue::Int(0)));
        assert!(matches!(event.properties["b"], PropertyValue::Int(0)));
    }

    #[tokio::test]
    async fn user_unset_with_no_keys_fails() {
        let (analytics, _) = client();
        assert!(matches!(
            analytics.user_unset("acct", "", &[]).await,
            Err(AnalyticsError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn user_add_rejects_non_numeric_values() {
        let (analytics, _) = client();
        let mut props = Properties::new();
        props.insert("amount".to_string(), PropertyValue::from("ten"));
        assert!(matches!(
            analytics.user_add("acct", "", props).await,
            Err(AnalyticsError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn stringent_consumer_rejects_bad_keys_lenient_accepts() {
        let lenient = Arc::new(CapturingConsumer::default());
        let stringent = Arc::new(CapturingConsumer::stringent());

        let mut props = Properties::new();
        props.insert("bad-key".to_string(), PropertyValue::from(1i64));

        assert!(Analytics::new(lenient)
            .track("acct", "", "signup", props.clone())
            .await
            .is_ok());
        assert!(Analytics::new(stringent)
            .track("acct", "", "signup", props)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn track_first_requires_and_sets_first_check_id() {
        let (analytics, consumer) = client();
        assert!(analytics
            .track_first("acct", "", "install", "", Properties::new())
            .await
            .is_err());

        analytics
            .track_first("acct", "", "install", "device-1", Properties::new())
            .await
            .expect("tracked");
        let event = consumer.last();
        assert_eq!(event.event_type, EventType::Track);
        assert_eq!(event.first_check_id, "device-1");
        assert!(!event.properties.contains_key("#first_check_id"));
    }

    #[tokio::test]
    async fn user_delete_needs_no_properties() {
        let (analytics, consumer) = client();
        analytics.user_delete("acct", "").await.expect("deleted");
        assert_eq!(consumer.last().event_type, EventType::UserDelete);
    }

    #[test]
    fn clear_super_properties_empties_the_map() {
        let (analytics, _) = client();
        let mut statics = Properties::new();
        statics.insert("channel".to_string(), PropertyValue::from("static"));
        analytics.set_super_properties(statics);
        assert_eq!(analytics.get_super_properties().len(), 1);

        analytics.clear_super_properties();
        assert!(analytics.get_super_properties().is_empty());
    }
}
