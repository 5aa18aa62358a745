// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The event envelope and its typed property values.
//!
//! Everything the pipeline moves, user actions and user-profile updates
//! alike, is an [`Event`]. Property values are typed ([`PropertyValue`]) so
//! that timestamps render in the collector's fixed wire format at
//! serialization time, at any nesting depth, instead of being patched up
//! afterwards.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

/// Wire format for every timestamp the collector sees.
pub(crate) const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Kind of record being reported.
///
/// Wire names are fixed by the collector protocol; `serde` renames carry
/// them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    #[serde(rename = "track")]
    Track,
    #[serde(rename = "track_update")]
    TrackUpdate,
    #[serde(rename = "track_overwrite")]
    TrackOverwrite,
    #[serde(rename = "user_set")]
    UserSet,
    #[serde(rename = "user_unset")]
    UserUnset,
    #[serde(rename = "user_setOnce")]
    UserSetOnce,
    #[serde(rename = "user_add")]
    UserAdd,
    #[serde(rename = "user_append")]
    UserAppend,
    #[serde(rename = "user_uniq_append")]
    UserUniqAppend,
    #[serde(rename = "user_del")]
    UserDelete,
}

impl EventType {
    /// True for the track family, which carries an event name.
    pub fn is_track(self) -> bool {
        matches!(
            self,
            EventType::Track | EventType::TrackUpdate | EventType::TrackOverwrite
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Track => "track",
            EventType::TrackUpdate => "track_update",
            EventType::TrackOverwrite => "track_overwrite",
            EventType::UserSet => "user_set",
            EventType::UserUnset => "user_unset",
            EventType::UserSetOnce => "user_setOnce",
            EventType::UserAdd => "user_add",
            EventType::UserAppend => "user_append",
            EventType::UserUniqAppend => "user_uniq_append",
            EventType::UserDelete => "user_del",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed property value.
///
/// Serializes untagged, so the wire sees plain JSON scalars, arrays and
/// objects. `Timestamp` is the reason this enum exists: it renders as
/// `YYYY-MM-DD HH:MM:SS.mmm` wherever it appears, including inside lists
/// and nested maps.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(#[serde(serialize_with = "serialize_wire_time")] DateTime<Local>),
    List(Vec<PropertyValue>),
    Map(HashMap<String, PropertyValue>),
    /// Opaque structured value supplied by the caller, passed through as-is.
    Json(serde_json::Value),
}

fn serialize_wire_time<S>(time: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&time.format(WIRE_TIME_FORMAT))
}

impl PropertyValue {
    /// `user_add` accepts numeric values only.
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyValue::Int(_) | PropertyValue::Float(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<DateTime<Local>> for PropertyValue {
    fn from(value: DateTime<Local>) -> Self {
        PropertyValue::Timestamp(value)
    }
}

impl From<DateTime<chrono::Utc>> for PropertyValue {
    fn from(value: DateTime<chrono::Utc>) -> Self {
        PropertyValue::Timestamp(value.with_timezone(&Local))
    }
}

impl From<DateTime<chrono::FixedOffset>> for PropertyValue {
    fn from(value: DateTime<chrono::FixedOffset>) -> Self {
        PropertyValue::Timestamp(value.with_timezone(&Local))
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(values: Vec<String>) -> Self {
        PropertyValue::List(values.into_iter().map(PropertyValue::String).collect())
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(values: Vec<PropertyValue>) -> Self {
        PropertyValue::List(values)
    }
}

impl From<HashMap<String, PropertyValue>> for PropertyValue {
    fn from(values: HashMap<String, PropertyValue>) -> Self {
        PropertyValue::Map(values)
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        PropertyValue::Json(value)
    }
}

/// Property bag attached to an event.
pub type Properties = HashMap<String, PropertyValue>;

/// The canonical record moved through every delivery backend.
///
/// Reserved `#`-prefixed property keys have already been extracted into the
/// dedicated fields by the time a backend sees the envelope; empty optional
/// fields are omitted from the wire.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "#account_id", skip_serializing_if = "String::is_empty")]
    pub account_id: String,
    #[serde(rename = "#distinct_id", skip_serializing_if = "String::is_empty")]
    pub distinct_id: String,
    #[serde(rename = "#type")]
    pub event_type: EventType,
    #[serde(rename = "#time")]
    pub time: String,
    #[serde(rename = "#event_name", skip_serializing_if = "String::is_empty")]
    pub event_name: String,
    #[serde(rename = "#event_id", skip_serializing_if = "String::is_empty")]
    pub event_id: String,
    #[serde(rename = "#first_check_id", skip_serializing_if = "String::is_empty")]
    pub first_check_id: String,
    #[serde(rename = "#ip", skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(rename = "#uuid", skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(rename = "#app_id", skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    pub properties: Properties,
}
