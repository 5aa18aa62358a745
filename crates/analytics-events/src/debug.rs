// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Debug backend: synchronous one-event-at-a-time delivery with strict
//! validation, meant for integration testing against a live collector.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error};

use crate::consumer::Consumer;
use crate::error::{AnalyticsError, RejectionReason};
use crate::event::Event;

const DEBUG_PATH: &str = "/data_debug";

/// Unbuffered consumer posting every envelope on its own to the debug
/// receiver, which validates it field by field. The receiver's verdict is
/// surfaced to the caller immediately.
pub struct DebugConsumer {
    client: reqwest::Client,
    endpoint: String,
    app_id: String,
    /// When false the receiver validates but does not persist (`dryRun`).
    write_data: bool,
    device_id: Option<String>,
    closed: AtomicBool,
}

#[derive(Deserialize)]
struct DebugResponse {
    #[serde(rename = "errorLevel")]
    error_level: i64,
}

impl DebugConsumer {
    pub fn new(server_url: &str, app_id: &str) -> Result<Self, AnalyticsError> {
        Self::with_options(server_url, app_id, true, None)
    }

    /// `write_data = false` asks the receiver to validate without
    /// persisting; `device_id` ties uploads to a debug device in the
    /// collector UI.
    pub fn with_options(
        server_url: &str,
        app_id: &str,
        write_data: bool,
        device_id: Option<String>,
    ) -> Result<Self, AnalyticsError> {
        if server_url.is_empty() {
            return Err(AnalyticsError::InvalidConfig(
                "server url must be provided".to_string(),
            ));
        }
        let mut url = reqwest::Url::parse(server_url)
            .map_err(|e| AnalyticsError::InvalidConfig(format!("invalid server url: {e}")))?;
        url.set_path(DEBUG_PATH);

        debug!("debug consumer targeting {url}, app id {app_id}");

        Ok(DebugConsumer {
            client: reqwest::Client::new(),
            endpoint: url.to_string(),
            app_id: app_id.to_string(),
            write_data,
            device_id,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Consumer for DebugConsumer {
    async fn add(&self, event: Event) -> Result<(), AnalyticsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AnalyticsError::Closed);
        }

        let data = serde_json::to_string(&event)
            .map_err(|e| AnalyticsError::InvalidData(format!("failed to serialize event: {e}")))?;
        debug!("{data}");

        let dry_run = if self.write_data { "0" } else { "1" };
        let mut form = vec![
            ("data", data),
            ("appid", self.app_id.clone()),
            ("source", "server".to_string()),
            ("dryRun", dry_run.to_string()),
        ];
        if let Some(device_id) = &self.device_id {
            form.push(("deviceId", device_id.clone()));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            error!("debug receiver returned status {}", response.status());
            return Err(AnalyticsError::Rejected(RejectionReason::Unknown));
        }

        let body = response.json::<DebugResponse>().await?;
        if body.error_level != 0 {
            error!("debug receiver rejected event, error level {}", body.error_level);
            return Err(AnalyticsError::Rejected(RejectionReason::ErrorLevel(
                body.error_level,
            )));
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), AnalyticsError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AnalyticsError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(AnalyticsError::Closed);
        }
        debug!("debug consumer closed");
        Ok(())
    }

    fn is_stringent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_server_url() {
        assert!(matches!(
            DebugConsumer::new("", "app"),
            Err(AnalyticsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn endpoint_uses_debug_path() {
        let consumer = DebugConsumer::new("https://collector.example.com", "app").unwrap();
        assert_eq!(consumer.endpoint, "https://collector.example.com/data_debug");
        assert!(consumer.is_stringent());
    }

    #[tokio::test]
    async fn close_twice_reports_already_closed() {
        let consumer = DebugConsumer::new("https://collector.example.com", "app").unwrap();
        consumer.close().await.expect("first close");
        assert!(matches!(
            consumer.close().await,
            Err(AnalyticsError::Closed)
        ));
    }
}
