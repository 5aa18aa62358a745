// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writes events to rotated local files for an out-of-band shipper.

use std::sync::Arc;

use analytics_events::{Analytics, LogConfig, LogConsumer, Properties, PropertyValue, RotateMode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let config = LogConfig {
        file_size_mb: 128,
        file_name_prefix: "events".to_string(),
        ..LogConfig::new("./event-logs", RotateMode::Daily)
    };
    let analytics = Analytics::new(Arc::new(LogConsumer::new(config).await?));

    for i in 0..100 {
        let mut properties = Properties::new();
        properties.insert("index".to_string(), PropertyValue::from(i));
        analytics
            .track("", &format!("visitor-{i}"), "heartbeat", properties)
            .await?;
    }

    analytics.close().await?;
    Ok(())
}
