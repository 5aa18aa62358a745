// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reports a handful of events to a collector through the batching backend.
//!
//! Run with a collector (or any HTTP sink) listening locally:
//! `cargo run --example batch_reporting`

use std::sync::Arc;

use analytics_events::{Analytics, BatchConfig, BatchConsumer, Properties, PropertyValue};
use chrono::Local;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let config = BatchConfig {
        batch_size: 5,
        auto_flush: true,
        interval_secs: 10,
        ..BatchConfig::new("http://localhost:18081", "your-app-id")
    };
    let analytics = Analytics::new(Arc::new(BatchConsumer::new(config)?));

    let mut supers = Properties::new();
    supers.insert("channel".to_string(), PropertyValue::from("demo"));
    analytics.set_super_properties(supers);

    analytics.set_dynamic_super_properties(|| {
        let mut dynamics = Properties::new();
        dynamics.insert("reported_at".to_string(), PropertyValue::from(Local::now()));
        dynamics
    });

    for i in 0..12 {
        let mut properties = Properties::new();
        properties.insert("page".to_string(), PropertyValue::from(format!("/docs/{i}")));
        properties.insert("load_ms".to_string(), PropertyValue::from(35 + i));
        analytics
            .track("account-1", "", "page_view", properties)
            .await?;
    }

    let mut profile = Properties::new();
    profile.insert("plan".to_string(), PropertyValue::from("pro"));
    analytics.user_set("account-1", "", profile).await?;

    analytics.close().await?;
    Ok(())
}
