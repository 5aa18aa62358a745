// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP exchange with the collector's batch intake endpoint.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::error::AnalyticsError;
use crate::{LIB_NAME, SDK_USER_AGENT, SDK_VERSION};

pub(crate) const INTAKE_PATH: &str = "/sync_server";

/// What the collector said about one shipped batch.
///
/// `code` is only meaningful when `status` is 200; a body that fails to
/// parse is reported as code 1 so it classifies as an invalid-data-format
/// rejection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IntakeResponse {
    pub status: StatusCode,
    pub code: i64,
}

/// Seam between batch bookkeeping and the network.
///
/// The production implementation is [`IntakeClient`]; tests script
/// transport failures and response codes through this trait.
#[async_trait]
pub(crate) trait BatchSender: Send + Sync {
    async fn send(&self, body: Vec<u8>, count: usize) -> Result<IntakeResponse, AnalyticsError>;
}

/// `reqwest`-backed sender for the batch intake endpoint.
pub(crate) struct IntakeClient {
    client: reqwest::Client,
    endpoint: String,
    app_id: String,
    compress: bool,
    timeout: Duration,
}

impl IntakeClient {
    pub(crate) fn new(
        server_url: &str,
        app_id: &str,
        compress: bool,
        timeout: Duration,
    ) -> Result<Self, AnalyticsError> {
        if server_url.is_empty() {
            return Err(AnalyticsError::InvalidConfig(
                "server url must be provided".to_string(),
            ));
        }
        let mut url = reqwest::Url::parse(server_url)
            .map_err(|e| AnalyticsError::InvalidConfig(format!("invalid server url: {e}")))?;
        url.set_path(INTAKE_PATH);

        Ok(IntakeClient {
            client: reqwest::Client::new(),
            endpoint: url.to_string(),
            app_id: app_id.to_string(),
            compress,
            timeout,
        })
    }
}

#[derive(Deserialize)]
struct IntakeBody {
    #[serde(rename = "code", alias = "Code")]
    code: i64,
}

#[async_trait]
impl BatchSender for IntakeClient {
    async fn send(&self, body: Vec<u8>, count: usize) -> Result<IntakeResponse, AnalyticsError> {
        let (payload, encoding) = if self.compress {
            (gzip(&body)?, "gzip")
        } else {
            (body, "none")
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header("appid", &self.app_id)
            .header("user-agent", SDK_USER_AGENT)
            .header("version", SDK_VERSION)
            .header("compress", encoding)
            .header("TA-Integration-Type", LIB_NAME)
            .header("TA-Integration-Version", SDK_VERSION)
            .header("TA-Integration-Count", count.to_string())
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!("intake returned unexpected status {status}");
            return Ok(IntakeResponse { status, code: -1 });
        }

        let code = match response.json::<IntakeBody>().await {
            Ok(body) => body.code,
            Err(e) => {
                debug!("intake response body did not parse: {e}");
                1
            }
        };
        Ok(IntakeResponse { status, code })
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, AnalyticsError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn endpoint_path_replaces_whatever_the_caller_gave() {
        let client = IntakeClient::new(
            "https://collector.example.com/anything",
            "app",
            true,
            Duration::from_secs(30),
        )
        .expect("client");
        assert_eq!(client.endpoint, "https://collector.example.com/sync_server");
    }

    #[test]
    fn empty_and_malformed_urls_are_config_errors() {
        assert!(matches!(
            IntakeClient::new("", "app", true, Duration::from_secs(30)),
            Err(AnalyticsError::InvalidConfig(_))
        ));
        assert!(matches!(
            IntakeClient::new("not a url", "app", true, Duration::from_secs(30)),
            Err(AnalyticsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn gzip_round_trips() {
        let compressed = gzip(b"[{\"#type\":\"track\"}]").expect("gzip");
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut out = String::new();
        decoder.read_to_string(&mut out).expect("gunzip");
        assert_eq!(out, "[{\"#type\":\"track\"}]");
    }
}
