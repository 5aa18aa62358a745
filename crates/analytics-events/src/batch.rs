// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching backend: active buffer, spillover cache, bounded-retry upload.
//!
//! Envelopes accumulate in an in-memory buffer until `batch_size` is
//! reached, then are cut into an immutable batch and queued in a bounded
//! FIFO spillover cache awaiting acknowledgment from the collector. The
//! cache is consumed strictly head-first, so batch order survives transient
//! outages; when the cache overflows its capacity the oldest batch is
//! dropped and the loss is logged.
//!
//! Buffer and cache live behind a single lock. Upload runs with the state
//! held, which serializes concurrent flush paths and keeps head-of-line
//! bookkeeping trivially correct.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::consumer::Consumer;
use crate::error::{AnalyticsError, RejectionReason};
use crate::event::Event;
use crate::intake::{BatchSender, IntakeClient};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_BATCH_SIZE: usize = 20;
const MAX_BATCH_SIZE: usize = 200;
const DEFAULT_INTERVAL_SECS: u64 = 30;
const DEFAULT_CACHE_CAPACITY: usize = 50;
const MAX_UPLOAD_ATTEMPTS: u32 = 3;

/// What `add` does once a flush is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// `add` awaits delivery and returns its error.
    #[default]
    Sync,
    /// `add` spawns delivery in the background and returns immediately;
    /// delivery errors are logged.
    Async,
}

/// Configuration for [`BatchConsumer`]. Zero means "use the default" for
/// the numeric knobs.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Collector base URL. Required; the intake path is appended.
    pub server_url: String,
    /// Project app id, sent as the `appid` header.
    pub app_id: String,
    /// Events per batch, capped at 200. Default 20.
    pub batch_size: usize,
    /// Per-request timeout in milliseconds. Default 30000.
    pub timeout_ms: u64,
    /// Gzip request bodies. Default true.
    pub compress: bool,
    /// Spawn a background task that flushes every `interval_secs`.
    pub auto_flush: bool,
    /// Auto-flush period in seconds. Default 30.
    pub interval_secs: u64,
    /// Maximum batches held while the collector is unreachable. Default 50.
    pub cache_capacity: usize,
    /// Delivery semantics chosen at construction.
    pub delivery: DeliveryMode,
}

impl BatchConfig {
    pub fn new(server_url: impl Into<String>, app_id: impl Into<String>) -> Self {
        BatchConfig {
            server_url: server_url.into(),
            app_id: app_id.into(),
            ..Default::default()
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            server_url: String::new(),
            app_id: String::new(),
            batch_size: 0,
            timeout_ms: 0,
            compress: true,
            auto_flush: false,
            interval_secs: 0,
            cache_capacity: 0,
            delivery: DeliveryMode::Sync,
        }
    }
}

struct BatchState {
    /// Not-yet-cut envelopes, in arrival order.
    buffer: Vec<Event>,
    /// Cut batches awaiting acknowledgment, consumed head-first.
    cache: VecDeque<Vec<Event>>,
}

struct Inner {
    sender: Box<dyn BatchSender>,
    state: Mutex<BatchState>,
    batch_size: usize,
    cache_capacity: usize,
    delivery: DeliveryMode,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// Batching consumer shipping JSON arrays of envelopes to the collector.
#[derive(Clone)]
pub struct BatchConsumer {
    inner: Arc<Inner>,
}

impl BatchConsumer {
    /// Builds the consumer and, when configured, starts the auto-flush
    /// task. Must be called within a tokio runtime.
    pub fn new(config: BatchConfig) -> Result<Self, AnalyticsError> {
        let timeout = Duration::from_millis(resolve(config.timeout_ms, DEFAULT_TIMEOUT_MS));
        let sender = IntakeClient::new(
            &config.server_url,
            &config.app_id,
            config.compress,
            timeout,
        )?;
        Self::with_sender(config, Box::new(sender))
    }

    pub(crate) fn with_sender(
        config: BatchConfig,
        sender: Box<dyn BatchSender>,
    ) -> Result<Self, AnalyticsError> {
        let batch_size =
            resolve(config.batch_size, DEFAULT_BATCH_SIZE).min(MAX_BATCH_SIZE);
        let cache_capacity = resolve(config.cache_capacity, DEFAULT_CACHE_CAPACITY);

        let consumer = BatchConsumer {
            inner: Arc::new(Inner {
                sender,
                state: Mutex::new(BatchState {
                    buffer: Vec::with_capacity(batch_size),
                    cache: VecDeque::with_capacity(cache_capacity),
                }),
                batch_size,
                cache_capacity,
                delivery: config.delivery,
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        };

        if config.auto_flush {
            let interval_secs = resolve(config.interval_secs, DEFAULT_INTERVAL_SECS);
            consumer.spawn_auto_flush(Duration::from_secs(interval_secs));
        }

        Ok(consumer)
    }

    fn spawn_auto_flush(&self, period: Duration) {
        let consumer = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; skip it so the cadence
            // starts one period after construction.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = consumer.flush().await {
                            warn!("periodic flush failed: {e}");
                        }
                    }
                }
            }
            debug!("auto-flush task stopped");
        });
    }

    /// Drains buffer and cache completely. Permanent server rejections are
    /// logged and skipped so a sustained rejection cannot wedge shutdown;
    /// transport failures propagate immediately.
    pub async fn flush_all(&self) -> Result<(), AnalyticsError> {
        loop {
            {
                let state = self.inner.state.lock().await;
                if state.buffer.is_empty() && state.cache.is_empty() {
                    return Ok(());
                }
            }
            if let Err(e) = self.flush_inner().await {
                if e.is_rejection() {
                    warn!("dropping batch rejected by the collector: {e}");
                } else {
                    return Err(e);
                }
            }
        }
    }

    async fn flush_inner(&self) -> Result<(), AnalyticsError> {
        let mut state = self.inner.state.lock().await;
        if state.buffer.is_empty() && state.cache.is_empty() {
            return Ok(());
        }

        if state.cache.is_empty() || state.buffer.len() >= self.inner.batch_size {
            let batch = std::mem::replace(
                &mut state.buffer,
                Vec::with_capacity(self.inner.batch_size),
            );
            state.cache.push_back(batch);
        }

        let result = self.upload_head(&mut state).await;

        if state.cache.len() > self.inner.cache_capacity {
            state.cache.pop_front();
            warn!(
                "spillover cache exceeded capacity {}, dropping oldest batch",
                self.inner.cache_capacity
            );
        }

        result
    }

    /// Ships the cache head. Transport failures are retried up to
    /// [`MAX_UPLOAD_ATTEMPTS`] and leave the head in place; any response
    /// from the collector settles the batch, so the head is popped and a
    /// non-zero code (or a non-200 status) becomes a permanent rejection.
    async fn upload_head(&self, state: &mut BatchState) -> Result<(), AnalyticsError> {
        let Some(head) = state.cache.front() else {
            return Ok(());
        };
        let count = head.len();
        let body = serde_json::to_vec(head)
            .map_err(|e| AnalyticsError::InvalidData(format!("failed to serialize batch: {e}")))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.sender.send(body.clone(), count).await {
                Ok(response) => {
                    state.cache.pop_front();
                    if response.status == StatusCode::OK {
                        return match response.code {
                            0 => Ok(()),
                            code => Err(AnalyticsError::Rejected(RejectionReason::from_code(
                                code,
                            ))),
                        };
                    }
                    return Err(AnalyticsError::Rejected(RejectionReason::Unknown));
                }
                Err(e) => {
                    if attempt >= MAX_UPLOAD_ATTEMPTS {
                        return Err(e);
                    }
                    debug!("upload attempt {attempt} failed, retrying: {e}");
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn depths(&self) -> (usize, usize) {
        let state = self.inner.state.lock().await;
        (state.buffer.len(), state.cache.len())
    }

    #[cfg(test)]
    pub(crate) async fn cache_head_names(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        state
            .cache
            .front()
            .map(|batch| batch.iter().map(|e| e.event_name.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Consumer for BatchConsumer {
    async fn add(&self, event: Event) -> Result<(), AnalyticsError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(AnalyticsError::Closed);
        }

        let flush_due = {
            let mut state = self.inner.state.lock().await;
            state.buffer.push(event);
            state.buffer.len() >= self.inner.batch_size || !state.cache.is_empty()
        };

        if flush_due {
            match self.inner.delivery {
                DeliveryMode::Sync => self.flush_inner().await?,
                DeliveryMode::Async => {
                    let consumer = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = consumer.flush_inner().await {
                            error!("background delivery failed: {e}");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), AnalyticsError> {
        self.flush_inner().await
    }

    async fn close(&self) -> Result<(), AnalyticsError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(AnalyticsError::Closed);
        }
        self.inner.shutdown.cancel();
        self.flush_all().await
    }
}

fn resolve<T: PartialEq + From<u8>>(configured: T, default: T) -> T {
    if configured == T::from(0) {
        default
    } else {
        configured
    }
}
