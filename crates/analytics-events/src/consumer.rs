// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::error::AnalyticsError;
use crate::event::Event;

/// A delivery backend: accepts validated envelopes and moves them to the
/// collector or to local storage.
///
/// Implementations must tolerate concurrent `add` calls for their whole
/// lifetime. `close` flushes whatever is still buffered and permanently
/// rejects further use.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Accept one envelope for delivery.
    async fn add(&self, event: Event) -> Result<(), AnalyticsError>;

    /// Push buffered data towards its destination immediately.
    async fn flush(&self) -> Result<(), AnalyticsError>;

    /// Flush remaining data and tear the backend down. A second call
    /// reports [`AnalyticsError::Closed`].
    async fn close(&self) -> Result<(), AnalyticsError>;

    /// Whether this backend wants strict key/value validation. Stringent
    /// backends reject malformed keys up front; lenient ones leave that to
    /// the collector.
    fn is_stringent(&self) -> bool {
        false
    }
}
