// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # analytics-events
//!
//! Client-side delivery SDK for structured analytics events. Application
//! code reports user actions and user-profile updates through the
//! [`Analytics`] façade; a pluggable [`Consumer`] backend moves the
//! resulting envelopes to a remote collector or to local files for an
//! out-of-band shipper.
//!
//! ## Backends
//!
//! - [`BatchConsumer`]: buffers envelopes, cuts them into batches, and
//!   ships JSON arrays over HTTP with gzip, bounded retries and a bounded
//!   FIFO spillover cache that preserves batch order across transient
//!   outages.
//! - [`DebugConsumer`]: posts one envelope at a time with strict
//!   validation, surfacing the collector's verdict immediately. Intended
//!   for integration testing.
//! - [`LogConsumer`]: appends newline-delimited JSON to size- and
//!   wall-clock-rotated files, written by a single task that owns the
//!   file handle.
//!
//! ## Delivery semantics
//!
//! At-least-once towards the collector while the spillover cache has
//! capacity; the oldest batch is dropped (and the loss logged) when the
//! collector stays unreachable long enough to fill it. Permanent server
//! rejections are surfaced as [`AnalyticsError::Rejected`] and never
//! retried.

mod batch;
mod client;
mod consumer;
mod debug;
mod error;
mod event;
mod intake;
mod logfile;
mod validation;

pub use batch::{BatchConfig, BatchConsumer, DeliveryMode};
pub use client::Analytics;
pub use consumer::Consumer;
pub use debug::DebugConsumer;
pub use error::{AnalyticsError, RejectionReason};
pub use event::{Event, EventType, Properties, PropertyValue};
pub use logfile::{LogConfig, LogConsumer, RotateMode};

/// Reported as `#lib` on every track event.
pub(crate) const LIB_NAME: &str = "Rust";
/// Reported as `#lib_version` and in intake headers.
pub(crate) const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
/// `user-agent` presented to the collector.
pub(crate) const SDK_USER_AGENT: &str = "analytics-events-sdk";
