// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log backend: newline-delimited JSON files with wall-clock and size
//! based rotation, written by a single task that owns the file handle.
//!
//! Producers serialize the envelope at the call site and hand the line to a
//! bounded channel; a full channel blocks the producer rather than dropping
//! data. The writer task is the only code touching the file, so rotation
//! needs no locking. Flush and shutdown travel through the same channel as
//! commands, which keeps them ordered after every line accepted before them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Local;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::consumer::Consumer;
use crate::error::AnalyticsError;
use crate::event::Event;

const DEFAULT_CHANNEL_SIZE: usize = 1000;

/// Wall-clock bucket that names the active file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateMode {
    Daily,
    Hourly,
}

impl RotateMode {
    fn key_format(self) -> &'static str {
        match self {
            RotateMode::Daily => "%Y-%m-%d",
            RotateMode::Hourly => "%Y-%m-%d-%H",
        }
    }
}

/// Configuration for [`LogConsumer`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Target directory, created when absent.
    pub directory: PathBuf,
    pub rotate_mode: RotateMode,
    /// Maximum file size in megabytes; 0 disables size-based rotation.
    pub file_size_mb: u64,
    /// Optional file name prefix (`{prefix}.log.{key}`).
    pub file_name_prefix: String,
    /// Bounded channel capacity between producers and the writer.
    /// Default 1000.
    pub channel_size: usize,
}

impl LogConfig {
    pub fn new(directory: impl Into<PathBuf>, rotate_mode: RotateMode) -> Self {
        LogConfig {
            directory: directory.into(),
            rotate_mode,
            file_size_mb: 0,
            file_name_prefix: String::new(),
            channel_size: 0,
        }
    }
}

enum WriterCommand {
    Write(String),
    Flush(oneshot::Sender<std::io::Result<()>>),
    Shutdown(oneshot::Sender<std::io::Result<()>>),
}

/// File-writing consumer for out-of-band log shipping.
pub struct LogConsumer {
    tx: mpsc::Sender<WriterCommand>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl LogConsumer {
    /// Creates the directory when needed, opens the initial file for the
    /// current rotation key and starts the writer task.
    pub async fn new(config: LogConfig) -> Result<Self, AnalyticsError> {
        let channel_size = if config.channel_size == 0 {
            DEFAULT_CHANNEL_SIZE
        } else {
            config.channel_size
        };

        let writer = RotatingFileWriter::open(
            config.directory,
            config.rotate_mode,
            config.file_size_mb * 1024 * 1024,
            config.file_name_prefix,
        )
        .await?;

        let (tx, rx) = mpsc::channel(channel_size);
        let writer_handle = tokio::spawn(writer.run(rx));

        Ok(LogConsumer {
            tx,
            writer_handle: Mutex::new(Some(writer_handle)),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Consumer for LogConsumer {
    async fn add(&self, event: Event) -> Result<(), AnalyticsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AnalyticsError::Closed);
        }
        let line = serde_json::to_string(&event)
            .map_err(|e| AnalyticsError::InvalidData(format!("failed to serialize event: {e}")))?;
        // Blocks when the channel is full: backpressure, not loss.
        self.tx
            .send(WriterCommand::Write(line))
            .await
            .map_err(|_| AnalyticsError::Closed)
    }

    async fn flush(&self) -> Result<(), AnalyticsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AnalyticsError::Closed);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(ack_tx))
            .await
            .map_err(|_| AnalyticsError::Closed)?;
        match ack_rx.await {
            Ok(result) => result.map_err(AnalyticsError::Io),
            Err(_) => Err(AnalyticsError::Closed),
        }
    }

    async fn close(&self) -> Result<(), AnalyticsError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(AnalyticsError::Closed);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Shutdown(ack_tx))
            .await
            .map_err(|_| AnalyticsError::Closed)?;
        let result = match ack_rx.await {
            Ok(result) => result.map_err(AnalyticsError::Io),
            Err(_) => Err(AnalyticsError::Closed),
        };
        if let Some(handle) = self.writer_handle.lock().await.take() {
            let _ = handle.await;
        }
        result
    }
}

/// Owns the open file, the current rotation key and the page index.
/// Only the writer task ever touches it.
pub(crate) struct RotatingFileWriter {
    directory: PathBuf,
    rotate_mode: RotateMode,
    /// Size threshold in bytes; 0 disables size-based rotation.
    max_file_size: u64,
    prefix: String,
    file: File,
    rotation_key: String,
    page: u32,
    written: u64,
}

impl RotatingFileWriter {
    pub(crate) async fn open(
        directory: PathBuf,
        rotate_mode: RotateMode,
        max_file_size: u64,
        prefix: String,
    ) -> Result<Self, AnalyticsError> {
        tokio::fs::create_dir_all(&directory).await?;
        let rotation_key = Local::now().format(rotate_mode.key_format()).to_string();
        let path = file_path(&directory, &prefix, max_file_size, &rotation_key, 0);
        let (file, written) = open_append(&path).await?;
        Ok(RotatingFileWriter {
            directory,
            rotate_mode,
            max_file_size,
            prefix,
            file,
            rotation_key,
            page: 0,
            written,
        })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<WriterCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                WriterCommand::Write(line) => {
                    // Delivery errors never reach producers; log and move on.
                    if let Err(e) = self.write_line(&line).await {
                        error!("failed to write event to log file: {e}");
                    }
                }
                WriterCommand::Flush(ack) => {
                    let _ = ack.send(self.file.sync_all().await);
                }
                WriterCommand::Shutdown(ack) => {
                    let _ = ack.send(self.file.sync_all().await);
                    break;
                }
            }
        }
        debug!("log writer stopped");
    }

    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let key = Local::now().format(self.rotate_mode.key_format()).to_string();
        if key != self.rotation_key {
            // New wall-clock bucket: page numbering restarts with the key.
            self.rotation_key = key;
            self.page = 0;
            self.reopen().await?;
        } else if self.max_file_size > 0 && self.written > self.max_file_size {
            self.page += 1;
            self.reopen().await?;
        }

        self.file.write_all(line.as_bytes()).await?;
        self.file.write_all(b"\n").await?;
        self.written += line.len() as u64 + 1;
        Ok(())
    }

    async fn reopen(&mut self) -> std::io::Result<()> {
        self.file.sync_all().await?;
        let path = file_path(
            &self.directory,
            &self.prefix,
            self.max_file_size,
            &self.rotation_key,
            self.page,
        );
        let (file, written) = open_append(&path).await?;
        self.file = file;
        self.written = written;
        Ok(())
    }
}

fn file_path(
    directory: &Path,
    prefix: &str,
    max_file_size: u64,
    rotation_key: &str,
    page: u32,
) -> PathBuf {
    let prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}.")
    };
    let name = if max_file_size > 0 {
        format!("{prefix}log.{rotation_key}_{page}")
    } else {
        format!("{prefix}log.{rotation_key}")
    };
    directory.join(name)
}

async fn open_append(path: &Path) -> std::io::Result<(File, u64)> {
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}
