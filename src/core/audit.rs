use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::config::AuditConfig;

/// What an audit event records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditKind {
    /// A request was rejected by the window limiter
    Violation { scope: String },
    /// An identity was blocked
    Block { violations: u64, block_secs: u64 },
}

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub identity: String,
    pub endpoint: String,
    #[serde(flatten)]
    pub kind: AuditKind,
}

impl AuditEvent {
    pub fn violation(identity: &str, endpoint: &str, scope: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            identity: identity.to_string(),
            endpoint: endpoint.to_string(),
            kind: AuditKind::Violation {
                scope: scope.to_string(),
            },
        }
    }

    pub fn block(identity: &str, endpoint: &str, violations: u64, duration: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            identity: identity.to_string(),
            endpoint: endpoint.to_string(),
            kind: AuditKind::Block {
                violations,
                block_secs: duration.as_secs(),
            },
        }
    }
}

/// Best-effort, append-only record of violations and blocks
///
/// [`AuditSink::record`] never blocks and never fails: events are queued for a
/// background writer and dropped with a warning when the queue is full. Every
/// event is also emitted through `tracing`. Cloning the sink is cheap; the
/// writer stops once every clone is dropped.
#[derive(Debug, Clone)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditSink {
    /// Start the writer task appending JSON lines to `path`
    pub fn spawn(path: impl Into<PathBuf>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = tokio::spawn(write_events(path.into(), rx));
        (Self { tx: Some(tx) }, writer)
    }

    /// Build the sink described by the configuration
    pub fn from_config(config: &AuditConfig) -> (Self, Option<JoinHandle<()>>) {
        if config.enabled {
            let (sink, writer) = Self::spawn(&config.path, config.queue_capacity);
            (sink, Some(writer))
        } else {
            (Self::disabled(), None)
        }
    }

    /// A sink that only logs through `tracing`
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, event: AuditEvent) {
        match &event.kind {
            AuditKind::Violation { scope } => tracing::warn!(
                identity = %event.identity,
                endpoint = %event.endpoint,
                scope = %scope,
                "Rate limit exceeded"
            ),
            AuditKind::Block { violations, block_secs } => tracing::warn!(
                identity = %event.identity,
                endpoint = %event.endpoint,
                violations = violations,
                block_secs = block_secs,
                "IP blocked after repeated violations"
            ),
        }

        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(identity = %event.identity, "Audit queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!("Audit writer has stopped, dropping event");
            }
        }
    }
}

async fn write_events(path: PathBuf, mut rx: mpsc::Receiver<AuditEvent>) {
    let mut file: Option<File> = None;

    while let Some(event) = rx.recv().await {
        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit event");
                continue;
            }
        };
        line.push('\n');

        if file.is_none() {
            match OpenOptions::new().create(true).append(true).open(&path).await {
                Ok(opened) => file = Some(opened),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to open audit log");
                    continue;
                }
            }
        }

        if let Some(handle) = file.as_mut() {
            let written = match handle.write_all(line.as_bytes()).await {
                Ok(()) => handle.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                tracing::error!(path = %path.display(), error = %e, "Failed to write audit log");
                // Reopen on the next event.
                file = None;
            }
        }
    }

    tracing::debug!(path = %path.display(), "Audit writer stopped");
}
