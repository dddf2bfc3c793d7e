//! Operation status events.
//!
//! Every lifecycle request produces a stream of [`Event`]s that ends with
//! exactly one terminal event. Sinks are fire-and-forget: a sink that can no
//! longer deliver (receiver gone) logs and drops the event, it never fails the
//! operation that produced it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Status vocabulary shared by every handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Install in progress
    Installing,
    /// Uninstall in progress
    Removing,
    /// Install finished
    Installed,
    /// Uninstall finished
    Removed,
    /// Test suite in progress
    Running,
    /// Test suite finished
    Completed,
    /// Manifest apply in progress
    Deploying,
    /// Manifest apply finished
    Deployed,
}

impl Status {
    /// In-progress status for an install (`delete = false`) or removal
    pub fn in_progress(delete: bool) -> Self {
        if delete {
            Self::Removing
        } else {
            Self::Installing
        }
    }

    /// Finished status for an install (`delete = false`) or removal
    pub fn finished(delete: bool) -> Self {
        if delete {
            Self::Removed
        } else {
            Self::Installed
        }
    }

    /// Lowercase word used in human-readable summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::Removing => "removing",
            Self::Installed => "installed",
            Self::Removed => "removed",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an event reports progress, success or failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Intermediate progress (never terminal)
    Progress,
    /// Terminal success
    Succeeded,
    /// Terminal failure
    Failed,
}

/// A status update for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Request (operation) id this event belongs to
    pub operation_id: String,
    /// Short summary, e.g. "OSM service mesh installed successfully"
    pub summary: String,
    /// Free-text detail (error text for failures)
    pub details: String,
    /// Progress or terminal outcome
    pub kind: EventKind,
}

impl Event {
    /// Intermediate progress event
    pub fn progress(
        operation_id: impl Into<String>,
        summary: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            summary: summary.into(),
            details: details.into(),
            kind: EventKind::Progress,
        }
    }

    /// Terminal success event
    pub fn succeeded(
        operation_id: impl Into<String>,
        summary: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            summary: summary.into(),
            details: details.into(),
            kind: EventKind::Succeeded,
        }
    }

    /// Terminal failure event
    pub fn failed(
        operation_id: impl Into<String>,
        summary: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            summary: summary.into(),
            details: details.into(),
            kind: EventKind::Failed,
        }
    }

    /// Whether this event closes the request's lifecycle
    pub fn is_terminal(&self) -> bool {
        self.kind != EventKind::Progress
    }
}

/// Destination for status events
///
/// `send` is synchronous so it can be called from `Drop`.
pub trait EventSink: Send + Sync {
    /// Deliver one event (fire-and-forget)
    fn send(&self, event: Event);
}

/// Event sink backed by an unbounded Tokio channel
#[derive(Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: Event) {
        debug!(
            operation_id = %event.operation_id,
            summary = %event.summary,
            kind = ?event.kind,
            "streaming event"
        );
        if self.tx.send(event).is_err() {
            warn!("event receiver dropped, discarding event");
        }
    }
}

/// Create a connected sink/receiver pair
pub fn event_channel() -> (ChannelEventSink, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelEventSink { tx }, rx)
}

/// Sink that only logs, used when nobody consumes the stream
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn send(&self, event: Event) {
        match event.kind {
            EventKind::Failed => warn!(
                operation_id = %event.operation_id,
                details = %event.details,
                "{}",
                event.summary
            ),
            _ => tracing::info!(
                operation_id = %event.operation_id,
                details = %event.details,
                "{}",
                event.summary
            ),
        }
    }
}
