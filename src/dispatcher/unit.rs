//! Per-request execution unit

use std::sync::Arc;

use tracing::{error, info};

use crate::events::{Event, EventSink, Status};
use crate::Error;

/// Detail sent when a unit is dropped without finishing
pub const ABORTED_DETAIL: &str = "operation ended without reporting a result";

/// Owns the event stream of one request.
///
/// `succeed` and `fail` consume the unit, so at most one terminal event can be
/// sent. Dropping an unfinished unit (early return, panic in the handler)
/// sends a Failed event instead, so there is always exactly one.
pub struct OperationUnit {
    id: String,
    operation: String,
    sink: Arc<dyn EventSink>,
    finished: bool,
}

impl OperationUnit {
    /// Open the stream for request `id`
    pub fn new(id: impl Into<String>, operation: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            id: id.into(),
            operation: operation.into(),
            sink,
            finished: false,
        }
    }

    /// Request id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send a non-terminal status update
    pub fn progress(&self, subject: &str, status: Status, details: impl Into<String>) {
        self.sink.send(Event::progress(
            &self.id,
            format!("{subject} {status}"),
            details,
        ));
    }

    /// Terminal success
    pub fn succeed(mut self, subject: &str, status: Status, details: impl Into<String>) {
        self.finished = true;
        info!(operation_id = %self.id, operation = %self.operation, %status, "operation succeeded");
        self.sink.send(Event::succeeded(
            &self.id,
            format!("{subject} {status} successfully"),
            details,
        ));
    }

    /// Terminal failure carrying the error text as detail
    pub fn fail(mut self, summary: impl Into<String>, err: &Error) {
        self.finished = true;
        error!(operation_id = %self.id, operation = %self.operation, error = %err, "operation failed");
        self.sink.send(Event::failed(&self.id, summary, err.to_string()));
    }
}

impl Drop for OperationUnit {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        error!(operation_id = %self.id, operation = %self.operation, "operation unit dropped without result");
        self.sink.send(Event::failed(
            &self.id,
            format!("Error while running {}", self.operation),
            ABORTED_DETAIL,
        ));
    }
}
