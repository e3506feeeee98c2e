//! Optional hooks into a distributed-trace collector.
//!
//! Collector failures are isolated: an error or a panic inside a collector is
//! logged and swallowed so it can never hold up the completion callback.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::warn;
use serde_json::Value;

use crate::error::TraceError;

/// Transaction kind used for outbound HTTP calls.
pub const HTTP_CALL: &str = "HTTP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStatus {
    Success,
    Error,
    Warn,
}

/// Opaque id of an open transaction, issued by the collector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceHandle(pub String);

/// External trace/transaction collector.
pub trait TraceCollector: Send + Sync {
    /// Header name and value that correlate the downstream call with the
    /// current trace.
    fn correlation_key(&self) -> Option<(String, String)> {
        None
    }

    fn transaction_begin(&self, kind: &str, name: &str, detail: &Value)
        -> Result<TraceHandle, TraceError>;

    fn log_event(&self, _kind: &str, _status: TraceStatus, _detail: &Value) -> Result<(), TraceError> {
        Ok(())
    }

    fn commit(&self, handle: &TraceHandle, status: TraceStatus, detail: &Value)
        -> Result<(), TraceError>;
}

/// One open transaction for one request.
pub(crate) struct TraceSpan {
    collector: Arc<dyn TraceCollector>,
    handle: Option<TraceHandle>,
}

impl TraceSpan {
    pub(crate) fn begin(collector: Arc<dyn TraceCollector>, name: &str, detail: &Value) -> Self {
        let handle = isolate("trace begin", || {
            collector.transaction_begin(HTTP_CALL, name, detail)
        });
        Self { collector, handle }
    }

    pub(crate) fn event(&self, kind: &str, status: TraceStatus, detail: &Value) {
        isolate("trace event", || self.collector.log_event(kind, status, detail));
    }

    pub(crate) fn commit(&self, status: TraceStatus, detail: &Value) {
        if let Some(handle) = &self.handle {
            isolate("trace commit", || self.collector.commit(handle, status, detail));
        }
    }
}

impl fmt::Debug for TraceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSpan")
            .field("handle", &self.handle)
            .finish()
    }
}

fn isolate<T>(what: &str, call: impl FnOnce() -> Result<T, TraceError>) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!("{what} failed: {e}");
            None
        }
        Err(_) => {
            warn!("{what} panicked inside the trace collector");
            None
        }
    }
}
