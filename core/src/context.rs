//! Ambient per-call context supplied by the caller's execution environment.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::trace::TraceCollector;

/// Capabilities and propagated values attached to one call.
///
/// Every part is optional. A missing trace collector simply means no trace
/// hooks run; an empty RPC context means no extra headers.
#[derive(Clone, Default)]
pub struct RequestContext {
    trace: Option<Arc<dyn TraceCollector>>,
    rpc: Map<String, Value>,
    shadow: bool,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(mut self, collector: Arc<dyn TraceCollector>) -> Self {
        self.trace = Some(collector);
        self
    }

    /// Snapshot of RPC-context pairs forwarded as headers.
    pub fn with_rpc_context(mut self, pairs: Map<String, Value>) -> Self {
        self.rpc = pairs;
        self
    }

    pub fn with_rpc_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.rpc.insert(key.into(), value.into());
        self
    }

    /// Flags the call as mirrored test traffic. Only honoured for proxied requests.
    pub fn shadow_traffic(mut self, shadow: bool) -> Self {
        self.shadow = shadow;
        self
    }

    pub fn trace(&self) -> Option<&Arc<dyn TraceCollector>> {
        self.trace.as_ref()
    }

    pub fn rpc_context(&self) -> &Map<String, Value> {
        &self.rpc
    }

    pub fn is_shadow(&self) -> bool {
        self.shadow
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("trace", &self.trace.is_some())
            .field("rpc", &self.rpc)
            .field("shadow", &self.shadow)
            .finish()
    }
}
