//! Exactly-once completion of an in-flight request.
//!
//! # Design
//! Five events can end a request: a response, a transport close, the request
//! deadline, a failed lookup and the DNS deadline. They may arrive in any
//! order and from any thread. The caller's callback sits in a `OnceSlot` and
//! is the only completion flag: the first event to take it reports, every
//! later event finds the slot empty and only performs cleanup.
//!
//! Cleanup (cancelling the deadline, releasing the transport) runs from a
//! drop guard, so it also happens when the callback panics. The transport is
//! released after the callback returns, never before.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::{debug, warn};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::context::RequestContext;
use crate::error::{RequestError, RequestMetadata};
use crate::headers;
use crate::http::{Headers, HttpRequest, RawResponse, Response};
use crate::once::OnceSlot;
use crate::request::RequestSpec;
use crate::timer::TimeoutGuard;
use crate::trace::{TraceSpan, TraceStatus};
use crate::transport::Transport;

/// Completion callback: receives exactly one of a response or an error.
pub type Completion = Box<dyn FnOnce(Result<Response, RequestError>) + Send + 'static>;

/// Lifecycle position of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Resolving,
    Sending,
    Completed,
}

/// Events that end a request.
#[derive(Debug)]
pub(crate) enum Terminal {
    Received(RawResponse),
    Closed,
    TimedOut,
    HostNotFound,
    DnsTimedOut,
}

impl Terminal {
    fn name(&self) -> &'static str {
        match self {
            Terminal::Received(_) => "response",
            Terminal::Closed => "close",
            Terminal::TimedOut => "request timeout",
            Terminal::HostNotFound => "host not found",
            Terminal::DnsTimedOut => "dns timeout",
        }
    }
}

pub(crate) struct InFlightRequest {
    id: Uuid,
    spec: RequestSpec,
    outbound: HttpRequest,
    context: RequestContext,
    config: Arc<ClientConfig>,
    lookup_host: String,
    callback: OnceSlot<Completion>,
    phase: Mutex<Phase>,
    sent_headers: Mutex<Option<Headers>>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    guard: TimeoutGuard,
    trace: OnceLock<TraceSpan>,
}

impl InFlightRequest {
    pub(crate) fn new(
        id: Uuid,
        spec: RequestSpec,
        context: RequestContext,
        config: Arc<ClientConfig>,
        lookup_host: String,
        guard: TimeoutGuard,
        callback: Completion,
    ) -> Self {
        let outbound = spec.build(context.is_shadow());
        Self {
            id,
            spec,
            outbound,
            context,
            config,
            lookup_host,
            callback: OnceSlot::new(callback),
            phase: Mutex::new(Phase::Created),
            sent_headers: Mutex::new(None),
            transport: Mutex::new(None),
            guard,
            trace: OnceLock::new(),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn spec(&self) -> &RequestSpec {
        &self.spec
    }

    pub(crate) fn outbound(&self) -> &HttpRequest {
        &self.outbound
    }

    pub(crate) fn guard(&self) -> &TimeoutGuard {
        &self.guard
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.callback.is_taken()
    }

    /// Moves to `next` unless the request already completed.
    pub(crate) fn enter(&self, next: Phase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == Phase::Completed || self.callback.is_taken() {
            return false;
        }
        debug!("request {} {:?} -> {:?}", self.id, *phase, next);
        *phase = next;
        true
    }

    pub(crate) fn synthesize_headers(&self) -> Headers {
        let headers = headers::synthesize(&self.spec, &self.outbound, &self.context, &self.config);
        *self.sent_headers.lock().unwrap_or_else(PoisonError::into_inner) = Some(headers.clone());
        headers
    }

    pub(crate) fn begin_trace(&self) {
        let Some(collector) = self.context.trace() else {
            return;
        };
        let name = format!("{}{}", self.spec.host(), self.outbound.uri);
        let detail = json!({
            "method": self.outbound.method.as_str(),
            "params": self.spec.params().to_value(),
            "body": self.body_text(),
            "header": self.current_headers(),
            "use_http_proxy": self.spec.is_proxied(),
        });
        let _ = self.trace.set(TraceSpan::begin(Arc::clone(collector), &name, &detail));
    }

    pub(crate) fn trace_dispatch(&self) {
        if let Some(span) = self.trace.get() {
            let body = self.body_text().map_or(Value::Null, Value::String);
            span.event(self.outbound.method.as_str(), TraceStatus::Success, &body);
        }
    }

    /// Stores the transport for release at completion. If the request
    /// already completed while the transport was dispatching, it is released
    /// right away.
    pub(crate) fn park_transport(&self, transport: Box<dyn Transport>) {
        *self.transport.lock().unwrap_or_else(PoisonError::into_inner) = Some(transport);
        if self.is_completed() {
            self.release_transport();
        }
    }

    fn release_transport(&self) {
        let transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut transport) = transport {
            debug!("request {} releasing transport", self.id);
            transport.close();
        }
    }

    /// Handles one terminal event. Only the first one reaches the callback.
    pub(crate) fn complete(&self, terminal: Terminal) {
        self.guard.cancel();
        let Some(callback) = self.callback.take() else {
            debug!("request {} already completed, ignoring {}", self.id, terminal.name());
            self.release_transport();
            return;
        };
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = Phase::Completed;
        debug!("request {} completed by {}", self.id, terminal.name());

        let _cleanup = Cleanup(self);
        let result = self.outcome(terminal);
        callback(result);
    }

    fn outcome(&self, terminal: Terminal) -> Result<Response, RequestError> {
        match terminal {
            Terminal::Received(raw) => {
                let response = Response::from(raw);
                self.commit_trace(
                    TraceStatus::Success,
                    json!({
                        "code": response.status_code(),
                        "header": response.headers(),
                        "body": response.text(),
                    }),
                );
                Ok(response)
            }
            Terminal::Closed => {
                let err = RequestError::ConnectionClosed(Box::new(self.metadata()));
                self.commit_trace(TraceStatus::Error, self.failure_detail(&err));
                Err(err)
            }
            Terminal::TimedOut => {
                let err = RequestError::RequestTimeout(Box::new(self.metadata()));
                self.commit_trace(TraceStatus::Warn, self.failure_detail(&err));
                Err(err)
            }
            Terminal::HostNotFound => Err(RequestError::HostNotFound {
                host: self.lookup_host.clone(),
            }),
            Terminal::DnsTimedOut => Err(RequestError::DnsTimeout {
                host: self.lookup_host.clone(),
                timeout_ms: self.spec.timeout().unwrap_or_default(),
            }),
        }
    }

    fn commit_trace(&self, status: TraceStatus, detail: Value) {
        if let Some(span) = self.trace.get() {
            span.commit(status, &detail);
        }
    }

    fn failure_detail(&self, err: &RequestError) -> Value {
        json!({
            "message": err.to_string(),
            "code": err.code(),
            "metadata": err.metadata().and_then(|m| serde_json::to_value(m).ok()),
        })
    }

    fn metadata(&self) -> RequestMetadata {
        RequestMetadata {
            host: self.spec.host().to_string(),
            port: self.spec.port(),
            ssl: self.spec.ssl(),
            uri: self.outbound.uri.clone(),
            method: self.outbound.method.to_string(),
            params: self.spec.params().to_value(),
            body: self.body_text(),
            header: self.current_headers(),
            timeout: self.spec.timeout(),
            use_http_proxy: self.spec.is_proxied(),
        }
    }

    fn current_headers(&self) -> Headers {
        self.sent_headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.outbound.headers.clone())
    }

    fn body_text(&self) -> Option<String> {
        self.outbound
            .body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// Runs the mandatory cleanup when dropped, including during a panic
/// unwinding out of the callback.
struct Cleanup<'a>(&'a InFlightRequest);

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!("request {} completion callback panicked", self.0.id);
        }
        self.0.guard.cancel();
        self.0.release_transport();
    }
}

/// Caller-side view of a request handed to `HttpClient::execute`.
#[derive(Clone)]
pub struct CallHandle {
    request: Arc<InFlightRequest>,
}

impl CallHandle {
    pub(crate) fn new(request: Arc<InFlightRequest>) -> Self {
        Self { request }
    }

    /// Unique id; also the `request` part of the request's timer keys.
    pub fn id(&self) -> Uuid {
        self.request.id()
    }

    pub fn phase(&self) -> Phase {
        self.request.phase()
    }

    pub fn is_completed(&self) -> bool {
        self.request.is_completed()
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("id", &self.id())
            .field("phase", &self.phase())
            .finish()
    }
}
