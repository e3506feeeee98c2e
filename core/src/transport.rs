//! Adapter between an in-flight request and the injected HTTP transport.
//!
//! # Design
//! The transport owns sockets, TLS and wire framing. This module only opens
//! one connection per request, hands it the final headers and the verb, and
//! turns whatever the transport reports back (a response or a close) into a
//! terminal event for the completion gate.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde_json::{Map, Value};

use crate::gate::{InFlightRequest, Phase, Terminal};
use crate::http::{Headers, HttpMethod, RawResponse};

/// Free-form transport settings forwarded before dispatch.
pub type TransportOptions = Map<String, Value>;

/// Address a connection is opened to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTarget {
    pub ip: IpAddr,
    pub port: u16,
    pub tls: bool,
}

/// Opens transports. Shared by all requests.
pub trait Connector: Send + Sync {
    fn connect(&self, target: &ConnectTarget) -> Box<dyn Transport>;
}

/// One low-level HTTP connection.
///
/// A dispatch method must report through `events` at most once per signal;
/// reporting synchronously from inside the dispatch call is allowed.
pub trait Transport: Send {
    fn set_options(&mut self, _options: &TransportOptions) {}

    fn set_headers(&mut self, headers: &Headers);

    fn get(&mut self, uri: &str, events: TransportEvents);

    fn post(&mut self, uri: &str, body: Vec<u8>, events: TransportEvents);

    /// Any method other than GET and POST.
    fn execute(&mut self, method: HttpMethod, uri: &str, body: Option<Vec<u8>>, events: TransportEvents);

    fn close(&mut self);
}

/// Signals a transport raises for the request it carries.
#[derive(Clone)]
pub struct TransportEvents {
    request: Arc<InFlightRequest>,
}

impl TransportEvents {
    pub(crate) fn new(request: Arc<InFlightRequest>) -> Self {
        Self { request }
    }

    /// A complete response arrived.
    pub fn on_receive(&self, response: RawResponse) {
        self.request.complete(Terminal::Received(response));
    }

    /// The connection closed without a response.
    pub fn on_close(&self) {
        self.request.complete(Terminal::Closed);
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("request", &self.request.id())
            .finish()
    }
}

/// Connects to `target` and sends the request.
///
/// The request-phase deadline starts here, once resolution has succeeded.
pub(crate) fn issue(request: &Arc<InFlightRequest>, connector: &dyn Connector, target: ConnectTarget) {
    if !request.enter(Phase::Sending) {
        return;
    }
    debug!(
        "request {} connecting to {}:{} (tls: {})",
        request.id(),
        target.ip,
        target.port,
        target.tls
    );

    let mut transport = connector.connect(&target);
    let options = request.spec().options();
    if !options.is_empty() {
        transport.set_options(options);
    }
    let headers = request.synthesize_headers();
    transport.set_headers(&headers);
    request.begin_trace();

    if let Some(timeout) = request.spec().timeout() {
        let pending = Arc::clone(request);
        request.guard().start(
            Duration::from_millis(timeout),
            Box::new(move || pending.complete(Terminal::TimedOut)),
        );
    }

    let outbound = request.outbound();
    let events = TransportEvents::new(Arc::clone(request));
    request.trace_dispatch();
    match outbound.method {
        HttpMethod::Get => transport.get(&outbound.uri, events),
        HttpMethod::Post => transport.post(&outbound.uri, outbound.body.clone().unwrap_or_default(), events),
        method => transport.execute(method, &outbound.uri, outbound.body.clone(), events),
    }

    request.park_transport(transport);
}
