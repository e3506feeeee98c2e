//! Request-lifecycle core of an asynchronous, callback-driven HTTP client.
//!
//! # Overview
//! Given a target and a `RequestSpec`, `HttpClient::execute` resolves the
//! host, opens exactly one connection through an injected transport, sends
//! one request and fires the completion callback exactly once, with either
//! the response or a categorized `RequestError`. Nothing blocks the calling
//! thread.
//!
//! # Design
//! - Collaborators sit behind traits: `Resolver` (DNS), `TimerService`
//!   (deadlines), `Connector`/`Transport` (sockets and wire framing) and
//!   `TraceCollector` (optional tracing). `TokioResolver` and `TokioTimer`
//!   are ready-made implementations.
//! - The lifecycle is an explicit pipeline: build the request, resolve the
//!   host racing the deadline, send it under a fresh deadline, complete.
//! - All terminal events go through one completion gate whose callback slot
//!   is taken at most once; cleanup runs on every path.
//! - Configuration (proxy target, caller identity) is injected through
//!   `ClientConfig`, never read from global state.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod headers;
pub mod http;
pub mod once;
pub mod request;
pub mod resolver;
pub mod timer;
pub mod trace;
pub mod transport;

pub use client::HttpClient;
pub use config::{ClientConfig, ConfigProvider, EnvConfig, ProxyConfig};
pub use context::RequestContext;
pub use error::{ConfigError, RequestError, RequestMetadata, TraceError};
pub use gate::{CallHandle, Completion, Phase};
pub use http::{Headers, HttpMethod, HttpRequest, RawResponse, Response};
pub use request::{Params, RequestSpec, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS};
pub use resolver::{ResolutionOutcome, Resolver, ResolverGateway, TokioResolver};
pub use timer::{TimeoutGuard, TimerKey, TimerPhase, TimerService, TokioTimer};
pub use trace::{TraceCollector, TraceHandle, TraceStatus};
pub use transport::{ConnectTarget, Connector, Transport, TransportEvents, TransportOptions};
