//! Error types for the request lifecycle.
//!
//! # Design
//! Two families with different delivery paths. `ConfigError` is returned
//! synchronously while a request is being assembled or validated, before any
//! I/O happens. `RequestError` is only ever delivered through the completion
//! callback once the request has left the caller's hands.

use serde::Serialize;
use thiserror::Error;

use crate::http::Headers;

/// Invalid request or client configuration, detected before any I/O.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("timeout must be between 0 and 60000 ms, {0} ms given")]
    TimeoutOutOfRange(u64),

    #[error("host can't be empty")]
    MissingHost,

    #[error("URL is malformed: {url} ({reason})")]
    MalformedUrl { url: String, reason: String },

    #[error("URL is not complete, {0} is given")]
    IncompleteUrl(String),

    /// A proxied request was issued but no proxy target is configured.
    #[error("missing http proxy config (http_proxy.host)")]
    MissingProxyConfig,

    #[error("http proxy port is not a valid port: {0}")]
    InvalidProxyPort(String),

    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("request payload could not be serialized: {0}")]
    Serialization(String),
}

/// Categorized failure delivered through the completion callback.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The resolver answered without an address.
    #[error("[http client host not found] host:{host}")]
    HostNotFound { host: String },

    /// Resolution did not finish before the request deadline.
    #[error("[http client dns lookup timeout] host:{host} timeout:{timeout_ms}ms")]
    DnsTimeout { host: String, timeout_ms: u64 },

    /// The request was sent but no response arrived before the deadline.
    #[error("{}", .0.describe("timeout"))]
    RequestTimeout(Box<RequestMetadata>),

    /// The transport closed before a response was received.
    #[error("{}", .0.describe("closed"))]
    ConnectionClosed(Box<RequestMetadata>),
}

impl RequestError {
    /// Numeric code attached to the failure. Closed connections carry no
    /// HTTP status and report 0.
    pub fn code(&self) -> u16 {
        match self {
            RequestError::HostNotFound { .. }
            | RequestError::DnsTimeout { .. }
            | RequestError::RequestTimeout(_) => 408,
            RequestError::ConnectionClosed(_) => 0,
        }
    }

    /// Request details captured when the failure happened, if any.
    pub fn metadata(&self) -> Option<&RequestMetadata> {
        match self {
            RequestError::RequestTimeout(meta) | RequestError::ConnectionClosed(meta) => Some(meta),
            _ => None,
        }
    }
}

/// Snapshot of an in-flight request attached to transport-phase failures and
/// trace records.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RequestMetadata {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub uri: String,
    pub method: String,
    pub params: serde_json::Value,
    pub body: Option<String>,
    pub header: Headers,
    pub timeout: Option<u64>,
    pub use_http_proxy: bool,
}

impl RequestMetadata {
    fn describe(&self, kind: &str) -> String {
        format!(
            "[http client {kind}] host:{} port:{} uri:{} method:{}",
            self.host, self.port, self.uri, self.method
        )
    }
}

/// Failure reported by a trace collector. Never reaches the caller.
#[derive(Debug, Error)]
#[error("trace collector failed: {0}")]
pub struct TraceError(pub String);
