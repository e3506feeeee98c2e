//! Entry point that runs a request through its stages.
//!
//! # Design
//! `HttpClient` holds the shared collaborators (resolver, timer, connector)
//! and the injected `ClientConfig`. `execute` validates synchronously and
//! then drives the request through Build → Resolve → Send → Complete without
//! ever blocking: every stage after validation continues from a collaborator
//! callback, and every outcome reaches the caller through the completion
//! callback.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::context::RequestContext;
use crate::error::{ConfigError, RequestError};
use crate::gate::{CallHandle, InFlightRequest, Phase, Terminal};
use crate::http::Response;
use crate::request::RequestSpec;
use crate::resolver::{ResolutionOutcome, Resolver, ResolverGateway, TokioResolver};
use crate::timer::{TimeoutGuard, TimerKey, TimerPhase, TimerService, TokioTimer};
use crate::transport::{self, ConnectTarget, Connector};

/// Asynchronous, callback-driven HTTP client issuing one connection per call.
#[derive(Clone)]
pub struct HttpClient {
    gateway: ResolverGateway,
    timer: Arc<dyn TimerService>,
    connector: Arc<dyn Connector>,
    config: Arc<ClientConfig>,
}

impl HttpClient {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        timer: Arc<dyn TimerService>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            gateway: ResolverGateway::new(resolver, Arc::clone(&timer)),
            timer,
            connector,
            config: Arc::new(ClientConfig::default()),
        }
    }

    /// Client using the system resolver and timers on the given runtime.
    pub fn with_runtime(handle: Handle, connector: Arc<dyn Connector>) -> Self {
        Self::new(
            Arc::new(TokioResolver::new(handle.clone())),
            Arc::new(TokioTimer::new(handle)),
            connector,
        )
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends the request described by `spec`.
    ///
    /// Configuration problems are returned immediately and nothing is sent.
    /// Otherwise `callback` runs exactly once, with the response or with the
    /// failure that ended the request.
    pub fn execute<F>(
        &self,
        spec: RequestSpec,
        context: RequestContext,
        callback: F,
    ) -> Result<CallHandle, ConfigError>
    where
        F: FnOnce(Result<Response, RequestError>) + Send + 'static,
    {
        let (host, port, tls) = self.route(&spec)?;
        let timeout = spec.timeout().map(Duration::from_millis);

        let id = Uuid::new_v4();
        let request = Arc::new(InFlightRequest::new(
            id,
            spec,
            context,
            Arc::clone(&self.config),
            host.clone(),
            TimeoutGuard::new(Arc::clone(&self.timer), id),
            Box::new(callback),
        ));
        let handle = CallHandle::new(Arc::clone(&request));

        request.enter(Phase::Resolving);
        debug!("request {id} resolving {host}");
        let connector = Arc::clone(&self.connector);
        self.gateway.resolve(
            &host,
            timeout,
            TimerKey::new(id, TimerPhase::Dns),
            move |outcome| match outcome {
                ResolutionOutcome::Resolved(ip) => {
                    transport::issue(&request, connector.as_ref(), ConnectTarget { ip, port, tls })
                }
                ResolutionOutcome::NotFound => request.complete(Terminal::HostNotFound),
                ResolutionOutcome::TimedOut => request.complete(Terminal::DnsTimedOut),
            },
        );

        Ok(handle)
    }

    /// Host and port to resolve and connect to. Proxied requests go to the
    /// configured proxy over plain HTTP.
    fn route(&self, spec: &RequestSpec) -> Result<(String, u16, bool), ConfigError> {
        if spec.is_proxied() {
            let proxy = self
                .config
                .proxy
                .as_ref()
                .filter(|p| !p.host.is_empty())
                .ok_or(ConfigError::MissingProxyConfig)?;
            return Ok((proxy.host.clone(), proxy.port, false));
        }
        if spec.host().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        Ok((spec.host().to_string(), spec.port(), spec.ssl()))
    }
}
